use std::{env, io};

use comms::specs::job::JobConfig;
use log::info;
use tokio::signal;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args().nth(1).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "usage: node <config.json>")
    })?;

    let config = JobConfig::load(&path)?;
    info!(
        "running {} with {} workers",
        config.model_path.display(),
        config.workers
    );

    tokio::select! {
        ret = node::run_job(config) => {
            for report in ret? {
                info!(
                    "peer {} ({:?}) finished after {} rounds",
                    report.index, report.role, report.rounds
                );
            }
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}
