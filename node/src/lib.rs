mod bsp;
mod coordinator;
mod error;
mod local;
mod role;

use std::sync::Arc;

use comms::specs::job::JobConfig;
use log::{error, info};
use machine_learning::Model;
use tokio::task::JoinSet;
use worker::{Dataset, data::load_csv};

pub use bsp::{Peer, PeerTemplate};
pub use coordinator::{Coordinator, Report};
pub use error::{NodeErr, Result};
pub use local::{LocalCluster, LocalPeer};
pub use role::Role;

/// Loads the model and the dataset of a job and runs it on a `LocalCluster`.
///
/// # Arguments
/// * `config` - The job configuration.
///
/// # Returns
/// The report of every peer ordered by index, or the first error that ended the job.
pub async fn run_job(config: JobConfig) -> Result<Vec<Report>> {
    Role::assign(0, config.workers)?;

    let input = config.input_path.clone().ok_or_else(|| {
        NodeErr::Configuration("training.input.path is required to run a local job".into())
    })?;

    let model = Model::load_or_init(&config.model_path, config.model_spec.as_ref(), config.seed)?;
    let width = model.spec().input_size() + model.spec().output_size();
    let dataset = load_csv(&input, width)?;
    info!(
        "loaded {} instances from {}",
        dataset.len(),
        input.display()
    );

    run_local(config, model, Arc::new(dataset)).await
}

/// Runs a job with `config.workers` peers as tasks of this process.
///
/// Every peer starts from the same `model`. If any peer fails, the rest are aborted so no peer is
/// left waiting on a barrier.
///
/// # Arguments
/// * `config` - The job configuration.
/// * `model` - The initial model.
/// * `dataset` - The dataset to partition among the slaves.
///
/// # Returns
/// The report of every peer ordered by index, or the first error that ended the job.
pub async fn run_local(
    config: JobConfig,
    model: Model,
    dataset: Arc<Dataset>,
) -> Result<Vec<Report>> {
    let count = config.workers;
    let peers = LocalCluster::peers(count, &config.server_host, Arc::clone(&dataset))?;

    let slaves = count - 1;
    if dataset.len() < slaves {
        return Err(NodeErr::Configuration(format!(
            "{} instances can't be partitioned among {slaves} slaves",
            dataset.len()
        )));
    }

    let config = Arc::new(config);
    let mut tasks = JoinSet::new();

    for peer in peers {
        let coordinator = Coordinator::new(peer, Arc::clone(&config), model.clone())?;
        tasks.spawn(coordinator.run());
    }

    let mut reports = Vec::with_capacity(count);

    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(report)) => {
                reports.push(report);
                continue;
            }
            Ok(Err(e)) => e,
            Err(e) => NodeErr::Task(e.to_string()),
        };

        error!("aborting job: {err}");
        tasks.shutdown().await;
        return Err(err);
    }

    reports.sort_by_key(|report| report.index);
    Ok(reports)
}
