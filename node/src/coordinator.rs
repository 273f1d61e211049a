use std::{
    fmt,
    num::{NonZeroU64, NonZeroUsize},
    sync::Arc,
    time::Duration,
};

use comms::specs::job::JobConfig;
use log::{debug, error, info};
use machine_learning::Model;
use parameter_server::{ConvergencePolicy, MergeServer, MergeService};
use worker::{GradientAccumulator, MergeClient};

use crate::{
    NodeErr, Peer, Result,
    role::{Role, master_index},
};

/// The lifecycle of a peer within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    /// The master is serving merges.
    Serving,
    /// The slave is running merge rounds.
    Training,
    /// Convergence was observed, waiting on the end-of-job barriers.
    Draining,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Serving => "serving",
            Phase::Training => "training",
            Phase::Draining => "draining",
            Phase::Terminated => "terminated",
        };

        f.write_str(name)
    }
}

/// What a peer did during a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub index: usize,
    pub role: Role,
    /// Merges applied by the service for the master, merge rounds run for a slave.
    pub rounds: u64,
    /// Whether the final model was written to the model store, always `false` for slaves.
    pub persisted: bool,
}

/// Drives a single peer of the job through its lifecycle.
pub struct Coordinator<P: Peer> {
    peer: P,
    role: Role,
    phase: Phase,
    config: Arc<JobConfig>,
    model: Model,
}

impl<P: Peer> Coordinator<P> {
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    /// * `peer` - This peer's view of the job.
    /// * `config` - The job configuration, shared by every peer.
    /// * `model` - The initial model, the same for every peer.
    ///
    /// # Returns
    /// The coordinator or a configuration error if the peer can't be assigned a role.
    pub fn new(peer: P, config: Arc<JobConfig>, model: Model) -> Result<Self> {
        let role = Role::assign(peer.peer_index(), peer.peer_count())?;

        Ok(Self {
            peer,
            role,
            phase: Phase::Init,
            config,
            model,
        })
    }

    /// Runs the peer until the job is terminated.
    ///
    /// # Returns
    /// What this peer did, or the error that ended its job.
    pub async fn run(mut self) -> Result<Report> {
        match self.role {
            Role::Master => self.run_master().await,
            Role::Slave => self.run_slave().await,
        }
    }

    async fn run_master(&mut self) -> Result<Report> {
        let count = self.peer.peer_count();
        let index = self.peer.peer_index();
        let slaves = NonZeroUsize::new(count - 1)
            .ok_or_else(|| NodeErr::Configuration("a job needs at least one slave".into()))?;

        let policy = ConvergencePolicy {
            check_interval: NonZeroU64::new(self.config.effective_check_interval(count))
                .unwrap_or(NonZeroU64::MIN),
            merge_limit: self.config.max_iterations.get(),
            error_threshold: self.config.convergence_error_threshold,
        };

        let service = Arc::new(MergeService::new(
            self.model.weights().to_vec(),
            slaves,
            policy,
        ));

        let addr = self.service_addr(index)?;
        let handlers = self.config.server_handlers.unwrap_or(slaves);
        let bound = MergeServer::start(Arc::clone(&service), addr.as_str(), handlers).await;
        let handle = bound.map_err(|source| NodeErr::Bind { addr, source })?;

        self.transition(Phase::Serving);
        service.converged().await;
        info!(
            "training converged after {} merges",
            service.merge_count()
        );

        self.transition(Phase::Draining);
        self.barrier(1).await;
        handle.stop().await;
        self.barrier(2).await;

        self.transition(Phase::Terminated);
        let persisted = self.persist(&service);

        Ok(Report {
            index,
            role: self.role,
            rounds: service.merge_count(),
            persisted,
        })
    }

    async fn run_slave(&mut self) -> Result<Report> {
        let index = self.peer.peer_index();
        let addr = self.service_addr(master_index(self.peer.peer_count()))?;
        let source = self.peer.take_partition().ok_or_else(|| {
            NodeErr::Configuration(format!("peer {index} has no input partition"))
        })?;

        let seed = self.config.seed.map(|seed| seed.wrapping_add(index as u64));
        let network = self.model.network(seed)?;

        let interval = Duration::from_millis(self.config.connect_retry_interval_ms);
        let mut client =
            MergeClient::connect(&addr, self.config.connect_max_retries, interval).await?;
        let mut accumulator = GradientAccumulator::new(network, source, self.config.batch_size);

        self.transition(Phase::Training);
        let rounds = accumulator.run(&mut client).await?;
        client.disconnect().await?;

        self.transition(Phase::Draining);
        self.barrier(1).await;
        self.barrier(2).await;
        self.transition(Phase::Terminated);

        Ok(Report {
            index,
            role: self.role,
            rounds,
            persisted: false,
        })
    }

    /// Writes the canonical weights to the model store, failures are logged and not retried.
    fn persist(&mut self, service: &MergeService) -> bool {
        let res = self
            .model
            .set_weights(service.weights())
            .and_then(|_| self.model.persist());

        match res {
            Ok(()) => {
                info!("model persisted to {}", self.model.path().display());
                true
            }
            Err(e) => {
                error!(
                    "failed to persist model to {}: {e}",
                    self.model.path().display()
                );
                false
            }
        }
    }

    fn service_addr(&self, master: usize) -> Result<String> {
        let host = self.peer.peer_identity(master).ok_or_else(|| {
            NodeErr::Configuration(format!("peer {master} has no network identity"))
        })?;

        Ok(format!("{host}:{}", self.config.server_port))
    }

    async fn barrier(&self, n: u8) {
        debug!(peer = self.peer.peer_index(), barrier = n; "entering barrier");
        self.peer.barrier_sync().await;
    }

    fn transition(&mut self, next: Phase) {
        info!(
            "peer {} ({:?}): {} -> {next}",
            self.peer.peer_index(),
            self.role,
            self.phase
        );
        self.phase = next;
    }
}
