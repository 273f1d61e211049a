use std::num::NonZeroUsize;

use comms::MergeMessage;
use log::{debug, info};
use machine_learning::{arch::LayeredNetwork, matrices};
use ndarray::Array2;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{InstanceSource, MergeClient, Result};

/// Runs batches of the local partition through a private copy of the network and merges the
/// averaged updates into the master's canonical weights.
pub struct GradientAccumulator<S: InstanceSource> {
    network: LayeredNetwork,
    source: S,
    batch_size: NonZeroUsize,
    instance: Vec<f32>,
    converged: bool,
}

impl<S: InstanceSource> GradientAccumulator<S> {
    /// Creates a new `GradientAccumulator`.
    ///
    /// # Arguments
    /// * `network` - The worker's private copy of the network.
    /// * `source` - The local partition, read cyclically.
    /// * `batch_size` - The amount of instances per merge round.
    pub fn new(network: LayeredNetwork, source: S, batch_size: NonZeroUsize) -> Self {
        Self {
            network,
            source,
            batch_size,
            instance: Vec::new(),
            converged: false,
        }
    }

    /// Runs a batch through the network.
    ///
    /// # Returns
    /// The weight updates and the training error, both averaged over the batch.
    pub fn accumulate(&mut self) -> Result<(Vec<Array2<f32>>, f32)> {
        let mut sum = matrices::zeros(&matrices::shapes(self.network.weights()));
        let mut error = 0.;

        for _ in 0..self.batch_size.get() {
            self.source.read_cyclic(&mut self.instance)?;
            let (updates, instance_error) = self.network.train_by_instance(&self.instance)?;

            matrices::add_assign(&mut sum, &updates)?;
            error += instance_error;
        }

        let batch = self.batch_size.get() as f32;
        matrices::divide(&mut sum, batch);
        Ok((sum, error / batch))
    }

    /// Builds the merge request of the next round.
    pub fn request(&mut self) -> Result<MergeMessage> {
        let (updates, error) = self.accumulate()?;
        let previous = self.network.previous().to_vec();
        Ok(MergeMessage::request(error, updates, previous))
    }

    /// Installs the merge service's response as the new local state.
    ///
    /// # Returns
    /// Whether the service reported convergence.
    pub fn install(&mut self, response: MergeMessage) -> Result<bool> {
        self.network.set_weights(response.matrices)?;
        self.network.set_previous(response.previous_deltas)?;
        self.converged = response.converged;
        Ok(self.converged)
    }

    /// Runs a single merge round.
    ///
    /// # Returns
    /// Whether the job converged.
    pub async fn round<R, W>(&mut self, client: &mut MergeClient<R, W>) -> Result<bool>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request = self.request()?;
        let error = request.average_error;
        let response = client.merge(request).await?;

        let converged = self.install(response)?;
        debug!(round = client.rounds(); "merged batch with average error {error}");
        Ok(converged)
    }

    /// Runs merge rounds until the merge service reports convergence.
    ///
    /// # Returns
    /// The amount of rounds run.
    pub async fn run<R, W>(&mut self, client: &mut MergeClient<R, W>) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut rounds = 0;

        while !self.converged {
            self.round(client).await?;
            rounds += 1;
        }

        info!("convergence observed after {rounds} rounds");
        Ok(rounds)
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn network(&self) -> &LayeredNetwork {
        &self.network
    }
}
