use std::sync::Arc;

use tokio::sync::Barrier;
use worker::{Dataset, Partition, data::shard_range};

use crate::{
    Peer, Result,
    role::{Role, master_index},
};

/// A peer of a `LocalCluster`, every peer runs as a task of the same process.
#[derive(Debug)]
pub struct LocalPeer {
    index: usize,
    identities: Arc<[String]>,
    barrier: Arc<Barrier>,
    partition: Option<Partition>,
}

impl Peer for LocalPeer {
    type Source = Partition;

    fn peer_index(&self) -> usize {
        self.index
    }

    fn peer_count(&self) -> usize {
        self.identities.len()
    }

    fn peer_identity(&self, index: usize) -> Option<&str> {
        self.identities.get(index).map(String::as_str)
    }

    fn take_partition(&mut self) -> Option<Partition> {
        self.partition.take()
    }

    async fn barrier_sync(&self) {
        self.barrier.wait().await;
    }
}

/// An in-process bulk synchronous parallel substrate.
///
/// The dataset is split into balanced contiguous partitions among the slaves, the master gets an
/// empty one.
pub struct LocalCluster;

impl LocalCluster {
    /// Creates the peers of a local job.
    ///
    /// # Arguments
    /// * `count` - The amount of peers, master included.
    /// * `host` - The network identity of every peer.
    /// * `dataset` - The dataset to partition among the slaves.
    ///
    /// # Returns
    /// The peers ordered by index, or a configuration error if `count` is less than two.
    pub fn peers(count: usize, host: &str, dataset: Arc<Dataset>) -> Result<Vec<LocalPeer>> {
        Role::assign(0, count)?;

        let slaves = count - 1;
        let master = master_index(count);
        let identities: Arc<[String]> = (0..count).map(|_| host.to_string()).collect();
        let barrier = Arc::new(Barrier::new(count));

        let peers = (0..count)
            .map(|index| {
                let range = if index == master {
                    0..0
                } else {
                    shard_range(dataset.len(), index, slaves)
                };

                LocalPeer {
                    index,
                    identities: Arc::clone(&identities),
                    barrier: Arc::clone(&barrier),
                    partition: Some(Partition::new(Arc::clone(&dataset), range)),
                }
            })
            .collect();

        Ok(peers)
    }
}
