use crate::{NodeErr, Result};

/// The part a peer plays in the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Runs the merge service and persists the model.
    Master,
    /// Trains on its partition and merges into the master.
    Slave,
}

impl Role {
    /// Assigns the role of a peer, the one with the highest index is the master.
    ///
    /// # Arguments
    /// * `index` - The ordinal of the peer.
    /// * `count` - The amount of peers of the job.
    ///
    /// # Returns
    /// The role, or a configuration error if there are less than two peers or the index is out
    /// of range.
    pub fn assign(index: usize, count: usize) -> Result<Self> {
        if count < 2 {
            return Err(NodeErr::Configuration(format!(
                "a job needs at least 2 workers, got {count}"
            )));
        }

        if index >= count {
            return Err(NodeErr::Configuration(format!(
                "peer index {index} out of range for {count} workers"
            )));
        }

        Ok(if index == master_index(count) {
            Role::Master
        } else {
            Role::Slave
        })
    }
}

/// The index of the master of a job with `count` peers.
pub fn master_index(count: usize) -> usize {
    count.saturating_sub(1)
}
