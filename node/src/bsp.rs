use worker::InstanceSource;

/// A participant of a bulk synchronous parallel job, as seen by the coordinator.
#[allow(unused)]
#[trait_variant::make(Peer: Send)]
pub trait PeerTemplate {
    /// The local input partition of this peer.
    type Source: InstanceSource + Send + 'static;

    /// The ordinal of this peer, in `0..peer_count()`.
    fn peer_index(&self) -> usize;

    /// The amount of peers of the job.
    fn peer_count(&self) -> usize;

    /// The network identity (host) of the peer at `index`.
    fn peer_identity(&self, index: usize) -> Option<&str>;

    /// Takes this peer's input partition, it can only be taken once.
    fn take_partition(&mut self) -> Option<Self::Source>;

    /// Blocks until every peer of the job reaches the same barrier.
    async fn barrier_sync(&self);
}
