use std::num::NonZeroUsize;

use comms::MergeMessage;
use log::{debug, warn};
use machine_learning::matrices;
use ndarray::Array2;
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::sync::watch;

use crate::{
    Result,
    convergence::{ConvergencePolicy, ConvergenceState},
};

/// The canonical training state, only touched while holding the merge lock.
#[derive(Debug)]
struct MergeState {
    weights: Vec<Array2<f32>>,
    previous: Vec<Array2<f32>>,
    convergence: ConvergenceState,
}

/// Owns the canonical weights of a job and merges the updates computed by the slaves into them.
///
/// Every merge runs inside a single critical section, concurrent callers are serialized in
/// arrival order. Once converged the state is frozen and every later merge receives it unchanged.
#[derive(Debug)]
pub struct MergeService {
    state: Mutex<MergeState>,
    dims: Vec<(usize, usize)>,
    slave_count: f32,
    policy: ConvergencePolicy,
    converged: watch::Sender<bool>,
}

impl MergeService {
    /// Creates a new `MergeService` with zeroed previous updates.
    ///
    /// # Arguments
    /// * `weights` - The initial canonical weights.
    /// * `slave_count` - The amount of workers sending updates, each update is divided by it.
    /// * `policy` - When to consider the job converged.
    pub fn new(
        weights: Vec<Array2<f32>>,
        slave_count: NonZeroUsize,
        policy: ConvergencePolicy,
    ) -> Self {
        let dims = matrices::shapes(&weights);
        let (converged, _) = watch::channel(false);

        Self {
            state: Mutex::new(MergeState {
                previous: matrices::zeros(&dims),
                weights,
                convergence: ConvergenceState::default(),
            }),
            dims,
            slave_count: slave_count.get() as f32,
            policy,
            converged,
        }
    }

    /// Applies a slave's averaged update to the canonical weights.
    ///
    /// This is CPU-bound and blocks while waiting for the lock, async callers should run it
    /// through `task::block_in_place`.
    ///
    /// # Arguments
    /// * `request` - The averaged update and the slave's copy of the previous updates.
    ///
    /// # Returns
    /// The canonical weights and previous updates after the merge, or an error if the request's
    /// shapes don't match the canonical state, in which case nothing is modified.
    pub fn merge(&self, request: &MergeMessage) -> Result<MergeMessage> {
        let mut state = self.state.lock();

        if state.convergence.is_converged() {
            debug!("merge after convergence, answering with the frozen state");
            return Ok(self.respond(&state));
        }

        matrices::check_shapes(&request.matrices, &self.dims)?;
        matrices::check_shapes(&request.previous_deltas, &self.dims)?;

        if !request.average_error.is_finite() {
            warn!("merging an update with non finite error {}", request.average_error);
        }

        let MergeState {
            weights, previous, ..
        } = &mut *state;
        let slave_count = self.slave_count;

        weights
            .par_iter_mut()
            .zip(previous.par_iter_mut())
            .zip(request.matrices.par_iter())
            .for_each(|((w, p), update)| {
                let applied = update / slave_count;
                *w += &applied;
                *p = applied;
            });

        if state.convergence.record(request.average_error, &self.policy) {
            self.converged.send_if_modified(|converged| !std::mem::replace(converged, true));
        }

        Ok(self.respond(&state))
    }

    fn respond(&self, state: &MergeState) -> MergeMessage {
        MergeMessage::response(
            state.convergence.is_converged(),
            state.weights.clone(),
            state.previous.clone(),
        )
    }

    /// A receiver of the convergence flag, it only ever goes from `false` to `true`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.converged.subscribe()
    }

    pub fn is_converged(&self) -> bool {
        *self.converged.borrow()
    }

    /// Waits until the job converges.
    pub async fn converged(&self) {
        let mut rx = self.subscribe();
        // the sender lives in `self`, so the channel can't be closed while waiting
        let _ = rx.wait_for(|&converged| converged).await;
    }

    pub fn merge_count(&self) -> u64 {
        self.state.lock().convergence.merge_count()
    }

    /// A copy of the canonical weights.
    pub fn weights(&self) -> Vec<Array2<f32>> {
        self.state.lock().weights.clone()
    }

    /// A copy of the last applied updates.
    pub fn previous(&self) -> Vec<Array2<f32>> {
        self.state.lock().previous.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU64, sync::Arc, thread};

    use machine_learning::MlErr;
    use ndarray::array;

    use super::*;
    use crate::MergeErr;

    fn policy(limit: u64) -> ConvergencePolicy {
        ConvergencePolicy {
            check_interval: NonZeroU64::new(1000).unwrap(),
            merge_limit: limit,
            error_threshold: 0.,
        }
    }

    fn request(update: Array2<f32>) -> MergeMessage {
        let zeros = Array2::zeros(update.dim());
        MergeMessage::request(1., vec![update], vec![zeros])
    }

    fn service(slaves: usize, limit: u64) -> MergeService {
        MergeService::new(
            vec![array![[1.0, 2.0], [3.0, 4.0]]],
            NonZeroUsize::new(slaves).unwrap(),
            policy(limit),
        )
    }

    #[test]
    fn applies_update_divided_by_slave_count() {
        let service = service(2, 100);
        let response = service.merge(&request(array![[2.0, -2.0], [0.5, 0.0]])).unwrap();

        assert!(!response.converged);
        assert_eq!(response.matrices, vec![array![[2.0, 1.0], [3.25, 4.0]]]);
        assert_eq!(response.previous_deltas, vec![array![[1.0, -1.0], [0.25, 0.0]]]);
        assert_eq!(service.previous(), response.previous_deltas);
        assert_eq!(service.weights(), response.matrices);
        assert_eq!(service.merge_count(), 1);
    }

    #[test]
    fn merges_are_order_independent() {
        let updates = [
            array![[0.5, 0.25], [-1.0, 2.0]],
            array![[1.5, -0.75], [0.0, 0.5]],
            array![[-0.25, 1.0], [4.0, -2.0]],
        ];

        let forward = service(4, 100);
        let backward = service(4, 100);
        for u in &updates {
            forward.merge(&request(u.clone())).unwrap();
        }
        for u in updates.iter().rev() {
            backward.merge(&request(u.clone())).unwrap();
        }

        let expected = updates
            .iter()
            .fold(array![[1.0, 2.0], [3.0, 4.0]], |acc, u| acc + u / 4.0);
        assert_eq!(forward.weights(), vec![expected.clone()]);
        assert_eq!(backward.weights(), vec![expected]);
    }

    #[test]
    fn concurrent_merges_lose_no_update() {
        const THREADS: usize = 8;
        const MERGES: usize = 50;

        let service = Arc::new(service(2, u64::MAX));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    for _ in 0..MERGES {
                        service.merge(&request(array![[1.0, 0.5], [-2.0, 0.25]])).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let n = (THREADS * MERGES) as f32;
        assert_eq!(service.merge_count(), (THREADS * MERGES) as u64);
        assert_eq!(
            service.weights(),
            vec![array![
                [1.0 + n * 0.5, 2.0 + n * 0.25],
                [3.0 - n, 4.0 + n * 0.125]
            ]]
        );
    }

    #[test]
    fn rejects_mismatched_shapes_without_mutating() {
        let service = service(1, 100);

        let wrong_shape = request(array![[1.0, 2.0, 3.0]]);
        assert!(matches!(
            service.merge(&wrong_shape),
            Err(MergeErr::Shape(MlErr::ShapeMismatch { index: 0, .. }))
        ));

        let wrong_len = MergeMessage::request(1., vec![], vec![]);
        assert!(matches!(
            service.merge(&wrong_len),
            Err(MergeErr::Shape(MlErr::SizeMismatch { .. }))
        ));

        let wrong_previous = MergeMessage::request(1., vec![Array2::zeros((2, 2))], vec![]);
        assert!(service.merge(&wrong_previous).is_err());

        assert_eq!(service.merge_count(), 0);
        assert_eq!(service.weights(), vec![array![[1.0, 2.0], [3.0, 4.0]]]);
    }

    #[test]
    fn convergence_flag_is_monotonic_and_freezes_state() {
        let service = service(1, 2);
        let mut rx = service.subscribe();

        assert!(!service.merge(&request(Array2::ones((2, 2)))).unwrap().converged);
        assert!(!service.is_converged());
        assert!(!rx.has_changed().unwrap());

        assert!(service.merge(&request(Array2::ones((2, 2)))).unwrap().converged);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        let frozen = service.weights();
        let late = service.merge(&request(Array2::ones((2, 2)))).unwrap();
        assert!(late.converged);
        assert_eq!(late.matrices, frozen);
        assert_eq!(service.merge_count(), 2);
        assert!(service.is_converged());
        assert!(!rx.has_changed().unwrap());
    }
}
