use std::num::NonZeroU64;

use log::{debug, info};

/// When a training job is considered done.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    /// Merges between two evaluations of the mean training error.
    pub check_interval: NonZeroU64,
    /// The hard cap on applied merges.
    pub merge_limit: u64,
    /// A window mean below this value also converges, `0` disables it.
    pub error_threshold: f64,
}

/// The progress of a training job, mutated only while holding the merge lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceState {
    merge_count: u64,
    accumulated_error: f64,
    previous_mean: Option<f64>,
    converged: bool,
}

impl ConvergenceState {
    pub fn merge_count(&self) -> u64 {
        self.merge_count
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Records an applied merge and evaluates the policy.
    ///
    /// # Arguments
    /// * `error` - The average training error of the merged batch.
    /// * `policy` - The convergence policy of the job.
    ///
    /// # Returns
    /// Whether the job is converged after this merge.
    pub fn record(&mut self, error: f32, policy: &ConvergencePolicy) -> bool {
        if self.converged {
            return true;
        }

        self.merge_count += 1;
        self.accumulated_error += error as f64;

        let interval = policy.check_interval.get();
        if self.merge_count % interval == 0 {
            let mean = self.accumulated_error / interval as f64;
            self.accumulated_error = 0.;

            let rising = self.previous_mean.is_some_and(|previous| mean > previous);
            let low = policy.error_threshold > 0. && mean < policy.error_threshold;
            debug!(
                merges = self.merge_count;
                "window mean error {mean}, previous {:?}",
                self.previous_mean
            );

            self.previous_mean = Some(mean);
            if rising || low {
                info!(merges = self.merge_count; "converged, window mean error {mean}");
                self.converged = true;
            }
        }

        if !self.converged && self.merge_count >= policy.merge_limit {
            info!(merges = self.merge_count; "merge limit reached");
            self.converged = true;
        }

        self.converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(interval: u64, limit: u64, threshold: f64) -> ConvergencePolicy {
        ConvergencePolicy {
            check_interval: NonZeroU64::new(interval).unwrap(),
            merge_limit: limit,
            error_threshold: threshold,
        }
    }

    #[test]
    fn converges_when_window_mean_rises() {
        let policy = policy(2, 100, 0.);
        let mut state = ConvergenceState::default();

        for error in [4., 4., 2., 2.] {
            assert!(!state.record(error, &policy));
        }

        assert!(!state.record(3., &policy));
        assert!(state.record(3., &policy));
        assert_eq!(state.merge_count(), 6);
    }

    #[test]
    fn converges_below_threshold() {
        let policy = policy(2, 100, 0.5);
        let mut state = ConvergenceState::default();

        assert!(!state.record(0.9, &policy));
        assert!(!state.record(0.9, &policy));
        assert!(!state.record(0.2, &policy));
        assert!(state.record(0.2, &policy));
    }

    #[test]
    fn converges_at_merge_limit_and_stays_converged() {
        let policy = policy(1000, 3, 0.);
        let mut state = ConvergenceState::default();

        assert!(!state.record(1., &policy));
        assert!(!state.record(1., &policy));
        assert!(state.record(1., &policy));

        assert!(state.record(0., &policy));
        assert_eq!(state.merge_count(), 3);
    }
}
