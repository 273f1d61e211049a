use comms::specs::machine_learning::CostSpec;

const EPSILON: f32 = 1e-7;

/// The cost of a single output unit, its sum over the output layer is the training error of an
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostFn {
    #[default]
    SquaredError,
    CrossEntropy,
}
use CostFn::*;

impl CostFn {
    /// The cost of producing `output` when `target` was expected.
    pub fn cost(&self, target: f32, output: f32) -> f32 {
        match self {
            SquaredError => 0.5 * (target - output).powi(2),
            CrossEntropy => {
                let o = output.clamp(EPSILON, 1. - EPSILON);
                -target * o.ln() - (1. - target) * (1. - o).ln()
            }
        }
    }

    /// The derivative of the cost with respect to `output`.
    pub fn derivative(&self, target: f32, output: f32) -> f32 {
        match self {
            SquaredError => output - target,
            CrossEntropy => {
                let o = output.clamp(EPSILON, 1. - EPSILON);
                -target / o + (1. - target) / (1. - o)
            }
        }
    }
}

impl From<CostSpec> for CostFn {
    fn from(spec: CostSpec) -> Self {
        match spec {
            CostSpec::SquaredError => SquaredError,
            CostSpec::CrossEntropy => CrossEntropy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squared_error() {
        assert_eq!(SquaredError.cost(1., 3.), 2.);
        assert_eq!(SquaredError.derivative(1., 3.), 2.);
    }

    #[test]
    fn cross_entropy_is_finite_at_the_edges() {
        assert!(CrossEntropy.cost(1., 0.).is_finite());
        assert!(CrossEntropy.derivative(0., 1.).is_finite());
        assert!(CrossEntropy.cost(1., 0.9) < CrossEntropy.cost(1., 0.1));
    }
}
