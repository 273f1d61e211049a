use comms::specs::machine_learning::SquashingSpec;

/// The nonlinearity applied to a neuron's weighted input sum.
///
/// Derivatives are expressed in terms of the squashed output, which is the only value a neuron
/// keeps around between its forward and backward passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Squashing {
    #[default]
    Sigmoid,
    Tanh,
    Identity,
    Relu,
}
use Squashing::*;

impl Squashing {
    pub fn f(&self, z: f32) -> f32 {
        match self {
            Sigmoid => 1. / (1. + (-z).exp()),
            Tanh => z.tanh(),
            Identity => z,
            Relu => z.max(0.),
        }
    }

    /// The derivative of `f` at the point where it produced `output`.
    pub fn df(&self, output: f32) -> f32 {
        match self {
            Sigmoid => output * (1. - output),
            Tanh => 1. - output * output,
            Identity => 1.,
            Relu => {
                if output > 0. {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}

impl From<SquashingSpec> for Squashing {
    fn from(spec: SquashingSpec) -> Self {
        match spec {
            SquashingSpec::Sigmoid => Sigmoid,
            SquashingSpec::Tanh => Tanh,
            SquashingSpec::Identity => Identity,
            SquashingSpec::Relu => Relu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_derivative_matches_finite_difference() {
        let z = 0.3_f32;
        let h = 1e-3;
        let numeric = (Sigmoid.f(z + h) - Sigmoid.f(z - h)) / (2. * h);
        assert!((Sigmoid.df(Sigmoid.f(z)) - numeric).abs() < 1e-3);
    }

    #[test]
    fn tanh_derivative_matches_finite_difference() {
        let z = -0.7_f32;
        let h = 1e-3;
        let numeric = (Tanh.f(z + h) - Tanh.f(z - h)) / (2. * h);
        assert!((Tanh.df(Tanh.f(z)) - numeric).abs() < 1e-3);
    }

    #[test]
    fn relu_and_identity() {
        assert_eq!(Relu.f(-2.), 0.);
        assert_eq!(Relu.df(0.), 0.);
        assert_eq!(Relu.df(3.), 1.);
        assert_eq!(Identity.f(-2.5), -2.5);
        assert_eq!(Identity.df(100.), 1.);
    }
}
