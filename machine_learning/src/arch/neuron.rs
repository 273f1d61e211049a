use ndarray::{ArrayView1, ArrayViewMut1, Zip};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::Squashing;

/// The dropout mask applied to a neuron's output during inference.
pub const INFERENCE_MASK: f32 = 0.5;

/// Where dropout neurons draw their mask from on every forward pass.
pub trait MaskSource {
    fn mask(&mut self) -> f32;
}

/// Draws masks of 0 or 1 with equal probability, used while training.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    rng: StdRng,
}

impl Bernoulli {
    /// Creates a new `Bernoulli` mask source.
    ///
    /// # Arguments
    /// * `seed` - The seed of the random number generator, entropy from the os if `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self { rng }
    }
}

impl MaskSource for Bernoulli {
    fn mask(&mut self) -> f32 {
        if self.rng.random_bool(0.5) { 1. } else { 0. }
    }
}

/// Scales every dropout neuron's output by `INFERENCE_MASK`.
pub struct Inference;

impl MaskSource for Inference {
    fn mask(&mut self) -> f32 {
        INFERENCE_MASK
    }
}

/// Always yields the same mask.
pub struct Fixed(pub f32);

impl MaskSource for Fixed {
    fn mask(&mut self) -> f32 {
        self.0
    }
}

/// The per-layer values a neuron needs for its forward and backward passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerParams {
    pub squashing: Squashing,
    pub learning_rate: f32,
    pub momentum: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Standard {
    output: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dropout {
    output: f32,
    dropped: bool,
}

/// A single unit of a layered network.
///
/// A neuron owns no weights, the network hands it its incoming weights on `forward` and its
/// outgoing weights on `backward`, together with the slice of the update matrix it writes into.
#[derive(Debug, Clone, PartialEq)]
pub enum Neuron {
    Standard(Standard),
    Dropout(Dropout),
}
use Neuron::*;

impl Neuron {
    pub fn standard() -> Self {
        Standard(Standard::default())
    }

    pub fn dropout() -> Self {
        Dropout(Dropout::default())
    }

    /// The value this neuron propagated on its last forward pass.
    pub fn output(&self) -> f32 {
        match self {
            Standard(n) => n.output,
            Dropout(n) => n.output,
        }
    }

    pub fn is_dropped(&self) -> bool {
        match self {
            Standard(_) => false,
            Dropout(n) => n.dropped,
        }
    }

    /// Sets the output of this neuron directly, used for input and bias units.
    pub fn feed(&mut self, value: f32) {
        match self {
            Standard(n) => n.output = value,
            Dropout(n) => {
                n.output = value;
                n.dropped = false;
            }
        }
    }

    /// Makes a forward pass through this neuron.
    ///
    /// # Arguments
    /// * `weights` - The weights of the connections coming into this neuron.
    /// * `input` - The outputs of the previous layer.
    /// * `params` - The parameters of this neuron's layer.
    /// * `masks` - The dropout mask source.
    ///
    /// # Returns
    /// The output of this neuron.
    pub fn forward<M>(
        &mut self,
        weights: ArrayView1<f32>,
        input: ArrayView1<f32>,
        params: &LayerParams,
        masks: &mut M,
    ) -> f32
    where
        M: MaskSource + ?Sized,
    {
        match self {
            Standard(n) => {
                n.output = params.squashing.f(weights.dot(&input));
                n.output
            }
            Dropout(n) => {
                let mask = masks.mask();
                if mask == 0. {
                    n.dropped = true;
                    n.output = 0.;
                    return 0.;
                }

                n.dropped = false;
                n.output = params.squashing.f(weights.dot(&input)) * mask;
                n.output
            }
        }
    }

    /// Makes a backward pass through this neuron.
    ///
    /// # Arguments
    /// * `weights` - The weights of the connections going out of this neuron.
    /// * `deltas` - The deltas of the next layer.
    /// * `previous` - The last applied update of the outgoing weights.
    /// * `update` - Where to write the update of the outgoing weights.
    /// * `params` - The parameters of this neuron's layer.
    ///
    /// # Returns
    /// The delta of this neuron.
    pub fn backward(
        &self,
        weights: ArrayView1<f32>,
        deltas: ArrayView1<f32>,
        previous: ArrayView1<f32>,
        update: ArrayViewMut1<f32>,
        params: &LayerParams,
    ) -> f32 {
        let output = match self {
            Standard(n) => n.output,
            Dropout(n) if n.dropped => return 0.,
            Dropout(n) => n.output,
        };

        let local = weights.dot(&deltas);
        let LayerParams {
            squashing,
            learning_rate,
            momentum,
        } = *params;

        Zip::from(update)
            .and(deltas)
            .and(previous)
            .for_each(|u, &d, &p| *u = -learning_rate * d * output + momentum * p);

        local * squashing.df(output)
    }
}
