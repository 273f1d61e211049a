use comms::specs::machine_learning::{NetworkSpec, NeuronSpec};
use ndarray::{Array1, Array2, s};

use super::{
    CostFn, Squashing,
    neuron::{Bernoulli, Inference, LayerParams, MaskSource, Neuron},
};
use crate::{MlErr, Result, matrices};

/// A layer of neurons, the bias unit (if any) is the first neuron of every non-output layer.
#[derive(Debug, Clone)]
struct Layer {
    neurons: Vec<Neuron>,
    params: LayerParams,
}

impl Layer {
    fn outputs(&self) -> Array1<f32> {
        self.neurons.iter().map(Neuron::output).collect()
    }
}

/// A fully connected feed-forward network.
///
/// Weight matrix `i` has shape `(size(layer i+1), size(layer i) + bias)`, when the network has bias
/// units column 0 of every matrix holds the bias weights.
#[derive(Debug, Clone)]
pub struct LayeredNetwork {
    spec: NetworkSpec,
    layers: Vec<Layer>,
    weights: Vec<Array2<f32>>,
    previous: Vec<Array2<f32>>,
    cost: CostFn,
    bias: usize,
    masks: Bernoulli,
}

/// Checks that a spec describes a network that can be built and trained.
pub fn check_spec(spec: &NetworkSpec) -> Result<()> {
    if spec.layers.len() < 2 {
        return Err(MlErr::InvalidSpec(format!(
            "a network needs at least 2 layers, got {}",
            spec.layers.len()
        )));
    }

    if let Some(i) = spec.layers.iter().position(|layer| layer.size == 0) {
        return Err(MlErr::InvalidSpec(format!("layer {i} is empty")));
    }

    if !(spec.learning_rate.is_finite() && spec.learning_rate > 0.) {
        return Err(MlErr::InvalidSpec(format!(
            "learning rate must be positive, got {}",
            spec.learning_rate
        )));
    }

    if !spec.momentum.is_finite() || !(spec.regularization.is_finite() && spec.regularization >= 0.)
    {
        return Err(MlErr::InvalidSpec(
            "momentum and regularization must be finite, regularization non negative".into(),
        ));
    }

    Ok(())
}

impl LayeredNetwork {
    /// Creates a new `LayeredNetwork` with zeroed previous updates.
    ///
    /// # Arguments
    /// * `spec` - The architecture of the network.
    /// * `weights` - The initial weights, one matrix per layer transition.
    /// * `seed` - The seed for the dropout masks, entropy from the os if `None`.
    ///
    /// # Returns
    /// The new network or an error if the spec is invalid or the weights don't fit it.
    pub fn new(spec: NetworkSpec, weights: Vec<Array2<f32>>, seed: Option<u64>) -> Result<Self> {
        check_spec(&spec)?;
        let dims = spec.matrix_dims();
        matrices::check_shapes(&weights, &dims)?;

        let bias = spec.bias as usize;
        let last = spec.layers.len() - 1;

        let layers = spec
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let params = LayerParams {
                    squashing: if i == 0 {
                        Squashing::Identity
                    } else {
                        layer.squashing.into()
                    },
                    learning_rate: spec.learning_rate,
                    momentum: spec.momentum,
                };

                let mut neurons = Vec::with_capacity(layer.size + bias);
                if i != last && bias == 1 {
                    let mut unit = Neuron::standard();
                    unit.feed(1.);
                    neurons.push(unit);
                }

                neurons.extend((0..layer.size).map(|_| match layer.neuron {
                    NeuronSpec::Dropout if i != 0 => Neuron::dropout(),
                    _ => Neuron::standard(),
                }));

                Layer { neurons, params }
            })
            .collect();

        Ok(Self {
            cost: spec.cost.into(),
            previous: matrices::zeros(&dims),
            spec,
            layers,
            weights,
            bias,
            masks: Bernoulli::new(seed),
        })
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    pub fn weights(&self) -> &[Array2<f32>] {
        &self.weights
    }

    pub fn previous(&self) -> &[Array2<f32>] {
        &self.previous
    }

    /// Replaces the weights of the network, the shapes must not change.
    pub fn set_weights(&mut self, weights: Vec<Array2<f32>>) -> Result<()> {
        matrices::check_shapes(&weights, &matrices::shapes(&self.weights))?;
        self.weights = weights;
        Ok(())
    }

    /// Replaces the last applied updates used for the momentum term, the shapes must not change.
    pub fn set_previous(&mut self, previous: Vec<Array2<f32>>) -> Result<()> {
        matrices::check_shapes(&previous, &matrices::shapes(&self.previous))?;
        self.previous = previous;
        Ok(())
    }

    /// Computes the weight updates for a single training instance without applying them.
    ///
    /// # Arguments
    /// * `instance` - The input features followed by the expected labels.
    ///
    /// # Returns
    /// The update of every weight matrix and the training error of the instance.
    pub fn train_by_instance(&mut self, instance: &[f32]) -> Result<(Vec<Array2<f32>>, f32)> {
        let (input_size, output_size) = (self.spec.input_size(), self.spec.output_size());
        if instance.len() != input_size + output_size {
            return Err(MlErr::SizeMismatch {
                what: "instance",
                got: instance.len(),
                expected: input_size + output_size,
            });
        }

        let (features, labels) = instance.split_at(input_size);
        forward(
            &mut self.layers,
            &self.weights,
            self.bias,
            features,
            &mut self.masks,
        );

        let Some(output) = self.layers.last() else {
            return Ok((matrices::zeros(&self.spec.matrix_dims()), 0.));
        };

        let squashing = output.params.squashing;
        let mut error = 0.;
        let mut deltas: Array1<f32> = output
            .neurons
            .iter()
            .zip(labels)
            .map(|(neuron, &y)| {
                let o = neuron.output();
                error += self.cost.cost(y, o);

                if neuron.is_dropped() {
                    0.
                } else {
                    self.cost.derivative(y, o) * squashing.df(o)
                }
            })
            .collect();

        let mut updates = matrices::zeros(&matrices::shapes(&self.weights));
        let rate = self.spec.learning_rate * self.spec.regularization;

        for l in (0..self.weights.len()).rev() {
            let layer = &self.layers[l];
            let weights = &self.weights[l];
            let update = &mut updates[l];

            let back: Array1<f32> = layer
                .neurons
                .iter()
                .enumerate()
                .map(|(j, neuron)| {
                    neuron.backward(
                        weights.column(j),
                        deltas.view(),
                        self.previous[l].column(j),
                        update.column_mut(j),
                        &layer.params,
                    )
                })
                .collect();

            if rate != 0. {
                for (j, neuron) in layer.neurons.iter().enumerate().skip(self.bias) {
                    if !neuron.is_dropped() {
                        update
                            .column_mut(j)
                            .zip_mut_with(&weights.column(j), |u, &w| *u -= rate * w);
                    }
                }
            }

            deltas = back.slice(s![self.bias..]).to_owned();
        }

        Ok((updates, error))
    }

    /// Computes the output of the network for the given features, dropout neurons scale their
    /// output by the inference mask.
    pub fn predict(&mut self, features: &[f32]) -> Result<Array1<f32>> {
        let input_size = self.spec.input_size();
        if features.len() != input_size {
            return Err(MlErr::SizeMismatch {
                what: "features",
                got: features.len(),
                expected: input_size,
            });
        }

        forward(
            &mut self.layers,
            &self.weights,
            self.bias,
            features,
            &mut Inference,
        );

        Ok(self.layers.last().map(Layer::outputs).unwrap_or_default())
    }
}

fn forward<M>(
    layers: &mut [Layer],
    weights: &[Array2<f32>],
    bias: usize,
    features: &[f32],
    masks: &mut M,
) where
    M: MaskSource + ?Sized,
{
    let Some((first, rest)) = layers.split_first_mut() else {
        return;
    };

    for (neuron, &x) in first.neurons.iter_mut().skip(bias).zip(features) {
        neuron.feed(x);
    }

    let mut input = first.outputs();
    let last = rest.len();

    for (i, (layer, w)) in rest.iter_mut().zip(weights).enumerate() {
        let skip = if i + 1 == last { 0 } else { bias };
        let Layer { neurons, params } = layer;

        for (k, neuron) in neurons.iter_mut().skip(skip).enumerate() {
            neuron.forward(w.row(k), input.view(), params, masks);
        }

        input = layer.outputs();
    }
}
