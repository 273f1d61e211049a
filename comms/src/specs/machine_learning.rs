use serde::{Deserialize, Serialize};

/// The specification for the `Squashing` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SquashingSpec {
    #[default]
    Sigmoid,
    Tanh,
    Identity,
    Relu,
}

/// The specification for the `Neuron` variants of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronSpec {
    #[default]
    Standard,
    Dropout,
}

/// The specification for a single layer of the network.
///
/// The neuron kind and squashing function of the input layer are ignored, its units pass their
/// input through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    #[serde(default)]
    pub neuron: NeuronSpec,
    #[serde(default)]
    pub squashing: SquashingSpec,
}

/// The specification for the `CostFn` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSpec {
    #[default]
    SquaredError,
    CrossEntropy,
}

/// The specification for a `LayeredNetwork`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub cost: CostSpec,
    pub learning_rate: f32,
    #[serde(default)]
    pub momentum: f32,
    #[serde(default)]
    pub regularization: f32,
    #[serde(default = "default_bias")]
    pub bias: bool,
}

fn default_bias() -> bool {
    true
}

impl NetworkSpec {
    /// The amount of input features of an instance.
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.size)
    }

    /// The amount of labels of an instance.
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.size)
    }

    /// The shape of every weight matrix, one per layer transition.
    pub fn matrix_dims(&self) -> Vec<(usize, usize)> {
        let bias = self.bias as usize;

        self.layers
            .windows(2)
            .map(|pair| (pair[1].size, pair[0].size + bias))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_filled_in() {
        let spec: NetworkSpec = serde_json::from_str(
            r#"{
                "layers": [{ "size": 3 }, { "size": 2, "neuron": "dropout", "squashing": "tanh" }, { "size": 1 }],
                "learning_rate": 0.1
            }"#,
        )
        .unwrap();

        assert!(spec.bias);
        assert_eq!(spec.cost, CostSpec::SquaredError);
        assert_eq!(spec.layers[1].neuron, NeuronSpec::Dropout);
        assert_eq!(spec.layers[2].squashing, SquashingSpec::Sigmoid);
        assert_eq!(spec.matrix_dims(), vec![(2, 4), (1, 3)]);
        assert_eq!((spec.input_size(), spec.output_size()), (3, 1));
    }
}
