use std::{
    fs,
    path::{Path, PathBuf},
};

use comms::specs::machine_learning::NetworkSpec;
use log::{debug, info};
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    arch::{LayeredNetwork, check_spec},
    matrices,
};

#[derive(Serialize, Deserialize)]
struct ModelFile {
    spec: NetworkSpec,
    weights: Vec<Array2<f32>>,
}

/// A trained (or about to be trained) network as stored on disk: its architecture and weights.
#[derive(Debug, Clone)]
pub struct Model {
    path: PathBuf,
    spec: NetworkSpec,
    weights: Vec<Array2<f32>>,
}

impl Model {
    /// Loads a model from a JSON model file.
    ///
    /// # Arguments
    /// * `path` - The location of the model file.
    ///
    /// # Returns
    /// The model or an error if the file can't be read or doesn't hold a valid model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read(path)?;
        let ModelFile { spec, weights } = serde_json::from_slice(&content)
            .map_err(|e| MlErr::InvalidModel(format!("{}: {e}", path.display())))?;

        check_spec(&spec)?;
        matrices::check_shapes(&weights, &spec.matrix_dims())?;
        debug!("loaded model from {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            weights,
        })
    }

    /// Loads the model at `path` if it exists, otherwise initializes a new one.
    ///
    /// # Arguments
    /// * `path` - The location of the model file, also where it will be persisted.
    /// * `spec` - The architecture to use when there is no model file yet.
    /// * `seed` - The seed for the initial weights, entropy from the os if `None`.
    ///
    /// # Returns
    /// The model or an error if neither loading nor initializing is possible.
    pub fn load_or_init<P: AsRef<Path>>(
        path: P,
        spec: Option<&NetworkSpec>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let Some(spec) = spec else {
            return Err(MlErr::InvalidModel(format!(
                "{} does not exist and no network spec was given",
                path.display()
            )));
        };

        check_spec(spec)?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!("no model at {}, initializing a new one", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            spec: spec.clone(),
            weights: matrices::random(&spec.matrix_dims(), &mut rng),
        })
    }

    /// Writes the model to its path as JSON, creating the parent directories if needed.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = ModelFile {
            spec: self.spec.clone(),
            weights: self.weights.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)
            .map_err(|e| MlErr::InvalidModel(format!("serializing model: {e}")))?;

        fs::write(&self.path, content)?;
        info!("model persisted to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    pub fn weights(&self) -> &[Array2<f32>] {
        &self.weights
    }

    /// Replaces the weights of the model, the shapes must match its spec.
    pub fn set_weights(&mut self, weights: Vec<Array2<f32>>) -> Result<()> {
        matrices::check_shapes(&weights, &self.spec.matrix_dims())?;
        self.weights = weights;
        Ok(())
    }

    /// Builds a trainable network holding a copy of this model's weights.
    ///
    /// # Arguments
    /// * `seed` - The seed for the network's dropout masks.
    pub fn network(&self, seed: Option<u64>) -> Result<LayeredNetwork> {
        LayeredNetwork::new(self.spec.clone(), self.weights.clone(), seed)
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::machine_learning::{LayerSpec, NeuronSpec, SquashingSpec};

    use super::*;

    fn spec() -> NetworkSpec {
        let layer = |size| LayerSpec {
            size,
            neuron: NeuronSpec::Standard,
            squashing: SquashingSpec::Sigmoid,
        };

        NetworkSpec {
            layers: vec![layer(2), layer(3), layer(1)],
            cost: Default::default(),
            learning_rate: 0.1,
            momentum: 0.,
            regularization: 0.,
            bias: true,
        }
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ml-store-{}-{name}", std::process::id()))
            .join("model.json")
    }

    #[test]
    fn init_persist_and_load_back() {
        let path = scratch("roundtrip");
        let _ = fs::remove_file(&path);

        let model = Model::load_or_init(&path, Some(&spec()), Some(1)).unwrap();
        assert_eq!(matrices::shapes(model.weights()), vec![(3, 3), (1, 4)]);
        model.persist().unwrap();

        let loaded = Model::load_or_init(&path, None, None).unwrap();
        assert_eq!(loaded.spec(), model.spec());
        assert_eq!(loaded.weights(), model.weights());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_without_spec_is_an_error() {
        let path = scratch("missing");
        assert!(matches!(
            Model::load_or_init(&path, None, None),
            Err(MlErr::InvalidModel(_))
        ));
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let path = scratch("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(Model::load(&path), Err(MlErr::InvalidModel(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn set_weights_checks_shapes() {
        let mut model = Model::load_or_init(scratch("shapes"), Some(&spec()), Some(2)).unwrap();
        assert!(model.set_weights(vec![Array2::zeros((3, 3))]).is_err());
        assert!(
            model
                .set_weights(vec![Array2::zeros((3, 3)), Array2::zeros((1, 4))])
                .is_ok()
        );
        assert!(model.network(None).is_ok());
    }
}
