use std::{
    fs, io,
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::machine_learning::NetworkSpec;

const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(50).expect("non zero");
const DEFAULT_MAX_ITERATIONS: NonZeroU64 = NonZeroU64::new(100_000).expect("non zero");
const DEFAULT_CHECK_INTERVAL: NonZeroU64 = NonZeroU64::new(2_000).expect("non zero");
const DEFAULT_PORT: u16 = 40089;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_CONNECT_RETRIES: usize = 10;
const DEFAULT_CONNECT_RETRY_INTERVAL_MS: u64 = 1_000;
const DEFAULT_WORKERS: usize = 3;

/// The configuration of a training job.
///
/// It's read from a flat JSON object whose keys are the dotted configuration names, every key
/// but `model.path` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(rename = "model.path")]
    pub model_path: PathBuf,
    #[serde(rename = "model.spec", default)]
    pub model_spec: Option<NetworkSpec>,
    #[serde(rename = "training.input.path", default)]
    pub input_path: Option<PathBuf>,
    #[serde(rename = "training.batch.size", default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    #[serde(rename = "training.max.iterations", default = "default_max_iterations")]
    pub max_iterations: NonZeroU64,
    #[serde(rename = "training.seed", default)]
    pub seed: Option<u64>,
    #[serde(rename = "convergence.check.interval", default = "default_check_interval")]
    pub convergence_check_interval: NonZeroU64,
    #[serde(rename = "convergence.error.threshold", default)]
    pub convergence_error_threshold: f64,
    #[serde(rename = "sync.server.host", default = "default_host")]
    pub server_host: String,
    #[serde(rename = "sync.server.port", default = "default_port")]
    pub server_port: u16,
    #[serde(rename = "sync.server.handlers", default)]
    pub server_handlers: Option<NonZeroUsize>,
    #[serde(rename = "sync.connect.max.retries", default = "default_connect_retries")]
    pub connect_max_retries: usize,
    #[serde(
        rename = "sync.connect.retry.interval.ms",
        default = "default_connect_retry_interval_ms"
    )]
    pub connect_retry_interval_ms: u64,
    #[serde(rename = "cluster.workers", default = "default_workers")]
    pub workers: usize,
}

impl JobConfig {
    /// Creates a new `JobConfig` with every optional key set to its default.
    ///
    /// # Arguments
    /// * `model_path` - Where the model is loaded from and persisted to.
    ///
    /// # Returns
    /// A new `JobConfig` instance.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            model_spec: None,
            input_path: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
            convergence_check_interval: DEFAULT_CHECK_INTERVAL,
            convergence_error_threshold: 0.,
            server_host: default_host(),
            server_port: DEFAULT_PORT,
            server_handlers: None,
            connect_max_retries: DEFAULT_CONNECT_RETRIES,
            connect_retry_interval_ms: DEFAULT_CONNECT_RETRY_INTERVAL_MS,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Reads a `JobConfig` from a JSON file.
    ///
    /// # Arguments
    /// * `path` - The location of the file.
    ///
    /// # Returns
    /// The parsed configuration or an io error if the file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        serde_json::from_str(&content).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid job config at {}: {e}", path.display()),
            )
        })
    }

    /// The amount of merges between convergence evaluations, scaled by the amount of peers.
    ///
    /// # Arguments
    /// * `peers` - The total amount of workers of the job, master included.
    pub fn effective_check_interval(&self, peers: usize) -> u64 {
        self.convergence_check_interval
            .get()
            .saturating_mul(peers.max(1) as u64)
    }
}

fn default_batch_size() -> NonZeroUsize {
    DEFAULT_BATCH_SIZE
}

fn default_max_iterations() -> NonZeroU64 {
    DEFAULT_MAX_ITERATIONS
}

fn default_check_interval() -> NonZeroU64 {
    DEFAULT_CHECK_INTERVAL
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_retries() -> usize {
    DEFAULT_CONNECT_RETRIES
}

fn default_connect_retry_interval_ms() -> u64 {
    DEFAULT_CONNECT_RETRY_INTERVAL_MS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_model_path_is_required() {
        let config: JobConfig = serde_json::from_str(r#"{ "model.path": "model.json" }"#).unwrap();

        assert_eq!(config.model_path, PathBuf::from("model.json"));
        assert_eq!(config.batch_size.get(), 50);
        assert_eq!(config.max_iterations.get(), 100_000);
        assert_eq!(config.server_port, 40089);
        assert_eq!(config.effective_check_interval(3), 6_000);
        assert!(config.model_spec.is_none());
    }

    #[test]
    fn dotted_keys_override_defaults() {
        let config: JobConfig = serde_json::from_str(
            r#"{
                "model.path": "m.json",
                "training.batch.size": 1,
                "training.max.iterations": 8,
                "convergence.check.interval": 4,
                "sync.server.port": 5000,
                "model.spec": { "layers": [{ "size": 1 }, { "size": 1 }], "learning_rate": 0.5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch_size.get(), 1);
        assert_eq!(config.max_iterations.get(), 8);
        assert_eq!(config.effective_check_interval(2), 8);
        assert_eq!(config.server_port, 5000);
        assert_eq!(config.model_spec.unwrap().learning_rate, 0.5);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let res: Result<JobConfig, _> =
            serde_json::from_str(r#"{ "model.path": "m.json", "training.batch.size": 0 }"#);
        assert!(res.is_err());
    }
}
