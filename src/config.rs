use core::{fmt, str::FromStr};
use std::env;
use thiserror::Error;

/// Environment variable selecting the backend.
pub const ENV_BACKEND: &str = "OFFLOAD_RTS";
/// Environment variable selecting the worker pool size. `0` means rayon's
/// default.
pub const ENV_WORKERS: &str = "OFFLOAD_WORKERS";
/// Environment variable selecting how many devices the CPU backend simulates.
pub const ENV_CPU_DEVICES: &str = "OFFLOAD_CPU_DEVICES";

/// Error returned when the runtime cannot be configured.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The backend name is not recognised.
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
    /// The backend is recognised but not compiled into this build.
    #[error("backend `{0}` is not available in this build")]
    BackendUnavailable(BackendKind),
    /// A numeric setting could not be parsed.
    #[error("invalid value `{value}` for {key}")]
    InvalidValue {
        /// Setting name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Device runtime implementation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Host threads simulating accelerator devices.
    #[default]
    Cpu,
    /// NVIDIA CUDA driver.
    Cuda,
    /// AMD HIP driver.
    Hip,
    /// IRIS multi-device scheduler.
    Iris,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" | "dev" => Ok(Self::Cpu),
            "cuda" | "dev-cuda" => Ok(Self::Cuda),
            "hip" | "dev-hip" => Ok(Self::Hip),
            "iris" => Ok(Self::Iris),
            _ => Err(ConfigError::UnknownBackend(s.to_owned())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Hip => "hip",
            Self::Iris => "iris",
        })
    }
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Backend to instantiate.
    pub backend: BackendKind,
    /// Worker pool size; `0` lets rayon decide.
    pub worker_threads: usize,
    /// Number of devices simulated by the CPU backend.
    pub cpu_devices: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpu,
            worker_threads: 0,
            cpu_devices: 1,
        }
    }
}

impl RuntimeConfig {
    /// Read settings from the process environment.
    ///
    /// # Errors
    /// If a variable holds an unknown backend name or a malformed number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Missing keys keep their
    /// defaults.
    ///
    /// # Errors
    /// If a value holds an unknown backend name or a malformed number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(backend) = lookup(ENV_BACKEND) {
            config.backend = backend.parse()?;
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            config.worker_threads = parse_count(ENV_WORKERS, &workers)?;
        }
        if let Some(devices) = lookup(ENV_CPU_DEVICES) {
            config.cpu_devices = parse_count(ENV_CPU_DEVICES, &devices)?;
        }
        Ok(config)
    }
}

fn parse_count(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
        })
}
