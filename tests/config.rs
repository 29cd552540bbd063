#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use offload::{
    BackendKind, ConfigError, DependencyManager, RuntimeConfig,
    backend::make_subsystem,
    config::{ENV_BACKEND, ENV_CPU_DEVICES, ENV_WORKERS},
};
use std::collections::HashMap;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|&(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_without_variables() {
    let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, RuntimeConfig::default());
    assert_eq!(config.backend, BackendKind::Cpu);
    assert_eq!(config.worker_threads, 0);
    assert_eq!(config.cpu_devices, 1);
}

#[test]
fn reads_every_variable() {
    let config = RuntimeConfig::from_lookup(lookup(&[
        (ENV_BACKEND, "dev"),
        (ENV_WORKERS, "3"),
        (ENV_CPU_DEVICES, " 4 "),
    ]))
    .unwrap();
    assert_eq!(
        config,
        RuntimeConfig {
            backend: BackendKind::Cpu,
            worker_threads: 3,
            cpu_devices: 4,
        }
    );
}

#[test]
fn backend_names_are_case_insensitive() {
    for (name, kind) in [
        ("CPU", BackendKind::Cpu),
        ("Dev", BackendKind::Cpu),
        ("dev-cuda", BackendKind::Cuda),
        ("CUDA", BackendKind::Cuda),
        ("dev-hip", BackendKind::Hip),
        ("hip", BackendKind::Hip),
        ("IRIS", BackendKind::Iris),
    ] {
        assert_eq!(name.parse::<BackendKind>().unwrap(), kind, "{name}");
    }
    assert_eq!(BackendKind::Hip.to_string(), "hip");
}

#[test]
fn unknown_backend_is_rejected() {
    let err = RuntimeConfig::from_lookup(lookup(&[(ENV_BACKEND, "opencl")])).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownBackend(ref name) if name == "opencl"));
    assert_eq!(err.to_string(), "unknown backend `opencl`");
}

#[test]
fn malformed_number_is_rejected() {
    let err = RuntimeConfig::from_lookup(lookup(&[(ENV_WORKERS, "many")])).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidValue { key, ref value } if key == ENV_WORKERS && value == "many"
    ));
}

#[test]
fn device_backends_are_unavailable() {
    for backend in [BackendKind::Cuda, BackendKind::Hip, BackendKind::Iris] {
        let config = RuntimeConfig {
            backend,
            ..RuntimeConfig::default()
        };
        let err = make_subsystem(&config).unwrap_err();
        assert!(matches!(err, ConfigError::BackendUnavailable(b) if b == backend));
        common::init_tracing();
        assert!(DependencyManager::from_config(&config).is_err());
    }
}

#[test]
fn cpu_backend_builds() {
    let config = RuntimeConfig {
        cpu_devices: 2,
        ..RuntimeConfig::default()
    };
    let subsystem = make_subsystem(&config).unwrap();
    assert_eq!(subsystem.host_memory_domain(), offload::HOST_DOMAIN);
    assert_eq!(subsystem.platforms()[0].devices().len(), 2);
    subsystem.shutdown();
}
