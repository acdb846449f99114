use super::*;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

fn clear_env() {
    for key in [
        "CODERUN_IMAGE",
        "CODERUN_TIMEOUT_SECS",
        "CODERUN_MEMORY_MB",
        "CODERUN_CPUS",
        "CODERUN_NETWORK",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_empty_document_yields_reference_configuration() {
    clear_env();
    let config = ConfigLoader::from_str("").unwrap();

    assert_eq!(config.runtime.image, "python:3.11-slim");
    assert_eq!(config.runtime.interpreter, vec!["python".to_string()]);
    assert_eq!(config.runtime.source_filename, "main.py");
    assert_eq!(config.runtime.mount_point, "/app");
    assert_eq!(config.limits.cpus, 0.5);
    assert_eq!(config.limits.memory_mb, 128);
    assert_eq!(config.limits.timeout_secs, 10);
    assert_eq!(config.limits.output_limit_kb, 1024);
    assert_eq!(config.engine.watchdog_grace_secs, 5);
    assert_eq!(config.network, NetworkPolicy::Disabled);
}

#[test]
#[serial]
fn test_partial_yaml_keeps_defaults() {
    clear_env();
    let yaml = r#"
runtime:
  image: python:3.12-alpine
limits:
  memory_mb: 256
network: bridge
"#;
    let config = ConfigLoader::from_str(yaml).unwrap();

    assert_eq!(config.runtime.image, "python:3.12-alpine");
    assert_eq!(config.runtime.source_filename, "main.py");
    assert_eq!(config.limits.memory_mb, 256);
    assert_eq!(config.limits.timeout_secs, 10);
    assert_eq!(config.network, NetworkPolicy::Bridge);
}

#[test]
#[serial]
fn test_network_none_alias() {
    clear_env();
    let config = ConfigLoader::from_str("network: none").unwrap();
    assert_eq!(config.network, NetworkPolicy::Disabled);
}

#[test]
#[serial]
fn test_environment_overrides_file_values() {
    clear_env();
    env::set_var("CODERUN_IMAGE", "python:3.10-slim");
    env::set_var("CODERUN_TIMEOUT_SECS", "3");
    env::set_var("CODERUN_NETWORK", "none");

    let config = ConfigLoader::from_str("network: bridge\nlimits:\n  timeout_secs: 30\n");
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.runtime.image, "python:3.10-slim");
    assert_eq!(config.limits.timeout_secs, 3);
    assert_eq!(config.network, NetworkPolicy::Disabled);
}

#[test]
#[serial]
fn test_invalid_environment_value_is_config_error() {
    clear_env();
    env::set_var("CODERUN_MEMORY_MB", "lots");
    let result = ConfigLoader::from_str("");
    clear_env();

    assert!(matches!(result, Err(SandboxError::Config(_))));
}

#[test]
#[serial]
fn test_validation_rejects_bad_values() {
    clear_env();
    let cases = [
        "runtime:\n  image: ''\n",
        "runtime:\n  interpreter: []\n",
        "runtime:\n  source_filename: ../evil.py\n",
        "runtime:\n  source_filename: '.'\n",
        "runtime:\n  source_filename: '..'\n",
        "runtime:\n  mount_point: app\n",
        "limits:\n  cpus: 0\n",
        "limits:\n  memory_mb: 0\n",
        "limits:\n  timeout_secs: 0\n",
        "limits:\n  output_limit_kb: 0\n",
    ];

    for yaml in cases {
        let result = ConfigLoader::from_str(yaml);
        assert!(
            matches!(result, Err(SandboxError::Config(_))),
            "expected config error for {:?}",
            yaml
        );
    }
}

#[tokio::test]
#[serial]
async fn test_load_from_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "limits:\n  cpus: 1.5\n  timeout_secs: 20").unwrap();

    let config = load_config(file.path()).await.unwrap();
    assert_eq!(config.limits.cpus, 1.5);
    assert_eq!(config.limits.timeout_secs, 20);
}

#[tokio::test]
#[serial]
async fn test_missing_optional_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigLoader::from_optional_file(dir.path().join("absent.yaml"))
        .await
        .unwrap();
    assert_eq!(config, SandboxConfig::default());
}

#[tokio::test]
async fn test_missing_required_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_config(dir.path().join("absent.yaml")).await;
    assert!(matches!(result, Err(SandboxError::Config(_))));
}

#[test]
fn test_limit_unit_conversions() {
    let limits = ResourceLimits::default();
    assert_eq!(limits.nano_cpus(), 500_000_000);
    assert_eq!(limits.memory_bytes(), 128 * 1024 * 1024);
    assert_eq!(limits.timeout(), std::time::Duration::from_secs(10));
}

#[test]
fn test_overrides_only_tighten() {
    let limits = ResourceLimits::default();

    let tighter = limits.merge(&ResourceOverrides {
        cpus: Some(0.25),
        memory_mb: Some(64),
        timeout_secs: Some(2),
    });
    assert_eq!(tighter.cpus, 0.25);
    assert_eq!(tighter.memory_mb, 64);
    assert_eq!(tighter.timeout_secs, 2);

    let looser = limits.merge(&ResourceOverrides {
        cpus: Some(4.0),
        memory_mb: Some(4096),
        timeout_secs: Some(600),
    });
    assert_eq!(looser, limits);

    let zeroed = limits.merge(&ResourceOverrides {
        cpus: Some(0.0),
        memory_mb: Some(0),
        timeout_secs: Some(0),
    });
    assert_eq!(zeroed, limits);
}
