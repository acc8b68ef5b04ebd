//! Tests for configuration validation

use prometheus_task_scheduler::config::{SchedulerConfig, StoreBackendConfig};

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.max_retries_ceiling, 10);
    assert_eq!(cfg.default_max_retries, 3);
    assert_eq!(cfg.watchdog_interval_ms, 60_000);
    assert_eq!(cfg.default_backoff_delay_ms, 30_000);
    assert!(!cfg.encrypt_payloads);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_default_retries_above_ceiling_is_invalid() {
    let cfg = SchedulerConfig {
        max_retries_ceiling: 2,
        default_max_retries: 3,
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("default_max_retries"), "{err}");
}

#[test]
fn test_zero_backoff_ceiling_is_invalid() {
    let cfg = SchedulerConfig {
        max_backoff_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_non_positive_multiplier_is_invalid() {
    for multiplier in [0.0, -1.5, f64::NAN, f64::INFINITY] {
        let cfg = SchedulerConfig {
            default_backoff_multiplier: multiplier,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err(), "{multiplier} accepted");
    }
}

#[test]
fn test_empty_file_store_path_is_invalid() {
    let cfg = SchedulerConfig {
        store: StoreBackendConfig::File { path: "".into() },
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_partial_uses_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "watchdog_interval_ms": 15000,
            "store": { "kind": "file", "path": "/data/tasks" }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.watchdog_interval_ms, 15_000);
    assert_eq!(cfg.max_retries_ceiling, 10);
    assert_eq!(
        cfg.store,
        StoreBackendConfig::File {
            path: "/data/tasks".into()
        }
    );
}

#[test]
fn test_from_json_rejects_invalid_values() {
    let err = SchedulerConfig::from_json_str(r#"{"max_retries_ceiling": 1}"#).unwrap_err();
    assert!(err.contains("exceeds"), "{err}");

    let err = SchedulerConfig::from_json_str("{not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

#[test]
fn test_config_serializes_store_kind() {
    let json = serde_json::to_value(SchedulerConfig::default()).unwrap();
    assert_eq!(json["store"]["kind"], "in_memory");
}

#[test]
fn test_from_lookup_without_variables_is_default() {
    let cfg = SchedulerConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, SchedulerConfig::default());
}

#[test]
fn test_from_lookup_validates_result() {
    let err = SchedulerConfig::from_lookup(|key| match key {
        "TASK_SCHEDULER_MAX_RETRIES_CEILING" => Some("1".into()),
        "TASK_SCHEDULER_DEFAULT_MAX_RETRIES" => Some("4".into()),
        _ => None,
    })
    .unwrap_err();
    assert!(err.contains("max_retries_ceiling"), "{err}");
}
