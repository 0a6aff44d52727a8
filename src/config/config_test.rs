use std::time::Duration;

use serial_test::serial;
use temp_env::with_vars;

use super::*;

fn cleanup_all_micro_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("MICRO_") || key == "CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

fn write_settings_file(body: &str) -> (tempfile::TempDir, String) {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("service.conf");
    std::fs::write(&path, body).unwrap();
    let path = path.to_str().unwrap().to_string();
    (temp_dir, path)
}

#[test]
fn default_settings_should_initialize_with_hardcoded_values() {
    let settings = Settings::default();

    assert_eq!(settings.service_root, "/service");
    assert_eq!(settings.discovery_mode, BackendKind::Etcd);
    assert_eq!(settings.sync.signal_buffer_size, 64);
    assert_eq!(settings.sync.connect_timeout_ms, 10_000);
    assert_eq!(settings.sync.globals_node, "globals");
    assert_eq!(settings.reconnect.max_retries, 10);
    assert!(!settings.remote_enabled());
}

#[test]
#[serial]
fn load_should_read_json_service_file() {
    cleanup_all_micro_env_vars();
    let (_dir, path) = write_settings_file(
        r#"{
            "ServiceName": "billing",
            "ServiceRoot": "/apps",
            "ConfigHosts": ["10.0.0.1:2181", "10.0.0.2:2181"],
            "ConfigData": { "dbhost": "localhost" },
            "discovery_mode": "zk"
        }"#,
    );

    let settings = Settings::load(Some(&path)).unwrap();

    assert_eq!(settings.service_name, "billing");
    assert_eq!(settings.service_root, "/apps");
    assert_eq!(settings.config_hosts.len(), 2);
    assert_eq!(settings.discovery_mode, BackendKind::Zk);
    assert_eq!(settings.config_data.get("dbhost").map(String::as_str), Some("localhost"));
    assert_eq!(settings.service_path(), "/apps/billing");
    assert!(settings.remote_enabled());
}

#[test]
#[serial]
fn environment_variables_should_have_highest_priority() {
    cleanup_all_micro_env_vars();
    let (_dir, path) = write_settings_file(
        r#"{ "ServiceName": "billing", "ConfigHosts": ["10.0.0.1:2379"] }"#,
    );

    with_vars(
        vec![
            ("MICRO_SERVICENAME", Some("payments")),
            ("MICRO_CONFIGHOSTS", Some("h1:2181,h2:2181,h3:2181")),
            ("MICRO_DISCOVERY_MODE", Some("zk")),
        ],
        || {
            let settings = Settings::load(Some(&path)).unwrap();

            assert_eq!(settings.service_name, "payments");
            assert_eq!(
                settings.config_hosts,
                vec!["h1:2181".to_string(), "h2:2181".to_string(), "h3:2181".to_string()]
            );
            assert_eq!(settings.discovery_mode, BackendKind::Zk);
        },
    );
}

#[test]
#[serial]
fn nested_environment_overrides_should_reach_sync_settings() {
    cleanup_all_micro_env_vars();
    with_vars(
        vec![
            ("MICRO_SERVICENAME", Some("billing")),
            ("MICRO_SYNC__SIGNAL_BUFFER_SIZE", Some("128")),
            ("MICRO_RECONNECT__MAX_RETRIES", Some("3")),
        ],
        || {
            let settings = Settings::load(None).unwrap();

            assert_eq!(settings.sync.signal_buffer_size, 128);
            assert_eq!(settings.reconnect.max_retries, 3);
        },
    );
}

#[test]
#[serial]
fn load_should_fail_without_service_name() {
    cleanup_all_micro_env_vars();
    let (_dir, path) = write_settings_file(r#"{ "ConfigHosts": ["10.0.0.1:2379"] }"#);

    let result = Settings::load(Some(&path));

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
#[serial]
fn load_should_fail_when_explicit_file_is_missing() {
    cleanup_all_micro_env_vars();
    let result = Settings::load(Some("/nonexistent/dir/service.conf"));

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn validation_should_reject_zero_signal_buffer() {
    let mut settings = Settings {
        service_name: "billing".into(),
        ..Default::default()
    };
    assert!(settings.validate().is_ok());

    settings.sync.signal_buffer_size = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn validation_should_reject_nested_service_name_and_relative_root() {
    let mut settings = Settings {
        service_name: "a/b".into(),
        ..Default::default()
    };
    assert!(settings.validate().is_err());

    settings.service_name = "billing".into();
    settings.service_root = "service".into();
    assert!(settings.validate().is_err());
}

#[test]
fn sync_paths_should_place_globals_next_to_service_node() {
    let settings = Settings {
        service_name: "billing".into(),
        service_root: "/service/".into(),
        ..Default::default()
    };

    let paths = settings.sync_paths();

    assert_eq!(paths.service(), "/service/billing");
    assert_eq!(paths.globals(), "/service/globals");
}

#[test]
fn backoff_delay_should_double_and_cap() {
    let policy = BackoffPolicy {
        max_retries: 5,
        timeout_ms: 100,
        base_delay_ms: 50,
        max_delay_ms: 300,
    };

    assert_eq!(policy.delay_for(1), Duration::from_millis(50));
    assert_eq!(policy.delay_for(2), Duration::from_millis(100));
    assert_eq!(policy.delay_for(3), Duration::from_millis(200));
    assert_eq!(policy.delay_for(4), Duration::from_millis(300));
    assert_eq!(policy.delay_for(60), Duration::from_millis(300));
}

#[test]
fn backoff_validation_should_reject_inverted_delays() {
    let policy = BackoffPolicy {
        max_retries: 1,
        timeout_ms: 100,
        base_delay_ms: 500,
        max_delay_ms: 100,
    };

    assert!(policy.validate().is_err());
}

#[test]
#[serial]
fn discovery_mode_should_default_to_etcd_and_accept_zookeeper_aliases() {
    temp_env::with_var_unset("MICRO_DISCOVERY_MODE", || {
        assert_eq!(BackendKind::from_env(), BackendKind::Etcd);
    });
    temp_env::with_var("MICRO_DISCOVERY_MODE", Some("ZooKeeper"), || {
        assert_eq!(BackendKind::from_env(), BackendKind::Zk);
    });
    temp_env::with_var("MICRO_DISCOVERY_MODE", Some("consul"), || {
        assert_eq!(BackendKind::from_env(), BackendKind::Etcd);
    });
    assert!("consul".parse::<BackendKind>().is_err());
}
