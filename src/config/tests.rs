use super::load_config;
use super::settings::Settings;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.publish_port, 8081);
    assert_eq!(settings.log.capacity, 1000);
    assert_eq!(settings.log.poll_interval_ms, 100);
    assert_eq!(settings.broker.retry_max_ms, 5000);
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [log]
        capacity = 50
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.publish_port, 8081);
    assert_eq!(cfg.log.capacity, 50);
    assert_eq!(cfg.log.path, "tailsub_log");
}

#[test]
#[serial]
fn load_config_from_env_overrides_defaults() {
    temp_env::with_vars(
        [
            ("TAILSUB__LOG__PATH", Some("/tmp/shared_log")),
            ("TAILSUB__BROKER__SHUTDOWN_GRACE_MS", Some("250")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.log.path, "/tmp/shared_log");
            assert_eq!(cfg.broker.shutdown_grace_ms, 250);
            assert_eq!(cfg.broker.retry_initial_ms, 100);
        },
    );
}
