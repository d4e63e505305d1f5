use std::{env, fs};

use pmbridge_service::config::StorageBackend;
use pmbridge_service::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("pmbridge.toml");

    let toml_content = r#"
[practice]
endpoint = "https://pm.example.com/services/KareoServices.svc"
customer_key = "ck"
user = "api@example.com"
password = "secret"
practice_id = "7"
action_base = "http://www.kareo.com/api/schemas/KareoServices/"
action_templates = ["urn:pm/{operation}"]
timeout_ms = 15000

[billing]
retry_batch_size = 10
poll_interval_secs = 30

[scheduling]
max_shifts = 12

[storage]
backend = "postgres"

[storage.postgres]
url = "postgres://app:pw@localhost:5432/pmbridge"
pool_size = 4

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.practice.practice_id.as_deref(), Some("7"));
    assert_eq!(cfg.practice.action_templates, vec!["urn:pm/{operation}"]);
    assert_eq!(cfg.practice.timeout_ms, 15_000);
    assert_eq!(cfg.billing.retry_batch_size, 10);
    assert!(!cfg.billing.mock_remote);
    assert_eq!(cfg.billing.default_currency, "USD");
    assert_eq!(cfg.scheduling.max_shifts, 12);
    assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
    assert_eq!(cfg.storage.postgres.pool_size, 4);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("PMBRIDGE__BILLING__RETRY_BATCH_SIZE", "50");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.billing.retry_batch_size, 50);
    unsafe {
        env::remove_var("PMBRIDGE__BILLING__RETRY_BATCH_SIZE");
    }

    // 3) Validation errors are reported
    let bad = dir.path().join("bad.toml");
    fs::write(
        &bad,
        r#"
[billing]
mock_remote = true

[logging]
level = "verbose"
"#,
    )
    .expect("write bad toml");
    let err = load_config(bad.to_str()).unwrap_err();
    assert!(err.contains("logging.level"), "unexpected error: {err}");

    // 4) Missing credentials outside mock mode are rejected
    let live = dir.path().join("live.toml");
    fs::write(
        &live,
        r#"
[practice]
endpoint = "https://pm.example.com/services"
"#,
    )
    .expect("write live toml");
    let err = load_config(live.to_str()).unwrap_err();
    assert!(err.contains("practice.customer_key"), "unexpected error: {err}");

    // 5) An explicit path that does not exist is an error
    let missing = dir.path().join("missing.toml");
    assert!(load_config(missing.to_str()).is_err());
}
