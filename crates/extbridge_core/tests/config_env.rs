use extbridge_core::{BridgeConfig, ConfigError, CONFIG_ENV_VAR};
use std::io::Write;

// Single test: the process environment is shared across tests in this file.
#[test]
fn from_env_follows_the_config_variable() {
    std::env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(
        BridgeConfig::from_env().expect("defaults without variable"),
        BridgeConfig::default()
    );

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{"event_queue_capacity": 8, "orphan_grace_ms": 250}}"#
    )
    .expect("write config");
    std::env::set_var(CONFIG_ENV_VAR, file.path());
    let config = BridgeConfig::from_env().expect("config from file");
    assert_eq!(config.event_queue_capacity, 8);
    assert_eq!(config.orphan_grace_ms, 250);

    let mut invalid = tempfile::NamedTempFile::new().expect("temp file");
    write!(invalid, r#"{{"event_queue_capacity": 0}}"#).expect("write config");
    std::env::set_var(CONFIG_ENV_VAR, invalid.path());
    assert!(matches!(
        BridgeConfig::from_env(),
        Err(ConfigError::Invalid(_))
    ));

    std::env::remove_var(CONFIG_ENV_VAR);
}
