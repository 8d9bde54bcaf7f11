use super::*;

#[test]
fn test_settings_new() {
    let settings = Settings::new("../../configs/config.toml").unwrap();
    assert_eq!(settings.driver, DriverSettings::default());
    assert_eq!(settings.round, RoundSettings::default());
    assert!(Settings::new("").is_err());
}

#[test]
fn test_driver_settings() {
    let settings = DriverSettings {
        poll_interval_ms: 250,
        ttl_secs: 60,
        barrier_timeout_secs: Some(5),
    };
    assert_eq!(settings.poll_interval(), Duration::from_millis(250));
    assert_eq!(settings.ttl(), Duration::from_secs(60));
    assert_eq!(settings.barrier_timeout(), Some(Duration::from_secs(5)));
    assert!(settings.validate().is_ok());

    assert!(DriverSettings {
        poll_interval_ms: 0,
        ..DriverSettings::default()
    }
    .validate()
    .is_err());
    assert!(DriverSettings {
        barrier_timeout_secs: Some(0),
        ..DriverSettings::default()
    }
    .validate()
    .is_err());
}

#[test]
fn test_validate_round() {
    assert!(RoundSettings::default().validate().is_ok());
    assert!(RoundSettings {
        min_nodes: 0,
        ..RoundSettings::default()
    }
    .validate()
    .is_err());
}

#[test]
fn test_invalid_log_filter() {
    #[derive(Debug, Deserialize)]
    struct Log {
        #[allow(dead_code)]
        log: LoggingSettings,
    }

    let parsed: Result<Log, _> = serde_json::from_str(r#"{"log": {"filter": "info"}}"#);
    assert!(parsed.is_ok());
    let parsed: Result<Log, _> = serde_json::from_str(r#"{"log": {"filter": "fedorch=loud"}}"#);
    assert!(parsed.is_err());
}
