//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use plc_link::config::{Account, BankConfig, LinkConfig};
use std::time::Duration;

#[test]
fn test_default_config_validates() {
    let config = LinkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_bind_address() {
    let mut config = LinkConfig::default();
    config.server.bind_address = "not-an-ip".to_string();

    let errors = config.validate();
    assert!(!errors.is_empty(), "Should have validation errors");
    assert!(errors.iter().any(|e| e.contains("Invalid bind address")));
}

#[test]
fn test_invalid_client_address() {
    let mut config = LinkConfig::default();
    config.client.address = "10.0.0.5".to_string(); // missing port

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid client address format")));
}

#[test]
fn test_zero_backlog_rejected() {
    let mut config = LinkConfig::default();
    config.server.backlog = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Backlog")));
}

#[test]
fn test_short_timeouts_rejected_but_zero_allowed() {
    let mut config = LinkConfig::default();
    config.server.receive_timeout = Duration::from_millis(10);
    config.client.connect_timeout = Duration::from_millis(10);
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Receive timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Connect timeout too short")));

    // zero means "block forever" and is explicitly allowed
    config.server.receive_timeout = Duration::ZERO;
    config.client.connect_timeout = Duration::ZERO;
    config.client.receive_timeout = Duration::ZERO;
    assert!(config.validate().is_empty());
}

#[test]
fn test_bad_token_rejected() {
    let mut config = LinkConfig::default();
    config.server.token = "abc".to_string();
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid token")));

    config.server.token = "00112233445566778899aabbccddeeff".to_string();
    assert!(config.validate().is_empty());
}

#[test]
fn test_credentials_require_accounts() {
    let mut config = LinkConfig::default();
    config.server.check_credentials = true;
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("no accounts")));

    config.server.accounts = vec![Account {
        name: "op".into(),
        password: "pw".into(),
    }];
    assert!(config.validate().is_empty());
}

#[test]
fn test_half_configured_client_account() {
    let mut config = LinkConfig::default();
    config.client.account_name = Some("op".into());
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("configured together")));
}

#[test]
fn test_memory_layout_validation() {
    let mut config = LinkConfig::default();
    config.memory.banks = vec![];
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one register bank")));

    config.memory.banks = vec![BankConfig {
        name: "coils".into(),
        capacity: 0,
    }];
    assert!(config.validate().iter().any(|e| e.contains("zero capacity")));

    config.memory.banks = vec![BankConfig {
        name: "coils".into(),
        capacity: 4096,
    }];
    config.memory.word_len = 9;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Invalid word length")));
}

#[test]
fn test_validate_strict_formats_errors() {
    let mut config = LinkConfig::default();
    config.server.bind_address = String::new();
    let err = config.validate_strict().expect_err("should fail");
    let msg = err.to_string();
    assert!(msg.contains("Configuration validation failed"));
    assert!(msg.contains("cannot be empty"));
}

#[test]
fn test_toml_roundtrip() {
    let config = LinkConfig::default_with_overrides(|c| {
        c.server.token = "00112233445566778899aabbccddeeff".into();
        c.server.receive_timeout = Duration::from_secs(5);
        c.memory.word_len = 2;
    });

    let toml = toml::to_string_pretty(&config).expect("serialize");
    let parsed = LinkConfig::from_toml(&toml).expect("parse");
    assert_eq!(parsed.server.token, config.server.token);
    assert_eq!(parsed.server.receive_timeout, Duration::from_secs(5));
    assert_eq!(parsed.memory.word_len, 2);
}

#[test]
fn test_example_config_parses() {
    let example = LinkConfig::example_config();
    let parsed = LinkConfig::from_toml(&example).expect("example config should parse");
    assert!(parsed.validate().is_empty());
}
