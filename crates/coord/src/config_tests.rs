// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;
use std::time::Duration;
use yare::parameterized;

#[test]
fn empty_document_yields_defaults() {
    let config = CoordinationConfig::from_toml_str("").unwrap();
    assert_eq!(config, CoordinationConfig::default());
    assert_eq!(config.lock.retry_budget(), 30);
    assert_eq!(config.election.vote_timeout, Duration::from_secs(2));
}

#[test]
fn parses_humantime_durations_and_permits() {
    let toml = r#"
[lock]
timeout = "2s"
retry_interval = "500ms"
heartbeat_interval = "1s"
auto_release_on_exit = false

[election]
election_timeout = "1m"
jitter = "0s"

[semaphore]
default_max_permits = 4

[semaphore.permits]
gpu = 2
"#;
    let config = CoordinationConfig::from_toml_str(toml).unwrap();

    assert_eq!(config.lock.timeout, Duration::from_secs(2));
    assert_eq!(config.lock.retry_interval, Duration::from_millis(500));
    assert_eq!(config.lock.retry_budget(), 4);
    assert!(!config.lock.auto_release_on_exit);
    assert_eq!(config.election.election_timeout, Duration::from_secs(60));
    assert_eq!(config.election.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(config.election.jitter, Duration::ZERO);
    assert_eq!(config.semaphore.permits.get("gpu"), Some(&2));
    assert_eq!(config.semaphore.default_max_permits, Some(4));
}

#[test]
fn explicit_max_retries_overrides_budget() {
    let config = CoordinationConfig::from_toml_str("[lock]\nmax_retries = 9\n").unwrap();
    assert_eq!(config.lock.max_retries, Some(9));
    assert_eq!(config.lock.retry_budget(), 9);
}

#[parameterized(
    zero_lock_timeout = { "[lock]\ntimeout = \"0s\"\n", "lock.timeout" },
    zero_retry = { "[lock]\nretry_interval = \"0s\"\n", "lock.retry_interval" },
    slow_lock_heartbeat = { "[lock]\ntimeout = \"5s\"\nheartbeat_interval = \"10s\"\n", "lock.heartbeat_interval" },
    slow_leader_heartbeat = { "[election]\nelection_timeout = \"3s\"\n", "election.heartbeat_interval" },
    zero_permits = { "[semaphore.permits]\ngpu = 0\n", "semaphore.permits" },
)]
fn rejects_nonsensical_values(toml: &str, expected_field: &str) {
    match CoordinationConfig::from_toml_str(toml) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
        other => panic!("expected invalid {}, got {:?}", expected_field, other),
    }
}

#[parameterized(
    unknown_section = { "[queue]\nsize = 1\n" },
    bad_duration = { "[lock]\ntimeout = \"soon\"\n" },
    wrong_type = { "[semaphore.permits]\ngpu = \"two\"\n" },
)]
fn rejects_malformed_documents(toml: &str) {
    assert!(matches!(
        CoordinationConfig::from_toml_str(toml),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn load_reads_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coord.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[semaphore.permits]\nbuild = 3").unwrap();

    let config = CoordinationConfig::load(&path).unwrap();
    assert_eq!(config.semaphore.permits.get("build"), Some(&3));
}

#[test]
fn load_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");

    let err = CoordinationConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Read(ref p, _) if *p == path));
    assert!(err.to_string().contains("missing.toml"));
}
