use serial_test::serial;

use super::*;

#[test]
fn default_settings_use_hardcoded_values() {
    let settings = Settings::default();

    assert_eq!(settings.server.listen_addr, "127.0.0.1:6320");
    assert_eq!(settings.server.ws_listen_addr, "127.0.0.1:6321");
    assert_eq!(settings.snapshot.path, PathBuf::from("data/db.json"));
    assert_eq!(settings.snapshot.interval_secs, 60);
    assert_eq!(settings.rpc.pending_call_timeout_ms, 30_000);
}

#[test]
#[serial]
fn load_merges_file_settings_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hubdb.toml");
    std::fs::write(
        &path,
        r#"
        [server]
        listen_addr = "0.0.0.0:7000"

        [snapshot]
        interval_secs = 5
        "#,
    )
    .unwrap();

    let settings = Settings::load(path.to_str()).unwrap();

    assert_eq!(settings.server.listen_addr, "0.0.0.0:7000");
    // Untouched sections keep their defaults.
    assert_eq!(settings.server.ws_listen_addr, "127.0.0.1:6321");
    assert_eq!(settings.snapshot.interval_secs, 5);
}

#[test]
#[serial]
fn environment_variables_take_priority() {
    std::env::set_var("HUBDB__RPC__PENDING_CALL_TIMEOUT_MS", "1500");

    let settings = Settings::load(None).unwrap();

    std::env::remove_var("HUBDB__RPC__PENDING_CALL_TIMEOUT_MS");
    assert_eq!(settings.rpc.pending_call_timeout_ms, 1500);
    assert_eq!(
        settings.pending_call_timeout(),
        Duration::from_millis(1500)
    );
}

#[test]
fn validation_rejects_zero_snapshot_interval() {
    let mut settings = Settings::default();
    settings.snapshot.interval_secs = 0;

    assert!(settings.validate().is_err());
}

#[test]
fn validation_rejects_unparseable_ws_address() {
    let mut settings = Settings::default();
    settings.server.ws_listen_addr = "not-an-address".to_string();

    assert!(settings.validate().is_err());
}

#[test]
fn duration_helpers_convert_units() {
    let settings = Settings::default();

    assert_eq!(settings.snapshot_interval(), Duration::from_secs(60));
    assert_eq!(settings.pending_call_timeout(), Duration::from_millis(30_000));
    assert_eq!(settings.ws_socket_addr().port(), 6321);
}
