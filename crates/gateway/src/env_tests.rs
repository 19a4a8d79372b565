// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn reconnect_delays_parse_and_fall_back() {
    std::env::set_var("HARBOR_RECONNECT_DELAYS_MS", "100, 250,500");
    assert_eq!(
        reconnect_delays(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(250),
            Duration::from_millis(500)
        ]
    );

    std::env::set_var("HARBOR_RECONNECT_DELAYS_MS", "not,numbers");
    assert_eq!(reconnect_delays(), vec![Duration::from_secs(1)]);

    std::env::remove_var("HARBOR_RECONNECT_DELAYS_MS");
    assert_eq!(reconnect_delays().len(), 5);
}

#[test]
#[serial]
fn duration_vars_honor_overrides() {
    std::env::set_var("HARBOR_IDLE_DELAY_MS", "1500");
    assert_eq!(idle_delay(), Duration::from_millis(1500));
    std::env::remove_var("HARBOR_IDLE_DELAY_MS");
    assert_eq!(idle_delay(), Duration::from_secs(300));
}

#[test]
#[serial]
fn auth_token_requires_non_empty() {
    std::env::set_var("HARBOR_AUTH_TOKEN", "");
    assert_eq!(auth_token(), None);
    std::env::set_var("HARBOR_AUTH_TOKEN", "secret");
    assert_eq!(auth_token().as_deref(), Some("secret"));
    std::env::remove_var("HARBOR_AUTH_TOKEN");
}

#[test]
#[serial]
fn state_dir_prefers_explicit_override() {
    std::env::set_var("HARBOR_STATE_DIR", "/tmp/harbor-test-state");
    assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/harbor-test-state"));
    std::env::remove_var("HARBOR_STATE_DIR");
}
