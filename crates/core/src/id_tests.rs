// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_connection_id_has_prefix_and_fits() {
    let id = ConnectionId::new();
    assert!(id.as_str().starts_with("con-"));
    assert_eq!(id.as_str().len(), ID_MAX_LEN);
}

#[test]
fn generated_ids_are_unique() {
    let a = ConnectionId::new();
    let b = ConnectionId::new();
    assert_ne!(a, b);
}

#[test]
fn id_display_and_suffix() {
    let id = InstanceId::from_string("ins-abc");
    assert_eq!(id.to_string(), "ins-abc");
    assert_eq!(id.suffix(), "abc");
}

#[test]
fn id_serde_is_transparent() {
    let id = ConnectionId::from_string("con-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"con-xyz\"");
    let parsed: ConnectionId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn idbuf_rejects_oversized_on_deserialize() {
    let long = format!("\"{}\"", "x".repeat(ID_MAX_LEN + 1));
    let parsed: Result<ConnectionId, _> = serde_json::from_str(&long);
    assert!(parsed.is_err());
}

#[test]
fn session_id_is_unbounded() {
    let long = "s".repeat(120);
    let id = SessionId::new(long.clone());
    assert_eq!(id.as_str(), long);
}

#[test]
fn session_id_generate_has_prefix() {
    let id = SessionId::generate();
    assert!(id.as_str().starts_with("ses-"));
}

#[test]
fn session_id_borrow_str_lookup() {
    use std::collections::HashMap;
    let mut map: HashMap<SessionId, u32> = HashMap::new();
    map.insert(SessionId::new("ses-1"), 1);
    assert_eq!(map.get("ses-1"), Some(&1));
}

#[test]
fn short_truncates() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
}
