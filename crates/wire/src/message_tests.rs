// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn data_uri_decodes() {
    let img = ImageSource::from_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
    assert_eq!(img.mime, "image/png");
    assert_eq!(img.data, b"hello");
}

#[test]
fn rejects_non_data_uri() {
    assert!(ImageSource::from_data_uri("https://example.com/cat.png").is_err());
}

#[test]
fn rejects_missing_base64_marker() {
    assert!(ImageSource::from_data_uri("data:image/png,plain").is_err());
}

#[test]
fn rejects_bad_base64() {
    assert!(ImageSource::from_data_uri("data:image/png;base64,###").is_err());
}

#[test]
fn rejects_empty_mime() {
    assert!(ImageSource::from_data_uri("data:;base64,aGk=").is_err());
}
