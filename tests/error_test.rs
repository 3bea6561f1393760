//! Tests for error types

use diag_impact::Error;

#[test]
fn test_truncated_record_error() {
    let error = Error::TruncatedRecord {
        offset: 35,
        needed: 880,
        available: 352,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("byte 35"));
    assert!(error_str.contains("880"));
    assert!(error_str.contains("352"));
    assert!(!error.is_recoverable());
}

#[test]
fn test_unknown_variable_token_is_recoverable() {
    let error = Error::UnknownVariableToken {
        token: "zz".to_string(),
        offset: 12,
        records: 4,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("'zz'"));
    assert!(error_str.contains("byte 12"));
    assert!(error.is_recoverable());
}

#[test]
fn test_outer_loop_mismatch_error() {
    let error = Error::OuterLoopMismatch {
        variable: "ps".to_string(),
        type_code: "181".to_string(),
        background: 10,
        analysis: 9,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("ps/181"));
    assert!(error_str.contains("10"));
    assert!(error_str.contains('9'));
}

#[test]
fn test_unknown_family_error() {
    let error = Error::UnknownFamily("ozone".to_string());
    assert!(format!("{error}").contains("ozone"));
}

#[test]
fn test_missing_block_error() {
    let error = Error::MissingBlock {
        variable: "t".to_string(),
        type_code: "130".to_string(),
    };
    assert_eq!(format!("{error}"), "No block for t/130");
}

#[test]
fn test_invalid_header_error() {
    let error = Error::InvalidHeader {
        offset: 0,
        reason: "negative record length".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("byte 0"));
    assert!(error_str.contains("negative record length"));
}

#[test]
fn test_family_mismatch_error() {
    let error = Error::FamilyMismatch {
        background: "conventional".to_string(),
        analysis: "radiance".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("'conventional'"));
    assert!(error_str.contains("'radiance'"));
}

#[test]
fn test_config_error() {
    let error = Error::Config("bootstrap_rounds must be positive".to_string());
    assert!(format!("{error}").contains("Configuration error"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_arrow_error_conversion() {
    let arrow_error = arrow::error::ArrowError::InvalidArgumentError("bad column".to_string());
    let error: Error = arrow_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("Arrow error"));
    assert!(error_str.contains("bad column"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::InvalidInput("debug test".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("InvalidInput"));
}
