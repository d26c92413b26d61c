//! Loading configuration documents from disk

use core_runtime::config::{MatchStrategy, SyncConfig};
use core_runtime::Error;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "source_rate": {{ "rate_per_second": 0.5, "burst": 1 }},
            "retry": {{ "max_attempts": 3, "max_wait_ms": 30000 }},
            "load": {{ "hierarchy_relationship": "children" }},
            "matching": {{ "strategy_order": ["primary_id", "size_pattern"] }}
        }}"#
    )
    .unwrap();

    let config = SyncConfig::from_json_file(file.path()).unwrap();

    assert_eq!(config.source_rate.rate_per_second, 0.5);
    assert_eq!(config.source_rate.burst, 1);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.max_wait().as_secs(), 30);
    assert_eq!(config.load.hierarchy_relationship, "children");
    assert_eq!(config.load.canonical_relationship, "canonical_listings");
    assert_eq!(
        config.matching.strategy_order,
        vec![MatchStrategy::PrimaryId, MatchStrategy::SizePattern]
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SyncConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_unknown_strategy_is_parse_error() {
    let err = SyncConfig::from_json(r#"{ "matching": { "strategy_order": ["fuzzy"] } }"#)
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}
