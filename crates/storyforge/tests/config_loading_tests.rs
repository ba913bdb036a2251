//! Table-driven tests for configuration loading and validation.

use std::io::Write;

use storyforge::config::load_config_from_str;
use storyforge::{load_config, ConfigError, ResourceClass};

struct ConfigTestCase {
    name: &'static str,
    yaml: &'static str,
    should_succeed: bool,
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "empty_document_uses_defaults",
        yaml: "",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "full",
        yaml: r#"
database:
  path: /var/lib/storyforge/storyforge.db
cache:
  enabled: true
  ttl_secs: 600
  max_capacity: 500
concurrency:
  prompt: 8
  image: 4
  video: 2
scheduler:
  poll_interval_secs: 10
  batch_size: 20
  stale_after_secs: 7200
runner:
  max_blocking_threads: 16
generation:
  base_url: https://ark.example.com/api/v3
  api_key_env: ARK_API_KEY
storage:
  data_dir: /srv/aigc
logging:
  level: debug
  json: true
"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "zero_video_limit",
        yaml: "concurrency:\n  video: 0\n",
        should_succeed: false,
        expected_error: Some("concurrency.video"),
    },
    ConfigTestCase {
        name: "zero_batch_size",
        yaml: "scheduler:\n  batch_size: 0\n",
        should_succeed: false,
        expected_error: Some("scheduler.batch_size"),
    },
    ConfigTestCase {
        name: "zero_poll_interval",
        yaml: "scheduler:\n  poll_interval_secs: 0\n",
        should_succeed: false,
        expected_error: Some("poll_interval_secs"),
    },
    ConfigTestCase {
        name: "zero_ttl_with_cache_enabled",
        yaml: "cache:\n  ttl_secs: 0\n",
        should_succeed: false,
        expected_error: Some("cache.ttl_secs"),
    },
    ConfigTestCase {
        name: "zero_ttl_with_cache_disabled",
        yaml: "cache:\n  enabled: false\n  ttl_secs: 0\n",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "non_http_base_url",
        yaml: "generation:\n  base_url: ftp://ark.example.com\n",
        should_succeed: false,
        expected_error: Some("http(s)"),
    },
    ConfigTestCase {
        name: "malformed_yaml",
        yaml: "concurrency: [1, 2",
        should_succeed: false,
        expected_error: Some("parse"),
    },
];

#[test]
fn test_config_cases() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.yaml);
        match (case.should_succeed, &result) {
            (true, Ok(_)) => {}
            (false, Err(e)) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "[{}] expected error containing '{}', got '{}'",
                        case.name,
                        expected,
                        e
                    );
                }
            }
            (true, Err(e)) => panic!("[{}] expected success, got error: {}", case.name, e),
            (false, Ok(_)) => panic!("[{}] expected failure, got success", case.name),
        }
    }
}

#[test]
fn test_full_config_values() {
    let config = load_config_from_str(CONFIG_TESTS[1].yaml).unwrap();
    assert_eq!(config.concurrency.limit(ResourceClass::Prompt), 8);
    assert_eq!(config.concurrency.limit(ResourceClass::Video), 2);
    assert_eq!(config.scheduler.stale_after().unwrap().as_secs(), 7200);
    assert_eq!(config.runner.max_blocking_threads, 16);
    assert_eq!(config.generation.api_key_env, "ARK_API_KEY");
    assert!(config.logging.json);
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "scheduler:\n  batch_size: 3").unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.scheduler.batch_size, 3);
    assert_eq!(config.scheduler.poll_interval_secs, 5);
}

#[test]
fn test_missing_config_file_reports_path() {
    let err = load_config("/nonexistent/storyforge.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
    assert!(err.to_string().contains("/nonexistent/storyforge.yaml"));
}
