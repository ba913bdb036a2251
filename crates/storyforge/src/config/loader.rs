use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = load_config_from_str(&content)?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    // An empty document means "all defaults".
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Rejects settings the executor, poller or runner cannot start with.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let limits = [
        ("prompt", config.concurrency.prompt),
        ("image", config.concurrency.image),
        ("video", config.concurrency.video),
    ];
    for (name, limit) in limits {
        if limit == 0 {
            return Err(ConfigError::Validation {
                message: format!("concurrency.{} must be at least 1", name),
            });
        }
    }

    if config.scheduler.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.poll_interval_secs must be at least 1".to_string(),
        });
    }
    if config.scheduler.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.batch_size must be at least 1".to_string(),
        });
    }
    if config.runner.max_blocking_threads == 0 {
        return Err(ConfigError::Validation {
            message: "runner.max_blocking_threads must be at least 1".to_string(),
        });
    }
    if config.cache.enabled && config.cache.ttl_secs == 0 {
        return Err(ConfigError::Validation {
            message: "cache.ttl_secs must be at least 1 when the cache is enabled".to_string(),
        });
    }

    let base_url = config.generation.base_url.trim();
    if !base_url.is_empty() && !base_url.starts_with("http://") && !base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation {
            message: format!("generation.base_url must be an http(s) URL: {}", base_url),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::ResourceClass;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.concurrency.limit(ResourceClass::Prompt), 5);
        assert_eq!(config.concurrency.limit(ResourceClass::Image), 5);
        assert_eq!(config.concurrency.limit(ResourceClass::Video), 3);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(config.cache.enabled);
        assert!(config.runner.max_blocking_threads >= 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_partial_yaml() {
        let yaml = r#"
concurrency:
  video: 2
scheduler:
  stale_after_secs: 0
generation:
  base_url: https://api.example.com/v3
storage:
  data_dir: /tmp/artifacts
logging:
  json: true
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.concurrency.video, 2);
        assert_eq!(config.concurrency.prompt, 5);
        assert!(config.scheduler.stale_after().is_none());
        assert_eq!(config.generation.base_url, "https://api.example.com/v3");
        assert_eq!(config.generation.max_wait_secs, 600);
        assert_eq!(config.storage.data_dir, std::path::PathBuf::from("/tmp/artifacts"));
        assert!(config.logging.json);
    }

    #[test]
    fn test_default_stale_threshold_is_six_hours() {
        let config = load_config_from_str("cache:\n  enabled: false\n").unwrap();
        assert_eq!(
            config.scheduler.stale_after(),
            Some(std::time::Duration::from_secs(21_600))
        );
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = load_config_from_str("concurrency:\n  image: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(err.to_string().contains("concurrency.image"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(load_config_from_str("scheduler:\n  batch_size: 0\n").is_err());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let err = load_config_from_str("generation:\n  base_url: ftp://nope\n").unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = load_config_from_str("concurrency: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storyforge.yaml");
        std::fs::write(&path, "database:\n  path: /tmp/sf.db\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config.database.resolved_path(),
            Some(std::path::PathBuf::from("/tmp/sf.db"))
        );
        assert!(matches!(
            load_config(dir.path().join("missing.yaml")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
