//! Run configuration
//!
//! Parallelism, message delivery and explicit-test settings for one assembly
//! run, loadable from YAML or JSON and overridable from the environment.

pub mod env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which tests run with respect to their explicit flag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplicitOption {
    /// Explicit tests are not run
    #[default]
    Off,
    /// Explicit and non-explicit tests both run
    On,
    /// Only explicit tests run
    Only,
}

impl ExplicitOption {
    /// Whether a test with the given explicit flag should run
    pub fn should_run(self, explicit: bool) -> bool {
        match self {
            ExplicitOption::Off => !explicit,
            ExplicitOption::On => true,
            ExplicitOption::Only => explicit,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(ExplicitOption::Off),
            "on" => Some(ExplicitOption::On),
            "only" => Some(ExplicitOption::Only),
            _ => None,
        }
    }
}

/// Resolved collection-level concurrency
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Bounded(usize),
    Unbounded,
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Sequential => write!(f, "non-parallel"),
            Parallelism::Bounded(n) => write!(f, "parallel ({n} threads)"),
            Parallelism::Unbounded => write!(f, "parallel (unlimited threads)"),
        }
    }
}

/// Run configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run parallel-capable collections concurrently
    pub parallelize_test_collections: bool,

    /// 0 = processor count, -1 = unlimited, otherwise the bound
    pub max_parallel_threads: i32,

    /// Deliver messages on the producer's task instead of a background dispatcher
    pub synchronous_message_reporting: bool,

    pub explicit: ExplicitOption,

    /// Forward diagnostic messages to the diagnostic sink
    pub diagnostic_messages: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallelize_test_collections: true,
            max_parallel_threads: 0,
            synchronous_message_reporting: false,
            explicit: ExplicitOption::Off,
            diagnostic_messages: false,
        }
    }
}

impl RunConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Optional file values with environment overrides applied on top
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let overrides = env::EnvConfig::load();
        if overrides.has_any() {
            tracing::debug!("Applying environment overrides: {:?}", overrides);
            overrides.apply_to(&mut config);
        }
        Ok(config)
    }

    /// Resolve the collection-level concurrency for this run
    pub fn effective_parallelism(&self) -> Parallelism {
        if !self.parallelize_test_collections {
            return Parallelism::Sequential;
        }
        match self.max_parallel_threads {
            n if n < 0 => Parallelism::Unbounded,
            0 => Parallelism::Bounded(processor_count()),
            n => Parallelism::Bounded(n as usize),
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

fn processor_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert!(config.parallelize_test_collections);
        assert_eq!(config.max_parallel_threads, 0);
        assert_eq!(config.explicit, ExplicitOption::Off);
    }

    #[test]
    fn test_effective_parallelism() {
        let mut config = RunConfig {
            max_parallel_threads: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_parallelism(), Parallelism::Bounded(3));

        config.max_parallel_threads = -1;
        assert_eq!(config.effective_parallelism(), Parallelism::Unbounded);

        config.max_parallel_threads = 0;
        assert!(matches!(
            config.effective_parallelism(),
            Parallelism::Bounded(n) if n >= 1
        ));

        config.parallelize_test_collections = false;
        assert_eq!(config.effective_parallelism(), Parallelism::Sequential);
    }

    #[test]
    fn test_parallelism_display() {
        assert_eq!(Parallelism::Sequential.to_string(), "non-parallel");
        assert_eq!(Parallelism::Bounded(4).to_string(), "parallel (4 threads)");
        assert_eq!(
            Parallelism::Unbounded.to_string(),
            "parallel (unlimited threads)"
        );
    }

    #[test]
    fn test_explicit_option() {
        assert!(ExplicitOption::Off.should_run(false));
        assert!(!ExplicitOption::Off.should_run(true));
        assert!(ExplicitOption::On.should_run(true));
        assert!(!ExplicitOption::Only.should_run(false));
        assert_eq!(ExplicitOption::parse("ONLY"), Some(ExplicitOption::Only));
    }

    #[test]
    fn test_yaml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");

        let config = RunConfig {
            max_parallel_threads: 2,
            explicit: ExplicitOption::On,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.max_parallel_threads, 2);
        assert_eq!(loaded.explicit, ExplicitOption::On);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{ "synchronous_message_reporting": true }"#).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert!(loaded.synchronous_message_reporting);
        assert!(loaded.parallelize_test_collections);
    }

    #[test]
    fn test_resolve_without_file_uses_defaults() {
        assert!(RunConfig::resolve(None).is_ok());
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = RunConfig::load("/nonexistent/run.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
