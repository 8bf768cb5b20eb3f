//! Environment variable configuration
//!
//! Environment overrides for run configuration.

use std::env;

use super::{ExplicitOption, RunConfig};

/// Environment variable prefix
const ENV_PREFIX: &str = "TEST_ENGINE";

/// Run settings read from the environment
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// TEST_ENGINE_PARALLEL
    pub parallel: Option<bool>,
    /// TEST_ENGINE_MAX_THREADS
    pub max_threads: Option<i32>,
    /// TEST_ENGINE_SYNC_REPORTING
    pub sync_reporting: Option<bool>,
    /// TEST_ENGINE_EXPLICIT
    pub explicit: Option<ExplicitOption>,
    /// TEST_ENGINE_DIAGNOSTICS
    pub diagnostics: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            parallel: get_env_bool("PARALLEL"),
            max_threads: get_env_parse("MAX_THREADS"),
            sync_reporting: get_env_bool("SYNC_REPORTING"),
            explicit: get_env("EXPLICIT").and_then(|v| ExplicitOption::parse(&v)),
            diagnostics: get_env_bool("DIAGNOSTICS"),
        }
    }

    pub fn has_any(&self) -> bool {
        self.parallel.is_some()
            || self.max_threads.is_some()
            || self.sync_reporting.is_some()
            || self.explicit.is_some()
            || self.diagnostics.is_some()
    }

    /// Override the given configuration with every value that is set
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(parallel) = self.parallel {
            config.parallelize_test_collections = parallel;
        }
        if let Some(max_threads) = self.max_threads {
            config.max_parallel_threads = max_threads;
        }
        if let Some(sync) = self.sync_reporting {
            config.synchronous_message_reporting = sync;
        }
        if let Some(explicit) = self.explicit {
            config.explicit = explicit;
        }
        if let Some(diagnostics) = self.diagnostics {
            config.diagnostic_messages = diagnostics;
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Restores the touched variables on drop
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(name, value)| {
                    let key = format!("{ENV_PREFIX}_{name}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, value);
                    (key, old)
                })
                .collect();
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());

        let mut run = RunConfig::default();
        config.apply_to(&mut run);
        assert!(run.parallelize_test_collections);
    }

    #[test]
    fn test_env_overrides_apply() {
        let _guard = EnvGuard::set(&[
            ("PARALLEL", "off"),
            ("MAX_THREADS", "-1"),
            ("EXPLICIT", "only"),
            ("DIAGNOSTICS", "yes"),
        ]);

        let env_config = EnvConfig::load();
        assert_eq!(env_config.parallel, Some(false));
        assert_eq!(env_config.max_threads, Some(-1));

        let mut run = RunConfig::default();
        env_config.apply_to(&mut run);
        assert!(!run.parallelize_test_collections);
        assert_eq!(run.max_parallel_threads, -1);
        assert_eq!(run.explicit, ExplicitOption::Only);
        assert!(run.diagnostic_messages);
        assert!(!run.synchronous_message_reporting);
    }
}
