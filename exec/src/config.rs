use std::str::FromStr;

use thiserror::Error;

/// Executions after which a Tier0 unit is promoted to Tier1.
pub const DEFAULT_HOTNESS_THRESHOLD: u64 = 250;

/// Environment variable overriding [`JitConfig::hotness_threshold`].
pub const ENV_HOTNESS_THRESHOLD: &str = "DBT_HOTNESS_THRESHOLD";
/// Environment variable overriding [`JitConfig::tier1_workers`].
pub const ENV_TIER1_WORKERS: &str = "DBT_TIER1_WORKERS";
/// Environment variable overriding [`JitConfig::tier1_fallback`].
pub const ENV_TIER1_FALLBACK: &str = "DBT_TIER1_FALLBACK";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: expected an unsigned integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var}: must be at least 1")]
    Zero { var: &'static str },
    #[error("unknown tier1 fallback {0:?} (expected sync, await or background)")]
    UnknownFallback(String),
}

/// What the dispatch loop does after handing a hot address to the
/// background queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier1Fallback {
    /// Also compile Tier1 synchronously. Both compiles may race; the
    /// install that happens last wins. Latency is bounded regardless of
    /// worker availability.
    #[default]
    Synchronous,
    /// Block until the background compile for the address completes.
    AwaitBackground,
    /// Keep running the current unit; pick up Tier1 once it lands.
    BackgroundOnly,
}

impl FromStr for Tier1Fallback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(Tier1Fallback::Synchronous),
            "await" => Ok(Tier1Fallback::AwaitBackground),
            "background" | "async" => Ok(Tier1Fallback::BackgroundOnly),
            _ => Err(ConfigError::UnknownFallback(s.to_string())),
        }
    }
}

/// Tiering configuration for one emulation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// A Tier0 unit is promoted once its execution count exceeds this.
    pub hotness_threshold: u64,
    /// Background Tier1 worker threads.
    pub tier1_workers: usize,
    pub tier1_fallback: Tier1Fallback,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            hotness_threshold: DEFAULT_HOTNESS_THRESHOLD,
            tier1_workers: 1,
            tier1_fallback: Tier1Fallback::Synchronous,
        }
    }
}

impl JitConfig {
    pub fn with_hotness_threshold(mut self, threshold: u64) -> Self {
        self.hotness_threshold = threshold;
        self
    }

    pub fn with_tier1_workers(mut self, workers: usize) -> Self {
        self.tier1_workers = workers.max(1);
        self
    }

    pub fn with_tier1_fallback(mut self, fallback: Tier1Fallback) -> Self {
        self.tier1_fallback = fallback;
        self
    }

    /// Defaults overridden by `DBT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `DBT_*` variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup(ENV_HOTNESS_THRESHOLD) {
            cfg.hotness_threshold = parse_num(ENV_HOTNESS_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_TIER1_WORKERS) {
            let n = parse_num(ENV_TIER1_WORKERS, &v)?;
            if n == 0 {
                return Err(ConfigError::Zero {
                    var: ENV_TIER1_WORKERS,
                });
            }
            cfg.tier1_workers = n as usize;
        }
        if let Some(v) = lookup(ENV_TIER1_FALLBACK) {
            cfg.tier1_fallback = v.parse()?;
        }
        Ok(cfg)
    }
}

fn parse_num(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}
