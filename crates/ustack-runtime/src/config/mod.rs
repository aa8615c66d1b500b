//! Stack configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use ustack_runtime::config::{StackConfig, WaitStrategy};
//!
//! // Defaults with env overrides
//! let config = StackConfig::from_env();
//!
//! // Or customize programmatically
//! let config = StackConfig::from_env()
//!     .max_concurrency(4096)
//!     .wait_strategy(WaitStrategy::SpinThenBlock { spins: 2000 });
//! ```

pub mod defaults;

use std::time::Duration;
use ustack_core::env::{env_get, env_get_bool};

/// How an application thread behaves in `wait` before it blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Lock and sleep on the condition variable straight away.
    Block,
    /// Poll the group's ready hint up to `spins` times, then block.
    SpinThenBlock { spins: u32 },
}

impl WaitStrategy {
    fn from_flags(spin: bool, spins: u32) -> Self {
        if spin && spins > 0 {
            WaitStrategy::SpinThenBlock { spins }
        } else {
            WaitStrategy::Block
        }
    }
}

/// Engine context configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Socket-table slots, notification groups included
    pub max_concurrency: usize,
    /// NIC interfaces tracked by ingress counters
    pub max_interfaces: usize,
    /// Pre-block behaviour of `wait`
    pub wait_strategy: WaitStrategy,
    /// Wake a parked engine before an application thread sleeps
    pub wakeup_engine: bool,
    /// Longest single engine park
    pub engine_park_timeout: Duration,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl StackConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `USTACK_MAX_CONCURRENCY` - Socket-table size
    /// - `USTACK_MAX_INTERFACES` - Interfaces tracked by rx counters
    /// - `USTACK_SPIN_BEFORE_SLEEP` - Spin before blocking in wait (0/1)
    /// - `USTACK_WAIT_SPINS` - Spin iterations
    /// - `USTACK_WAKEUP_ENGINE` - Wake a sleeping engine on wait (0/1)
    /// - `USTACK_ENGINE_PARK_MS` - Engine park timeout in milliseconds
    pub fn from_env() -> Self {
        Self {
            max_concurrency: env_get("USTACK_MAX_CONCURRENCY", defaults::MAX_CONCURRENCY),
            max_interfaces: env_get("USTACK_MAX_INTERFACES", defaults::MAX_INTERFACES),
            wait_strategy: WaitStrategy::from_flags(
                env_get_bool("USTACK_SPIN_BEFORE_SLEEP", defaults::SPIN_BEFORE_SLEEP),
                env_get("USTACK_WAIT_SPINS", defaults::WAIT_SPINS),
            ),
            wakeup_engine: env_get_bool("USTACK_WAKEUP_ENGINE", defaults::WAKEUP_ENGINE),
            engine_park_timeout: Duration::from_millis(env_get(
                "USTACK_ENGINE_PARK_MS",
                defaults::ENGINE_PARK_MS,
            )),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_concurrency: defaults::MAX_CONCURRENCY,
            max_interfaces: defaults::MAX_INTERFACES,
            wait_strategy: WaitStrategy::from_flags(
                defaults::SPIN_BEFORE_SLEEP,
                defaults::WAIT_SPINS,
            ),
            wakeup_engine: defaults::WAKEUP_ENGINE,
            engine_park_timeout: Duration::from_millis(defaults::ENGINE_PARK_MS),
        }
    }

    // Builder methods

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn max_interfaces(mut self, n: usize) -> Self {
        self.max_interfaces = n;
        self
    }

    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = strategy;
        self
    }

    pub fn wakeup_engine(mut self, enable: bool) -> Self {
        self.wakeup_engine = enable;
        self
    }

    pub fn engine_park_timeout(mut self, d: Duration) -> Self {
        self.engine_park_timeout = d;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue("max_concurrency must be > 0"));
        }
        if self.max_concurrency >= u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_concurrency must fit a socket id"));
        }
        if self.max_interfaces == 0 {
            return Err(ConfigError::InvalidValue("max_interfaces must be > 0"));
        }
        if self.engine_park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("engine_park_timeout must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("ustack Configuration:");
        eprintln!("  max_concurrency:        {}", self.max_concurrency);
        eprintln!("  max_interfaces:         {}", self.max_interfaces);
        eprintln!("  wait_strategy:          {:?}", self.wait_strategy);
        eprintln!("  wakeup_engine:          {}", self.wakeup_engine);
        eprintln!("  engine_park_timeout:    {:?}", self.engine_park_timeout);
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
