//! Engine configuration.

use std::time::Duration;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CANCEL_CHECK_INTERVAL: usize = 1024;

pub const QUERY_TIMEOUT_ENV: &str = "GONGDB_QUERY_TIMEOUT_MS";
pub const CANCEL_CHECK_INTERVAL_ENV: &str = "GONGDB_CANCEL_CHECK_INTERVAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Wall-clock ceiling per query. `None` disables the timer.
    pub query_timeout: Option<Duration>,
    /// Arm the timer in debug builds too. Release builds always arm it.
    pub timeout_in_debug: bool,
    /// Cross-join pairs produced between two cancellation checks.
    pub cancel_check_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout: Some(DEFAULT_QUERY_TIMEOUT),
            timeout_in_debug: false,
            cancel_check_interval: DEFAULT_CANCEL_CHECK_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `GONGDB_QUERY_TIMEOUT_MS` (0 disables the
    /// timer) and `GONGDB_CANCEL_CHECK_INTERVAL`. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(millis) = lookup(QUERY_TIMEOUT_ENV).and_then(|raw| raw.trim().parse::<u64>().ok()) {
            config.query_timeout = match millis {
                0 => None,
                millis => Some(Duration::from_millis(millis)),
            };
        }
        if let Some(interval) = lookup(CANCEL_CHECK_INTERVAL_ENV)
            .and_then(|raw| raw.trim().parse::<usize>().ok())
        {
            config = config.with_cancel_check_interval(interval);
        }
        config
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_timeout_in_debug(mut self, enabled: bool) -> Self {
        self.timeout_in_debug = enabled;
        self
    }

    /// Zero is clamped to one (check after every pair).
    pub fn with_cancel_check_interval(mut self, interval: usize) -> Self {
        self.cancel_check_interval = interval.max(1);
        self
    }

    /// The timeout that actually applies to this build.
    pub fn effective_timeout(&self) -> Option<Duration> {
        if cfg!(debug_assertions) && !self.timeout_in_debug {
            None
        } else {
            self.query_timeout
        }
    }
}
