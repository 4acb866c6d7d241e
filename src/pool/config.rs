use std::time::Duration;

/// Default delay between the first mutation and the coalesced commit.
pub const DEFAULT_STORE_DELAY: Duration = Duration::from_millis(1000);

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in logs and scheduler task keys.
    pub name: String,
    /// How long mutations are coalesced before they are committed.
    pub store_delay: Duration,
    /// Run a collection right after the store opens.
    pub collect_on_open: bool,
    /// Include record contents in debug logs.
    pub verbose: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            store_delay: DEFAULT_STORE_DELAY,
            collect_on_open: true,
            verbose: false,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the coalescing delay.
    pub fn store_delay(mut self, delay: Duration) -> Self {
        self.store_delay = delay;
        self
    }

    /// Set collect_on_open flag.
    pub fn collect_on_open(mut self, value: bool) -> Self {
        self.collect_on_open = value;
        self
    }

    /// Set verbose flag.
    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }
}
