use std::time::Duration;

/// Timing knobs for the link and the command queue
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long a queued command waits for the strip to become ready
    pub ready_timeout: Duration,
    /// How often readiness is re-checked while waiting
    pub poll_interval: Duration,
    /// Minimum spacing between two writes; the strips drop frames sent faster
    pub command_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(200),
            command_interval: Duration::from_millis(15),
        }
    }
}

impl Settings {
    /// Same defaults with a different readiness timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}
