//! Optimizer configuration and environment overrides.

use std::time::Duration;

use crate::error::TierUpError;

/// Default bound for the backpressure gate.
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 8;

/// Extra OSR slots on top of `max_queue_length`.
pub const OSR_BUFFER_SLACK: usize = 4;

/// Default name of the optimizer thread.
pub const DEFAULT_THREAD_NAME: &str = "otter-tierup";

/// Configuration for [`BackgroundOptimizer`](crate::BackgroundOptimizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierUpConfig {
    /// Number of outstanding tasks at which `is_queue_available` turns false.
    /// Also sizes the OSR ring buffer (`max_queue_length + 4` slots).
    pub max_queue_length: usize,
    /// Whether OSR results are cached. When false the OSR buffer is never
    /// allocated and every OSR query reports "not found".
    pub osr_enabled: bool,
    /// Artificial pause taken by the worker after every wake-up (default: none)
    pub compile_delay: Duration,
    /// Promote queueing and timing diagnostics to `info` level.
    pub trace: bool,
    /// Name given to the optimizer thread.
    pub thread_name: String,
}

impl Default for TierUpConfig {
    fn default() -> Self {
        Self {
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            osr_enabled: true,
            compile_delay: Duration::ZERO,
            trace: false,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl TierUpConfig {
    /// Default configuration with `OTTER_TIERUP_*` environment overrides.
    ///
    /// - `OTTER_TIERUP_QUEUE_LENGTH=<u32>` (zero is ignored)
    /// - `OTTER_TIERUP_OSR=0|1`
    /// - `OTTER_TIERUP_DELAY_MS=<u32>`
    /// - `OTTER_TIERUP_TRACE=0|1`
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(length) = lookup("OTTER_TIERUP_QUEUE_LENGTH")
            .as_deref()
            .and_then(parse_u32)
            .filter(|length| *length > 0)
        {
            self.max_queue_length = length as usize;
        }
        if let Some(value) = lookup("OTTER_TIERUP_OSR") {
            self.osr_enabled = parse_truthy(&value);
        }
        if let Some(delay_ms) = lookup("OTTER_TIERUP_DELAY_MS").as_deref().and_then(parse_u32) {
            self.compile_delay = Duration::from_millis(u64::from(delay_ms));
        }
        if let Some(value) = lookup("OTTER_TIERUP_TRACE") {
            self.trace = parse_truthy(&value);
        }
        self
    }

    /// Set the backpressure bound.
    pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
        self.max_queue_length = max_queue_length;
        self
    }

    /// Enable or disable OSR result caching.
    pub fn with_osr(mut self, enabled: bool) -> Self {
        self.osr_enabled = enabled;
        self
    }

    /// Set the per-wake-up worker delay.
    pub fn with_compile_delay(mut self, delay: Duration) -> Self {
        self.compile_delay = delay;
        self
    }

    /// Number of OSR slots this configuration allocates (0 when disabled).
    pub fn osr_buffer_capacity(&self) -> usize {
        if self.osr_enabled {
            self.max_queue_length.saturating_add(OSR_BUFFER_SLACK)
        } else {
            0
        }
    }

    /// Reject configurations the optimizer cannot run with.
    pub fn validate(&self) -> Result<(), TierUpError> {
        if self.max_queue_length == 0 {
            return Err(TierUpError::InvalidConfig(
                "max_queue_length must be at least 1".to_string(),
            ));
        }
        if self.osr_enabled && self.max_queue_length.checked_add(OSR_BUFFER_SLACK).is_none() {
            return Err(TierUpError::InvalidConfig(format!(
                "max_queue_length {} leaves no room for {OSR_BUFFER_SLACK} OSR slack slots",
                self.max_queue_length
            )));
        }
        if self.thread_name.contains('\0') {
            return Err(TierUpError::InvalidConfig(
                "thread_name must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_truthy(value: &str) -> bool {
    let value = value.trim();
    !matches!(value, "" | "0")
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("off")
        && !value.eq_ignore_ascii_case("no")
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
