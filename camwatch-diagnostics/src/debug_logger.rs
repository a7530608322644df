//! Structured logging setup

use camwatch_core::CamwatchError;
use tracing_subscriber::EnvFilter;

/// Directive applied when `RUST_LOG` does not mention camwatch
pub const DEFAULT_DIRECTIVE: &str = "camwatch=info";

/// Debug logger for structured logging
#[derive(Debug, Clone)]
pub struct DebugLogger {
    directive: String,
    with_target: bool,
}

impl DebugLogger {
    /// Logger with the default directive
    pub fn new() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_string(),
            with_target: true,
        }
    }

    /// Replace the default directive, e.g. `camwatch=debug`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    /// Include the event target in each line
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Filter built from `RUST_LOG` plus the configured directive
    pub fn filter(&self) -> Result<EnvFilter, CamwatchError> {
        let directive = self
            .directive
            .parse()
            .map_err(|e| CamwatchError::InvalidConfiguration {
                field: "log_directive".to_string(),
                reason: format!("{}: {}", self.directive, e),
            })?;
        Ok(EnvFilter::from_default_env().add_directive(directive))
    }

    /// Install the global fmt subscriber
    ///
    /// Fails if a global subscriber is already installed.
    pub fn init(&self) -> Result<(), CamwatchError> {
        tracing_subscriber::fmt()
            .with_env_filter(self.filter()?)
            .with_target(self.with_target)
            .try_init()
            .map_err(|e| CamwatchError::InvalidConfiguration {
                field: "logging".to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging with the default directive
pub fn init_logging() -> Result<(), CamwatchError> {
    DebugLogger::new().init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[test]
    fn test_default_filter() {
        let filter = DebugLogger::new().filter().unwrap();
        assert!(filter.to_string().contains("camwatch=info"));
    }

    #[test]
    fn test_invalid_directive() {
        let err = DebugLogger::new()
            .with_directive("camwatch=loudest")
            .filter()
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_second_init_fails() {
        let logger = DebugLogger::new().with_target(false);
        // The first call may lose to another test installing a subscriber
        let _ = logger.init();
        assert_err!(logger.init());
    }
}
