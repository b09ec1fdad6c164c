//! Best-effort progress and confirmation surface.
//!
//! The host application may or may not have a UI. Whether one exists is
//! decided once, through [`ProgressReporter::is_interactive`]; without one
//! every decision defaults to "proceed" and outcomes are only logged.

/// Progress and confirmation callbacks used during migration and recovery.
pub trait ProgressReporter: Send + Sync {
    /// Returns `true` when a user can see progress and answer prompts.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Announces a long-running stage.
    fn begin(&self, title: &str);

    /// Reports progress as a percentage in `0..=100`.
    fn update(&self, percent: u8, message: &str);

    /// Returns `true` once the user asked to stop the current stage.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Asks the user to confirm a recovery step.
    ///
    /// Only called when [`is_interactive`](Self::is_interactive) is `true`.
    fn confirm(&self, _message: &str) -> bool {
        true
    }

    /// Closes the progress display.
    fn finish(&self);
}

/// Headless reporter that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn begin(&self, _title: &str) {}

    fn update(&self, _percent: u8, _message: &str) {}

    fn finish(&self) {}
}

/// Headless reporter that writes stages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn begin(&self, title: &str) {
        tracing::info!(stage = title, "Started");
    }

    fn update(&self, percent: u8, message: &str) {
        tracing::info!(percent, message, "Progress");
    }

    fn finish(&self) {
        tracing::info!("Finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_defaults_to_proceed() {
        let progress = NoopProgress;
        assert!(!progress.is_interactive());
        assert!(!progress.is_cancelled());
        assert!(progress.confirm("rebuild?"));
    }
}
