//! Progress reporting for the batch loop.
//!
//! Adapts to the terminal: an animated bar on a TTY, line-by-line notes on
//! pipes, nothing in quiet mode.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress output mode based on terminal capabilities and user flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Animated progress bar.
    Tty,
    /// Plain line output to stderr.
    NonTty,
    /// No progress output.
    Quiet,
}

impl ProgressMode {
    /// Detect the appropriate mode.
    #[must_use]
    pub fn detect(quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if std::io::stderr().is_terminal() {
            Self::Tty
        } else {
            Self::NonTty
        }
    }
}

/// Builds progress bars appropriate for the detected mode.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReporter {
    mode: ProgressMode,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            mode: ProgressMode::detect(quiet),
        }
    }

    /// A determinate bar over `total` records; hidden off-TTY.
    #[must_use]
    pub fn bar(&self, total: u64, message: &'static str) -> ProgressBar {
        match self.mode {
            ProgressMode::Tty => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar.set_message(message);
                bar
            }
            ProgressMode::NonTty | ProgressMode::Quiet => ProgressBar::hidden(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_wins_over_terminal() {
        assert_eq!(ProgressMode::detect(true), ProgressMode::Quiet);
    }

    #[test]
    fn test_hidden_bar_for_quiet() {
        let reporter = ProgressReporter::new(true);
        let bar = reporter.bar(10, "importing");
        assert!(bar.is_hidden());
    }
}
