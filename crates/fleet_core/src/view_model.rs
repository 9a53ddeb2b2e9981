use std::fmt;

use crate::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStatus {
    /// The provider has no scraper.
    NotAvailable,
    NotScraping,
    Scraping,
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeStatus::NotAvailable => write!(f, "N/A"),
            ScrapeStatus::NotScraping => write!(f, "Not Scraping"),
            ScrapeStatus::Scraping => write!(f, "Scraping"),
        }
    }
}

/// Estimated time to completion of a running scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Nothing discovered yet, so there is no denominator.
    NotAvailable,
    /// Items are known but none has completed.
    Never,
    Remaining { hours: u64, minutes: u64, seconds: u64 },
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::NotAvailable => write!(f, "N/A"),
            Eta::Never => write!(f, "Never"),
            Eta::Remaining {
                hours,
                minutes,
                seconds,
            } => write!(f, "{hours}h, {minutes}m, {seconds}s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRowView {
    pub name: String,
    pub pretty_name: String,
    pub status: ScrapeStatus,
    pub aborting: bool,
    /// `"<stage> (<completed> / <total>)"` once progress has been polled.
    pub stage_line: Option<String>,
    pub progress_percent: u32,
    pub eta: Eta,
    pub last_outcome: Option<RunOutcome>,
    pub last_elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsoleViewModel {
    pub providers: Vec<ProviderRowView>,
    pub dirty: bool,
}

impl ConsoleViewModel {
    pub fn provider(&self, name: &str) -> Option<&ProviderRowView> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Progress percentage and linear time-to-complete estimate.
///
/// Elapsed time is truncated to whole seconds before extrapolating.
pub fn estimate(completed: usize, total: usize, elapsed_ms: u64) -> (u32, Eta) {
    if total == 0 {
        return (0, Eta::NotAvailable);
    }
    let percent = ((completed as u64 * 100) / total as u64).min(100) as u32;
    if completed == 0 {
        return (percent, Eta::Never);
    }
    let remaining = total.saturating_sub(completed) as u64;
    let secs = (elapsed_ms / 1000) * remaining / completed as u64;
    (
        percent,
        Eta::Remaining {
            hours: secs / 3600,
            minutes: (secs / 60) % 60,
            seconds: secs % 60,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_extrapolates_linearly() {
        // 10 of 40 done in 100s: 300s remaining.
        let (percent, eta) = estimate(10, 40, 100_500);
        assert_eq!(percent, 25);
        assert_eq!(
            eta,
            Eta::Remaining {
                hours: 0,
                minutes: 5,
                seconds: 0
            }
        );
        assert_eq!(eta.to_string(), "0h, 5m, 0s");
    }

    #[test]
    fn estimate_edge_cases() {
        assert_eq!(estimate(0, 0, 5_000), (0, Eta::NotAvailable));
        assert_eq!(estimate(0, 7, 5_000), (0, Eta::Never));
        assert_eq!(
            estimate(7, 7, 5_000),
            (
                100,
                Eta::Remaining {
                    hours: 0,
                    minutes: 0,
                    seconds: 0
                }
            )
        );
    }
}
