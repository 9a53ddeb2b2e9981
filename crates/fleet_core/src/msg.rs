use crate::{ProgressSnapshot, ProviderInfo, RunOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Providers known to the embedding system, registered at startup.
    ProvidersRegistered(Vec<ProviderInfo>),
    /// Operator asked to start a run for a provider.
    StartClicked { provider: String, now_ms: u64 },
    /// Operator asked to abort the active run of a provider.
    AbortClicked { provider: String },
    /// Progress polled from a running scrape.
    ProgressPolled {
        provider: String,
        progress: ProgressSnapshot,
        now_ms: u64,
    },
    /// The run's completion callback fired.
    RunFinished {
        provider: String,
        outcome: RunOutcome,
        now_ms: u64,
    },
    /// Periodic tick so elapsed-time based views stay current.
    Tick { now_ms: u64 },
    NoOp,
}
