use std::collections::BTreeMap;

use crate::view_model::{estimate, ConsoleViewModel, ProviderRowView, ScrapeStatus};

/// Static description of a provider, as registered by the embedding system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: String,
    pub pretty_name: String,
    pub can_scrape: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Scraping,
    Aborting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted,
    Failed(String),
}

/// Last polled `(stage, completed, total)` triple of a running scrape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProviderSession {
    info: ProviderInfo,
    state: SessionState,
    started_at_ms: Option<u64>,
    progress: Option<ProgressSnapshot>,
    last_outcome: Option<RunOutcome>,
    last_elapsed_ms: Option<u64>,
}

impl ProviderSession {
    fn new(info: ProviderInfo) -> Self {
        Self {
            info,
            state: SessionState::Idle,
            started_at_ms: None,
            progress: None,
            last_outcome: None,
            last_elapsed_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsoleState {
    providers: BTreeMap<String, ProviderSession>,
    now_ms: u64,
    dirty: bool,
}

impl ConsoleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, provider: &str) -> Option<SessionState> {
        self.providers.get(provider).map(|s| s.state)
    }

    pub fn is_any_active(&self) -> bool {
        self.providers
            .values()
            .any(|s| s.state != SessionState::Idle)
    }

    pub fn view(&self) -> ConsoleViewModel {
        let providers = self
            .providers
            .values()
            .map(|session| self.row_view(session))
            .collect();
        ConsoleViewModel {
            providers,
            dirty: self.dirty,
        }
    }

    /// Returns and clears the dirty flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn row_view(&self, session: &ProviderSession) -> ProviderRowView {
        let status = if !session.info.can_scrape {
            ScrapeStatus::NotAvailable
        } else if session.state == SessionState::Idle {
            ScrapeStatus::NotScraping
        } else {
            ScrapeStatus::Scraping
        };

        let (stage_line, progress_percent, eta) = match (status, session.progress.as_ref()) {
            (ScrapeStatus::Scraping, Some(progress)) => {
                let elapsed_ms = session
                    .started_at_ms
                    .map(|start| self.now_ms.saturating_sub(start))
                    .unwrap_or(0);
                let (percent, eta) = estimate(progress.completed, progress.total, elapsed_ms);
                let line = format!(
                    "{} ({} / {})",
                    progress.stage, progress.completed, progress.total
                );
                (Some(line), percent, eta)
            }
            (ScrapeStatus::Scraping, None) => {
                let (percent, eta) = estimate(0, 0, 0);
                (None, percent, eta)
            }
            _ => (None, 0, crate::Eta::NotAvailable),
        };

        ProviderRowView {
            name: session.info.name.clone(),
            pretty_name: session.info.pretty_name.clone(),
            status,
            aborting: session.state == SessionState::Aborting,
            stage_line,
            progress_percent,
            eta,
            last_outcome: session.last_outcome.clone(),
            last_elapsed_ms: session.last_elapsed_ms,
        }
    }

    pub(crate) fn register(&mut self, infos: Vec<ProviderInfo>) {
        for info in infos {
            match self.providers.get_mut(&info.name) {
                Some(existing) => existing.info = info,
                None => {
                    self.providers
                        .insert(info.name.clone(), ProviderSession::new(info));
                }
            }
        }
        self.dirty = true;
    }

    /// Moves an idle, scrapable provider into `Scraping`. Returns false if the
    /// start request must be ignored.
    pub(crate) fn begin_run(&mut self, provider: &str, now_ms: u64) -> bool {
        self.now_ms = self.now_ms.max(now_ms);
        let Some(session) = self.providers.get_mut(provider) else {
            return false;
        };
        if !session.info.can_scrape || session.state != SessionState::Idle {
            return false;
        }
        session.state = SessionState::Scraping;
        session.started_at_ms = Some(now_ms);
        session.progress = None;
        session.last_outcome = None;
        session.last_elapsed_ms = None;
        self.dirty = true;
        true
    }

    /// Moves a scraping provider into `Aborting`. A second abort is ignored.
    pub(crate) fn begin_abort(&mut self, provider: &str) -> bool {
        let Some(session) = self.providers.get_mut(provider) else {
            return false;
        };
        if session.state != SessionState::Scraping {
            return false;
        }
        session.state = SessionState::Aborting;
        self.dirty = true;
        true
    }

    pub(crate) fn apply_progress(&mut self, provider: &str, progress: ProgressSnapshot, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        let Some(session) = self.providers.get_mut(provider) else {
            return;
        };
        if session.state == SessionState::Idle {
            return;
        }
        if session.progress.as_ref() != Some(&progress) {
            session.progress = Some(progress);
        }
        self.dirty = true;
    }

    pub(crate) fn apply_finished(&mut self, provider: &str, outcome: RunOutcome, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        let Some(session) = self.providers.get_mut(provider) else {
            return;
        };
        session.last_elapsed_ms = session
            .started_at_ms
            .map(|start| now_ms.saturating_sub(start));
        session.state = SessionState::Idle;
        session.started_at_ms = None;
        session.progress = None;
        session.last_outcome = Some(outcome);
        self.dirty = true;
    }

    pub(crate) fn apply_tick(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        if self.is_any_active() {
            self.dirty = true;
        }
    }
}
