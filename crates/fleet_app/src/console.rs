use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_core::{
    update, ConsoleState, ConsoleViewModel, Effect, Msg, ProgressSnapshot, ProviderInfo,
    RunOutcome,
};
use fleet_engine::{
    FetchBroker, FetchError, PoolError, ProviderEntry, ProviderRegistry, RecordStore,
    ReqwestFetcher, ScrapeHandle, ScrapeOrchestrator,
};
use fleet_logging::{fleet_error, fleet_info};
use tokio::sync::mpsc;

use crate::config::FleetConfig;
use crate::context::{
    error_log_path, read_last_lines, status_log_path, FileScraperContext, ERROR_TAIL, STATUS_TAIL,
};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
enum LaunchError {
    #[error("provider {0} cannot scrape")]
    NotScrapable(String),
    #[error("http client: {0}")]
    Fetch(#[from] FetchError),
    #[error("proxy pool: {0}")]
    Pool(#[from] PoolError),
    #[error("log files: {0}")]
    Logs(#[from] io::Error),
}

/// Headless operator console: feeds messages through the core state machine
/// and executes the effects it asks for.
pub struct Console {
    config: FleetConfig,
    registry: ProviderRegistry,
    store: Arc<dyn RecordStore>,
    epoch: Instant,
    state: ConsoleState,
    runs: HashMap<String, ScrapeHandle>,
    msg_tx: mpsc::UnboundedSender<Msg>,
    msg_rx: mpsc::UnboundedReceiver<Msg>,
}

impl Console {
    pub fn new(
        config: FleetConfig,
        registry: ProviderRegistry,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry,
            store,
            epoch: Instant::now(),
            state: ConsoleState::new(),
            runs: HashMap::new(),
            msg_tx,
            msg_rx,
        }
    }

    /// Runs one scrape of `provider` to completion. Ctrl-C requests an abort.
    pub async fn run(mut self, provider: &str) -> RunOutcome {
        let infos = self
            .registry
            .entries()
            .map(|entry| ProviderInfo {
                name: entry.short_name.clone(),
                pretty_name: entry.pretty_name.clone(),
                can_scrape: entry.can_scrape(),
            })
            .collect();
        self.dispatch(Msg::ProvidersRegistered(infos));
        self.dispatch(Msg::StartClicked {
            provider: provider.to_string(),
            now_ms: self.now_ms(),
        });
        if !self.state.is_any_active() {
            return RunOutcome::Failed(format!("provider {provider} cannot scrape"));
        }

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll(),
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        fleet_error!("ctrl-c handler failed: {}", err);
                    }
                    self.dispatch(Msg::AbortClicked { provider: provider.to_string() });
                }
                Some(msg) = self.msg_rx.recv() => {
                    let finished = matches!(&msg, Msg::RunFinished { provider: p, .. } if p == provider);
                    self.dispatch(msg);
                    if finished {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = self.runs.remove(provider) {
            handle.wait().await;
        }
        self.print_log_tails(provider);
        self.state
            .view()
            .provider(provider)
            .and_then(|row| row.last_outcome.clone())
            .unwrap_or(RunOutcome::Aborted)
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn poll(&mut self) {
        let now_ms = self.now_ms();
        let polled: Vec<Msg> = self
            .runs
            .iter()
            .map(|(provider, handle)| {
                let progress = handle.progress();
                Msg::ProgressPolled {
                    provider: provider.clone(),
                    progress: ProgressSnapshot {
                        stage: progress.phase.label().to_string(),
                        completed: progress.completed,
                        total: progress.total,
                    },
                    now_ms,
                }
            })
            .collect();
        for msg in polled {
            self.dispatch(msg);
        }
        self.dispatch(Msg::Tick { now_ms });
    }

    fn dispatch(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (mut state, effects) = update(state, msg);
        let view = state.view();
        let was_dirty = state.consume_dirty();
        self.state = state;

        self.run_effects(effects);
        if was_dirty {
            render(&view);
        }
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartScrape { provider } => self.start_scrape(provider),
                Effect::AbortScrape { provider } => {
                    if let Some(handle) = self.runs.get(&provider) {
                        handle.abort();
                    }
                }
            }
        }
    }

    fn start_scrape(&mut self, provider: String) {
        match self.launch(&provider) {
            Ok(handle) => {
                fleet_info!("scrape of {} started", provider);
                self.runs.insert(provider, handle);
            }
            Err(err) => {
                fleet_error!("could not start {}: {}", provider, err);
                let finished = Msg::RunFinished {
                    provider,
                    outcome: RunOutcome::Failed(err.to_string()),
                    now_ms: self.now_ms(),
                };
                // The receiver lives in `self`, so this cannot fail.
                let _ = self.msg_tx.send(finished);
            }
        }
    }

    fn launch(&self, provider: &str) -> Result<ScrapeHandle, LaunchError> {
        let scraper = self
            .registry
            .get(provider)
            .and_then(ProviderEntry::scraper)
            .ok_or_else(|| LaunchError::NotScrapable(provider.to_string()))?;
        let fetcher = Arc::new(ReqwestFetcher::new(self.config.fetch_settings())?);
        let broker = FetchBroker::launch(
            fetcher,
            self.config.pool_settings(),
            self.config.broker_settings(),
        )?;
        let context = FileScraperContext::begin(
            provider,
            &self.config.log_dir,
            self.epoch,
            self.msg_tx.clone(),
        )?;
        Ok(ScrapeOrchestrator::new(
            scraper,
            Arc::new(broker),
            self.store.clone(),
            Arc::new(context),
            self.config.scrape_settings(provider),
        )
        .start())
    }

    fn print_log_tails(&self, provider: &str) {
        let log_dir = &self.config.log_dir;
        let tails = [
            ("status", status_log_path(log_dir, provider), STATUS_TAIL),
            ("errors", error_log_path(log_dir, provider), ERROR_TAIL),
        ];
        for (title, path, lines) in tails {
            match read_last_lines(&path, lines) {
                Ok(lines) if lines.is_empty() => {}
                Ok(lines) => {
                    println!("--- {title} (newest first) ---");
                    for line in lines {
                        println!("{line}");
                    }
                }
                Err(err) => fleet_error!("failed to read {:?}: {}", path, err),
            }
        }
    }
}

fn render(view: &ConsoleViewModel) {
    for row in &view.providers {
        let Some(stage) = &row.stage_line else {
            continue;
        };
        let aborting = if row.aborting { ", aborting" } else { "" };
        println!(
            "{} [{}{}] {} {}% ETA {}",
            row.pretty_name, row.status, aborting, stage, row.progress_percent, row.eta
        );
    }
}
