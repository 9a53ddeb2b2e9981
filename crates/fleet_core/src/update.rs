use crate::{ConsoleState, Effect, Msg};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ConsoleState, msg: Msg) -> (ConsoleState, Vec<Effect>) {
    let effects = match msg {
        Msg::ProvidersRegistered(infos) => {
            state.register(infos);
            Vec::new()
        }
        Msg::StartClicked { provider, now_ms } => {
            // A start while a run is active (or aborting) is ignored; the
            // current run must report completion first.
            if state.begin_run(&provider, now_ms) {
                vec![Effect::StartScrape { provider }]
            } else {
                Vec::new()
            }
        }
        Msg::AbortClicked { provider } => {
            if state.begin_abort(&provider) {
                vec![Effect::AbortScrape { provider }]
            } else {
                Vec::new()
            }
        }
        Msg::ProgressPolled {
            provider,
            progress,
            now_ms,
        } => {
            state.apply_progress(&provider, progress, now_ms);
            Vec::new()
        }
        Msg::RunFinished {
            provider,
            outcome,
            now_ms,
        } => {
            state.apply_finished(&provider, outcome, now_ms);
            Vec::new()
        }
        Msg::Tick { now_ms } => {
            state.apply_tick(now_ms);
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
