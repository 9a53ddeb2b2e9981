//! Fleet core: pure operator-console state machine and view-model helpers.
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::Msg;
pub use state::{ConsoleState, ProgressSnapshot, ProviderInfo, RunOutcome, SessionState};
pub use update::update;
pub use view_model::{estimate, ConsoleViewModel, Eta, ProviderRowView, ScrapeStatus};
