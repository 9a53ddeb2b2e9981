/// Side effects requested by the console state machine; executed by the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartScrape { provider: String },
    AbortScrape { provider: String },
}
