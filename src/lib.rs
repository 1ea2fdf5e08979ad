pub mod handlers;
pub mod models;
pub mod services;
pub mod settings;

use std::time::Instant;

use settings::Settings;
use services::{coordinator::FellowshipHandle, metrics::Metrics};

#[derive(Clone)]
pub struct AppState {
    pub fellowship: FellowshipHandle,
    pub metrics: Metrics,
    pub settings: Settings,
    pub start_time: Instant,
}

impl AppState {
    /// Spawn a coordinator configured from `settings`. Needs a tokio runtime.
    pub fn new(settings: Settings) -> Self {
        let metrics = Metrics::new();
        let fellowship = FellowshipHandle::spawn(settings.coordinator(), metrics.clone());
        Self {
            fellowship,
            metrics,
            settings,
            start_time: Instant::now(),
        }
    }
}
