mod app;
mod config;
mod engine;
mod error;
mod logging;
mod model;
mod nav;
mod report;
mod services;
mod theme;
mod ui;
mod widgets;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    let log_path = logging::init()?;
    let (settings, config_path) = config::load()?;
    info!(
        api_url = %settings.api_url,
        mock = settings.mock_mode,
        config = ?config_path,
        "starting survey-tui"
    );
    let res = ui::run(settings, config_path, log_path);
    if let Err(e) = &res {
        error!(error = %e, "survey-tui exited with an error");
    }
    res
}
