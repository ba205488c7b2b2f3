use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod columns;
mod controller;
mod domain;
mod export;
mod filters;
mod inputter;
mod model;
mod palette;
mod records;
mod ui;

use controller::Controller;
use domain::{CrmConfig, CrmError};
use model::{Model, Status};
use ui::TableUI;

/// A tui based CRM workspace viewer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the workspace file (JSON)
    workspace: String,

    /// Name of the saved view to open first
    #[arg(long)]
    preset: Option<String>,

    /// Directory CSV exports are written to
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Log file location
    #[arg(long, default_value = "crmv.log")]
    log_file: String,
}

fn main() -> ExitCode {
    match run() {
        Err(e) => {
            ratatui::restore();
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => {
            ratatui::restore();
            ExitCode::SUCCESS
        }
    }
}

fn run() -> Result<(), CrmError> {
    let cli = Cli::parse();

    let log_file = File::create(&cli.log_file)?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(Arc::new(log_file)).with_ansi(false))
        .with(ErrorLayer::default())
        .init();
    info!("Starting crmv!");

    let workspace_path = shellexpand::full(&cli.workspace)
        .map_err(|e| CrmError::LoadingFailed(e.to_string()))?
        .into_owned();

    let mut config = CrmConfig::default();
    if let Some(dir) = cli.export_dir {
        config = config.export_dir(dir);
    }

    let mut terminal = ratatui::init();
    let size = terminal.size()?;
    let mut model = Model::load(
        &config,
        PathBuf::from(workspace_path),
        cli.preset.as_deref(),
        size.width as usize,
        size.height as usize,
    )?;
    let ui = TableUI::new(&config);
    let controller = Controller::new(&config);

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }

    model.persist()?;
    Ok(())
}
