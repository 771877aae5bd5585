// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, load config, build the submitter
//   and hand the result to the UI layer for reporting.

use beeminder_add::{api, config, ui, SubmissionError, Submitter};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Add a +1 datapoint to a Beeminder goal.
#[derive(Debug, Parser)]
#[command(name = "beeminder-add", version)]
struct Cli {
    /// Path to beeminder.json. Defaults to $BEEMINDER_CONFIG, then
    /// ./beeminder.json, then next to the executable.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Extra note appended to the configured comment.
    note: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let credentials = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => return ui::report(&Err(SubmissionError::from(e))),
    };

    let transport = match api::ReqwestTransport::new() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error (setup): {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let submitter = Submitter::new(credentials, transport)
        .with_base_url(api::base_url_from_env())
        .with_timeout(Duration::from_secs(cli.timeout));

    let note = cli.note.join(" ");
    let note = (!note.is_empty()).then_some(note.as_str());

    let result = ui::with_spinner("Submitting to Beeminder...", || submitter.submit(note));
    ui::report(&result)
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
