// UI layer: a spinner while the POST is in flight and a short, human
// readable outcome afterwards. Exit codes are decided here so `main` stays
// small.

use crate::submit::{ServerAck, SubmissionError};
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::time::Duration;

pub const SUCCESS_LINE: &str = "Data successfully submitted to Beeminder";

/// Run `f` with a spinner on stderr. indicatif hides it when stderr is not
/// a terminal, so piped output stays clean.
pub fn with_spinner<R>(message: &str, f: impl FnOnce() -> R) -> R {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = f();
    spinner.finish_and_clear();
    result
}

/// One-line diagnostic for a failed submission.
pub fn failure_line(err: &SubmissionError) -> String {
    format!("error ({}): {}", err.kind(), err)
}

/// Success banner followed by the acknowledgement as pretty JSON.
pub fn success_text(ack: &ServerAck) -> String {
    let pretty = serde_json::to_string_pretty(ack).unwrap_or_else(|_| ack.to_string());
    format!("{SUCCESS_LINE}\n{pretty}")
}

/// Configuration problems exit with 2, everything else with 1.
pub fn exit_code(result: &Result<ServerAck, SubmissionError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(SubmissionError::Config(_)) => ExitCode::from(2),
        Err(_) => ExitCode::FAILURE,
    }
}

/// Print the outcome and return the matching exit code.
pub fn report(result: &Result<ServerAck, SubmissionError>) -> ExitCode {
    match result {
        Ok(ack) => println!("{}", success_text(ack)),
        Err(err) => eprintln!("{}", failure_line(err)),
    }
    exit_code(result)
}
