// Library root
// -----------
// This crate exposes a small library surface for the CLI. The binary
// (`main.rs`) wires these modules together to post a single datapoint.
//
// Module responsibilities:
// - `config`: GoalCredentials and discovery/loading of `beeminder.json`.
// - `api`: the Beeminder endpoint and the HTTP transport seam.
// - `retry`: attempt ceiling, backoff delays and retryable statuses.
// - `submit`: builds the datapoint and drives the POST with retries.
// - `ui`: spinner and one-line outcome reporting.
pub mod api;
pub mod config;
pub mod retry;
pub mod submit;
pub mod ui;

pub use config::{ConfigError, GoalCredentials};
pub use submit::{Datapoint, ServerAck, SubmissionError, Submitter};
