// Configuration module: loads the Beeminder credentials and goal metadata
// from a small JSON file. The file is read fresh on every run and handed to
// the submitter as a plain struct.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the working directory, next to the executable
/// and under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "beeminder.json";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "BEEMINDER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no beeminder.json found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{field}` is missing or empty in {}", .path.display())]
    MissingField { path: PathBuf, field: &'static str },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Credentials and goal metadata for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct GoalCredentials {
    pub username: String,
    pub goal_name: String,
    pub auth_token: String,
    pub base_comment: String,
}

// The token must never end up in logs.
impl fmt::Debug for GoalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalCredentials")
            .field("username", &self.username)
            .field("goal_name", &self.goal_name)
            .field("auth_token", &"<redacted>")
            .field("base_comment", &self.base_comment)
            .finish()
    }
}

/// On-disk shape. Every key is optional here so a missing key can be
/// reported by name instead of as a generic serde error.
#[derive(Deserialize)]
struct RawConfig {
    username: Option<String>,
    goalname: Option<String>,
    auth_token: Option<String>,
    comment: Option<String>,
}

impl GoalCredentials {
    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    searched: vec![path.to_path_buf()],
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_json(&contents, path)
    }

    /// Parse config contents. `origin` is only used in error messages.
    pub fn from_json(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let require = |value: Option<String>, field: &'static str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingField {
                    path: origin.to_path_buf(),
                    field,
                })
        };

        Ok(GoalCredentials {
            username: require(raw.username, "username")?,
            goal_name: require(raw.goalname, "goalname")?,
            auth_token: require(raw.auth_token, "auth_token")?,
            base_comment: require(raw.comment, "comment")?,
        })
    }
}

/// Ordered list of places to look for the config file.
///
/// An explicit path or the `BEEMINDER_CONFIG` value short-circuits the
/// search: when either is given it is the only candidate.
pub fn candidate_paths(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    if let Some(path) = from_env.filter(|p| !p.as_os_str().is_empty()) {
        return vec![path];
    }

    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = exe_dir {
        paths.push(dir.join(CONFIG_FILE_NAME));
    }
    if let Some(dir) = config_dir {
        paths.push(dir.join("beeminder").join(CONFIG_FILE_NAME));
    }
    paths
}

/// Pick the first existing candidate for this process.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let searched = candidate_paths(explicit, from_env, exe_dir, dirs::config_dir());

    match searched.iter().find(|p| p.is_file()) {
        Some(found) => {
            tracing::debug!(path = %found.display(), "using config file");
            Ok(found.clone())
        }
        None => Err(ConfigError::NotFound { searched }),
    }
}

/// Resolve and load in one step, as the binary does.
pub fn load(explicit: Option<&Path>) -> Result<GoalCredentials, ConfigError> {
    let path = resolve_path(explicit)?;
    GoalCredentials::load(&path)
}
