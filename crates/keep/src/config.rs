// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::{DEFAULT_PUBLIC_PATH, DEFAULT_REFRESH_LEAD_SECS};
use crate::redirect::DEFAULT_LOGIN_PATH;

/// Directory name used under the platform state directory.
const STATE_DIR_NAME: &str = "authkeep";

/// Configuration for the authkeep host.
#[derive(Debug, Clone, clap::Args)]
pub struct KeepConfig {
    /// Base URL that relative call targets and the login path resolve against.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "AUTHKEEP_BASE_URL")]
    pub base_url: String,

    /// Re-authentication entry point.
    #[arg(long, default_value = DEFAULT_LOGIN_PATH, env = "AUTHKEEP_LOGIN_PATH")]
    pub login_path: String,

    /// Target fragments that never carry a credential (comma-separated).
    #[arg(
        long = "public-path",
        default_value = DEFAULT_PUBLIC_PATH,
        value_delimiter = ',',
        env = "AUTHKEEP_PUBLIC_PATHS"
    )]
    pub public_paths: Vec<String>,

    /// Directory holding the durable credential and per-session state.
    #[arg(long, env = "AUTHKEEP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Browsing session id. The pending queue and return marker are scoped to it.
    #[arg(long, default_value = "default", env = "AUTHKEEP_SESSION")]
    pub session: String,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "AUTHKEEP_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Refresh proactively when the credential expires within this many seconds.
    #[arg(long, default_value_t = DEFAULT_REFRESH_LEAD_SECS, env = "AUTHKEEP_REFRESH_LEAD_SECS")]
    pub refresh_lead_secs: u64,

    /// OAuth token endpoint for silent refresh.
    #[arg(long, env = "AUTHKEEP_TOKEN_URL")]
    pub token_url: Option<String>,

    /// OAuth client id for silent refresh.
    #[arg(long, env = "AUTHKEEP_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "AUTHKEEP_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "AUTHKEEP_LOG_LEVEL")]
    pub log_level: String,
}

impl KeepConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("--base-url must be an http(s) URL: {}", self.base_url);
        }
        if !self.login_path.starts_with('/') {
            anyhow::bail!("--login-path must start with '/': {}", self.login_path);
        }
        if self.session.trim().is_empty() {
            anyhow::bail!("--session must not be empty");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be positive");
        }
        match (&self.token_url, &self.client_id) {
            (Some(_), None) => anyhow::bail!("--token-url requires --client-id"),
            (None, Some(_)) => anyhow::bail!("--client-id requires --token-url"),
            _ => {}
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid --log-format: {other}"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Token endpoint and client id, when silent refresh is configured.
    pub fn oauth(&self) -> Option<(&str, &str)> {
        Some((self.token_url.as_deref()?, self.client_id.as_deref()?))
    }

    /// Public fragments with blanks dropped.
    pub fn public_paths(&self) -> Vec<String> {
        self.public_paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).map(str::to_owned).collect()
    }

    /// Resolve the state directory from the process environment.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir_with(|name| std::env::var(name).ok())
    }

    /// Resolve the state directory: explicit setting, then
    /// `$XDG_STATE_HOME/authkeep`, then `$HOME/.local/state/authkeep`, then
    /// `.authkeep` in the working directory.
    pub fn state_dir_with(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        let non_empty = |name: &str| env(name).filter(|v| !v.is_empty());
        if let Some(xdg) = non_empty("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join(STATE_DIR_NAME);
        }
        if let Some(home) = non_empty("HOME") {
            return PathBuf::from(home).join(".local").join("state").join(STATE_DIR_NAME);
        }
        PathBuf::from(format!(".{STATE_DIR_NAME}"))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
