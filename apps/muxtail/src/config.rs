use std::env;

use crate::session::Target;

/// Muxtail client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The output server address, with an optional scheme. `https://` or
    /// `wss://` selects TLS for both the REST and live endpoints.
    pub server: String,
}

const SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

impl Config {
    pub fn new(server: impl Into<String>) -> Self {
        let server = server.into();
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        let server = if let Some(rest) = server.strip_prefix("localhost:") {
            format!("127.0.0.1:{rest}")
        } else {
            server
        };
        Self { server }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let server =
            env::var("MUXTAIL_SERVER").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        Self::new(server)
    }

    fn secure(&self) -> bool {
        self.server.starts_with("https://") || self.server.starts_with("wss://")
    }

    fn authority(&self) -> &str {
        SCHEMES
            .iter()
            .find_map(|scheme| self.server.strip_prefix(scheme))
            .unwrap_or(&self.server)
    }

    /// Base URL for the REST output API.
    pub fn http_base(&self) -> String {
        let scheme = if self.secure() { "https" } else { "http" };
        format!("{}://{}", scheme, self.authority())
    }

    /// URL of the live output channel for a target.
    pub fn ws_url(&self, target: &Target) -> String {
        let scheme = if self.secure() { "wss" } else { "ws" };
        format!("{}://{}/api/tmux/ws/{}", scheme, self.authority(), target)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:8000".to_string(),
        }
    }
}
