use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the output stream being observed.
///
/// Structurally `session[:window[.pane]]`, e.g. `main`, `main:1` or
/// `main:1.2`. Equality is exact string equality; no normalization is
/// performed, so `main:1` and `main:1.0` are distinct targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

pub const DEFAULT_TARGET: &str = "default";

impl Target {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The session component (everything before the first `:`).
    pub fn session(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// The window component, if the target names one.
    pub fn window(&self) -> Option<&str> {
        let rest = self.0.split_once(':')?.1;
        Some(rest.split('.').next().unwrap_or(rest))
    }

    /// The pane component, if the target names one.
    pub fn pane(&self) -> Option<&str> {
        let rest = self.0.split_once(':')?.1;
        rest.split_once('.').map(|(_, pane)| pane)
    }
}

impl Default for Target {
    fn default() -> Self {
        Self(DEFAULT_TARGET.to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Target {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}
