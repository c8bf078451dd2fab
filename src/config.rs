use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::deadline::DEFAULT_TIMEOUT;
use crate::error::SqlSessionError;
use crate::render::DEFAULT_PREVIEW_ROWS;
use crate::types::DriverKind;

/// Session settings, typically loaded from JSON.
///
/// ```rust
/// use sql_session::prelude::*;
///
/// let config = SessionConfig::from_json_str(r#"{ "default_timeout_secs": 30, "preview_rows": 0 }"#)?;
/// assert_eq!(config.default_timeout(), Some(std::time::Duration::from_secs(30)));
/// # Ok::<(), SqlSessionError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Ceiling for every execution in seconds; `null` disables it.
    pub default_timeout_secs: Option<f64>,
    /// Rows shown in result previews; `<= 0` shows all.
    pub preview_rows: i64,
    pub driver: DriverKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: Some(DEFAULT_TIMEOUT.as_secs_f64()),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            driver: DriverKind::default(),
        }
    }
}

impl SessionConfig {
    /// # Errors
    /// Returns `Config` for malformed JSON or out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, SqlSessionError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Config` when the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SqlSessionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            SqlSessionError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout_secs = timeout.map(|t| t.as_secs_f64());
        self
    }

    #[must_use]
    pub fn with_preview_rows(mut self, preview_rows: i64) -> Self {
        self.preview_rows = preview_rows;
        self
    }

    #[must_use]
    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    fn validate(&self) -> Result<(), SqlSessionError> {
        match self.default_timeout_secs {
            Some(secs) if Duration::try_from_secs_f64(secs).is_err() => {
                Err(SqlSessionError::Config(format!(
                    "default_timeout_secs must be a non-negative number of seconds in range, got {secs}"
                )))
            }
            _ => Ok(()),
        }
    }
}
