//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::{
    DEFAULT_CLINIC_NAME, DEFAULT_DATABASE_URL, DEFAULT_MAX_CONNECTIONS, MAX_MAX_CONNECTIONS,
};
use crate::{LabError, LabResult};
use lab_types::NonEmptyText;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_url: String,
    max_connections: u32,
    clinic_name: NonEmptyText,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        database_url: String,
        max_connections: u32,
        clinic_name: NonEmptyText,
    ) -> LabResult<Self> {
        if !database_url.starts_with("sqlite:") {
            return Err(LabError::InvalidInput(
                "database_url must be a sqlite: URL".into(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections,
            clinic_name,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn clinic_name(&self) -> &str {
        self.clinic_name.as_str()
    }
}

/// Resolve the database URL from an optional environment value.
///
/// Empty or whitespace values fall back to [`DEFAULT_DATABASE_URL`].
pub fn database_url_from_env_value(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

/// Parse the pool size from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_MAX_CONNECTIONS`].
pub fn max_connections_from_env_value(value: Option<String>) -> LabResult<u32> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(raw) = value else {
        return Ok(DEFAULT_MAX_CONNECTIONS);
    };

    let parsed: u32 = raw.parse().map_err(|_| {
        LabError::InvalidInput(format!("LAB_DB_MAX_CONNECTIONS is not a number: {raw}"))
    })?;

    if parsed == 0 || parsed > MAX_MAX_CONNECTIONS {
        return Err(LabError::InvalidInput(format!(
            "LAB_DB_MAX_CONNECTIONS must be between 1 and {MAX_MAX_CONNECTIONS}"
        )));
    }

    Ok(parsed)
}

/// Resolve the clinic letterhead name, falling back to [`DEFAULT_CLINIC_NAME`].
pub fn clinic_name_from_env_value(value: Option<String>) -> LabResult<NonEmptyText> {
    match value.and_then(|v| NonEmptyText::new(v).ok()) {
        Some(name) => Ok(name),
        None => Ok(NonEmptyText::new(DEFAULT_CLINIC_NAME)?),
    }
}
