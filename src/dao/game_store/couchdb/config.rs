use std::time::Duration;

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_VAR: &str = "COUCH_BASE_URL";
const DATABASE_VAR: &str = "COUCH_DB";
const USERNAME_VAR: &str = "COUCH_USERNAME";
const PASSWORD_VAR: &str = "COUCH_PASSWORD";
const CHANGES_TIMEOUT_VAR: &str = "COUCH_CHANGES_TIMEOUT_SECS";

/// Long-poll window used when none is configured.
const DEFAULT_CHANGES_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the shared round store lives and how to reach it.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    /// Basic-auth pair; only set when both halves are present.
    pub credentials: Option<(String, String)>,
    /// How long a single `_changes` long-poll request may stay open.
    pub changes_timeout: Duration,
}

impl CouchConfig {
    /// Read the connection settings from the process environment.
    pub fn from_env() -> CouchResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> CouchResult<Self> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|value| !value.trim().is_empty())
                .ok_or(CouchDaoError::MissingEnvVar { var })
        };

        let base_url = required(BASE_URL_VAR)?.trim_end_matches('/').to_string();
        let database = required(DATABASE_VAR)?;
        let credentials = lookup(USERNAME_VAR).zip(lookup(PASSWORD_VAR));

        let changes_timeout = match lookup(CHANGES_TIMEOUT_VAR) {
            None => DEFAULT_CHANGES_TIMEOUT,
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| CouchDaoError::InvalidEnvVar {
                    var: CHANGES_TIMEOUT_VAR,
                    value: raw,
                })?,
        };

        Ok(Self {
            base_url,
            database,
            credentials,
            changes_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_in(
        vars: &[(&'static str, &'static str)],
    ) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<_, _> = vars.iter().copied().collect();
        move |var| vars.get(var).map(|value| value.to_string())
    }

    #[test]
    fn reads_required_settings_with_defaults() {
        let config = CouchConfig::from_lookup(lookup_in(&[
            (BASE_URL_VAR, "http://couch:5984/"),
            (DATABASE_VAR, "rounds"),
            (USERNAME_VAR, "admin"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://couch:5984");
        assert_eq!(config.database, "rounds");
        assert!(config.credentials.is_none());
        assert_eq!(config.changes_timeout, DEFAULT_CHANGES_TIMEOUT);
    }

    #[test]
    fn missing_database_is_reported_by_name() {
        let err = CouchConfig::from_lookup(lookup_in(&[(BASE_URL_VAR, "http://couch:5984")]))
            .unwrap_err();
        assert!(matches!(err, CouchDaoError::MissingEnvVar { var } if var == DATABASE_VAR));
    }

    #[test]
    fn malformed_changes_timeout_is_rejected() {
        let err = CouchConfig::from_lookup(lookup_in(&[
            (BASE_URL_VAR, "http://couch:5984"),
            (DATABASE_VAR, "rounds"),
            (CHANGES_TIMEOUT_VAR, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, CouchDaoError::InvalidEnvVar { .. }));
    }
}
