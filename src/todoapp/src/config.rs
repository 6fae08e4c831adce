//! Typed environment configuration.
//!
//! Both variables are required and validated at startup: a missing or
//! malformed value aborts with an error naming the exact variable,
//! instead of surfacing later as a generic connection failure.

use std::path::PathBuf;

use crate::error::{Result, TodoError};

/// Location of the JSON store: a path or a `file://` URL.
pub const ENV_DATABASE_URL: &str = "TODO_DATABASE_URL";

/// TCP port the HTTP surface listens on.
pub const ENV_PORT: &str = "TODO_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an explicit lookup, so validation is testable without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup(ENV_DATABASE_URL)
            .ok_or_else(|| TodoError::Config(format!("{} is not set", ENV_DATABASE_URL)))?;
        let database_path = parse_database_url(&database_url)?;

        let port_value = lookup(ENV_PORT)
            .ok_or_else(|| TodoError::Config(format!("{} is not set", ENV_PORT)))?;
        let port: u16 = port_value.trim().parse().map_err(|_| {
            TodoError::Config(format!(
                "{} must be a TCP port (1-65535), got \"{}\"",
                ENV_PORT, port_value
            ))
        })?;
        if port == 0 {
            return Err(TodoError::Config(format!(
                "{} must be a TCP port (1-65535), got \"0\"",
                ENV_PORT
            )));
        }

        Ok(Self {
            database_path,
            port,
        })
    }
}

fn parse_database_url(value: &str) -> Result<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TodoError::Config(format!(
            "{} is empty",
            ENV_DATABASE_URL
        )));
    }
    let path = match value.strip_prefix("file://") {
        // file:// URLs must carry an absolute path
        Some(rest) if rest.starts_with('/') => rest,
        Some(_) => {
            return Err(TodoError::Config(format!(
                "{} must be an absolute file:// URL or a path, got \"{}\"",
                ENV_DATABASE_URL, value
            )))
        }
        None => value,
    };
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn loads_valid_configuration() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "file:///data/todos.json"),
            (ENV_PORT, "3000"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/data/todos.json"));
        assert_eq!(config.port, 3000);

        // Plain paths work too
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "./todos.json"),
            (ENV_PORT, "8080"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("./todos.json"));
    }

    #[test]
    fn missing_database_url_names_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[(ENV_PORT, "3000")])).unwrap_err();
        assert!(
            err.to_string().contains(ENV_DATABASE_URL),
            "error does not name the variable: {}",
            err
        );
    }

    #[test]
    fn missing_port_names_the_variable() {
        let err =
            AppConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "/data/todos.json")])).unwrap_err();
        assert!(err.to_string().contains(ENV_PORT), "got: {}", err);
    }

    #[test]
    fn malformed_port_is_rejected() {
        for bad in ["", "not-a-port", "70000", "0"] {
            let err = AppConfig::from_lookup(lookup(&[
                (ENV_DATABASE_URL, "/data/todos.json"),
                (ENV_PORT, bad),
            ]))
            .unwrap_err();
            assert!(err.to_string().contains(ENV_PORT), "got: {}", err);
        }
    }

    #[test]
    fn relative_file_url_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "file://todos.json"),
            (ENV_PORT, "3000"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(ENV_DATABASE_URL), "got: {}", err);
    }
}
