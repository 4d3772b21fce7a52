//! Startup configuration read from environment variables.

use log::{info, warn};
use std::{fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use crate::error::ConfigError;

pub const DEFAULT_ADMIN_TOKEN: &str = "admin123";

/// Where stories and users are stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Workbook snapshot on local disk
    Local { path: PathBuf },

    /// Google spreadsheet, reached with a service account
    Google {
        spreadsheet_id: String,
        service_account_key: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub admin_token: String,
    pub backend: Backend,
    pub upload_dir: PathBuf,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// * `ConfigError` if a variable is set to an unusable value
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    /// * `ConfigError::Invalid` if `PORT` is not a port number
    /// * `ConfigError::Unreadable` if `GOOGLE_SERVICE_ACCOUNT_KEY` names a file that cannot be read
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let admin_token = var("ADMIN_TOKEN").unwrap_or_else(|| {
            warn!("ADMIN_TOKEN not set, using the default token; set it before deploying");
            DEFAULT_ADMIN_TOKEN.to_string()
        });

        let backend = match (var("GOOGLE_SPREADSHEET_ID"), var("GOOGLE_SERVICE_ACCOUNT_KEY")) {
            (Some(spreadsheet_id), Some(key)) => Backend::Google {
                spreadsheet_id,
                service_account_key: read_key(&key)?,
            },
            (Some(_), None) | (None, Some(_)) => {
                warn!(
                    "GOOGLE_SPREADSHEET_ID and GOOGLE_SERVICE_ACCOUNT_KEY must both be set, falling back to local workbook"
                );
                local_backend(&var)
            }
            (None, None) => local_backend(&var),
        };

        Ok(Config {
            host: try_load(&var, "HOST", "0.0.0.0")?,
            port: try_load(&var, "PORT", "3001")?,
            admin_token,
            backend,
            upload_dir: try_load(&var, "UPLOAD_DIR", "uploads")?,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn local_backend(var: &impl Fn(&str) -> Option<String>) -> Backend {
    let path = var("WORKBOOK_PATH").unwrap_or_else(|| "database/cms.bin.gz".to_string());
    Backend::Local { path: path.into() }
}

fn try_load<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
}

// The key may be given inline as JSON or as a path to the JSON file.
fn read_key(value: &str) -> Result<String, ConfigError> {
    if value.trim_start().starts_with('{') {
        return Ok(value.to_string());
    }

    read_to_string(value).map_err(|e| ConfigError::Unreadable {
        key: "GOOGLE_SERVICE_ACCOUNT_KEY",
        reason: format!("{value}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.address(), "0.0.0.0:3001");
        assert_eq!(config.admin_token, DEFAULT_ADMIN_TOKEN);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(
            config.backend,
            Backend::Local {
                path: PathBuf::from("database/cms.bin.gz")
            }
        );
    }

    #[test]
    fn explicit_values_win() {
        let config = config(&[
            ("PORT", "8080"),
            ("ADMIN_TOKEN", "s3cret"),
            ("WORKBOOK_PATH", "/var/lib/cms.bin.gz"),
            ("UPLOAD_DIR", "/srv/uploads"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.admin_token, "s3cret");
        assert_eq!(config.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(
            config.backend,
            Backend::Local {
                path: PathBuf::from("/var/lib/cms.bin.gz")
            }
        );
    }

    #[test]
    fn blank_admin_token_falls_back_to_default() {
        assert_eq!(config(&[("ADMIN_TOKEN", "  ")]).unwrap().admin_token, DEFAULT_ADMIN_TOKEN);
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn google_backend_needs_both_variables() {
        let config_both = config(&[
            ("GOOGLE_SPREADSHEET_ID", "sheet-123"),
            ("GOOGLE_SERVICE_ACCOUNT_KEY", r#"{"client_email":"a@b"}"#),
        ])
        .unwrap();
        assert_eq!(
            config_both.backend,
            Backend::Google {
                spreadsheet_id: "sheet-123".into(),
                service_account_key: r#"{"client_email":"a@b"}"#.into(),
            }
        );

        let only_id = config(&[("GOOGLE_SPREADSHEET_ID", "sheet-123")]).unwrap();
        assert!(matches!(only_id.backend, Backend::Local { .. }));
    }

    #[test]
    fn service_account_key_can_be_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(&path, r#"{"client_email":"svc@example.iam"}"#).unwrap();

        let config = config(&[
            ("GOOGLE_SPREADSHEET_ID", "sheet-123"),
            ("GOOGLE_SERVICE_ACCOUNT_KEY", path.to_str().unwrap()),
        ])
        .unwrap();
        match config.backend {
            Backend::Google {
                service_account_key,
                ..
            } => assert!(service_account_key.contains("svc@example.iam")),
            other => panic!("unexpected backend {other:?}"),
        }

        let missing = config_missing_key();
        assert!(matches!(missing, Err(ConfigError::Unreadable { .. })));
    }

    fn config_missing_key() -> Result<Config, ConfigError> {
        config(&[
            ("GOOGLE_SPREADSHEET_ID", "sheet-123"),
            ("GOOGLE_SERVICE_ACCOUNT_KEY", "/definitely/not/here.json"),
        ])
    }
}
