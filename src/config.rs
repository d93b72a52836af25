/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! SMTP settings, read from the environment at process start.
//!
//! | Variable | Default |
//! |---|---|
//! | `SMTP_HOST` | `smtp.gmail.com` |
//! | `SMTP_PORT` | `587` |
//! | `SMTP_FROM` | required |
//! | `SMTP_USERNAME` | value of `SMTP_FROM` |
//! | `SMTP_PASSWORD` | required unless `SMTP_OAUTH_TOKEN` is set |
//! | `SMTP_OAUTH_TOKEN` | unset |
//! | `SMTP_SECURITY` | `starttls` (`tls`, `plain`) |
//! | `SMTP_TIMEOUT_SECS` | `60` |
//! | `SMTP_HELO_HOST` | local host name |
//! | `SMTP_ALLOW_INVALID_CERTS` | `false` |

use std::{fmt::Display, str::FromStr, time::Duration};

use crate::{Credentials, SmtpClientBuilder};

pub const DEFAULT_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_PORT: u16 = 587;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    Missing(&'static str),

    /// A variable is set to a value that cannot be used.
    Invalid { key: &'static str, value: String },
}

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plain connection upgraded with STARTTLS. Fails if the server does not offer it.
    #[default]
    StartTls,
    /// TLS from the first byte (usually port 465).
    Implicit,
    /// No encryption at all, for local relays only.
    Plain,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub credentials: Credentials<String>,
    pub security: Security,
    pub timeout: Duration,
    pub helo_host: Option<String>,
    pub allow_invalid_certs: bool,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{key} is required"),
            ConfigError::Invalid { key, value } => write!(f, "Invalid {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl FromStr for Security {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starttls" => Ok(Security::StartTls),
            "tls" | "implicit" | "smtps" => Ok(Security::Implicit),
            "plain" | "none" => Ok(Security::Plain),
            _ => Err(()),
        }
    }
}

impl SmtpConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable or `None` when it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let sender = get("SMTP_FROM").ok_or(ConfigError::Missing("SMTP_FROM"))?;
        let username = get("SMTP_USERNAME").unwrap_or_else(|| sender.clone());
        let credentials = match (get("SMTP_OAUTH_TOKEN"), get("SMTP_PASSWORD")) {
            (Some(token), _) => Credentials::new_xoauth2(username, token),
            (None, Some(password)) => Credentials::new(username, password),
            (None, None) => return Err(ConfigError::Missing("SMTP_PASSWORD")),
        };

        Ok(SmtpConfig {
            host: get("SMTP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse(&get, "SMTP_PORT")?.unwrap_or(DEFAULT_PORT),
            sender,
            credentials,
            security: match get("SMTP_SECURITY") {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    key: "SMTP_SECURITY",
                    value,
                })?,
                None => Security::default(),
            },
            timeout: parse::<u64>(&get, "SMTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            helo_host: get("SMTP_HELO_HOST"),
            allow_invalid_certs: match get("SMTP_ALLOW_INVALID_CERTS") {
                Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                    key: "SMTP_ALLOW_INVALID_CERTS",
                    value,
                })?,
                None => false,
            },
        })
    }

    /// Connection builder for these settings.
    pub fn client_builder(&self) -> SmtpClientBuilder<&str> {
        let builder = SmtpClientBuilder::new(self.host.as_str(), self.port)
            .implicit_tls(self.security == Security::Implicit)
            .allow_invalid_certs(self.allow_invalid_certs)
            .timeout(self.timeout);
        match &self.helo_host {
            Some(helo_host) => builder.helo_host(helo_host),
            None => builder,
        }
    }
}

fn parse<T: FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashMap, time::Duration};

    use super::{ConfigError, Security, SmtpConfig};
    use crate::Credentials;

    fn config(vars: &[(&str, &str)]) -> Result<SmtpConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SmtpConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[
            ("SMTP_FROM", "alerts@example.com"),
            ("SMTP_PASSWORD", "app-password"),
        ])
        .unwrap();
        assert_eq!(config.host, "smtp.gmail.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.sender, "alerts@example.com");
        assert_eq!(
            config.credentials,
            Credentials::new(
                "alerts@example.com".to_string(),
                "app-password".to_string()
            )
        );
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.helo_host, None);
        assert!(!config.allow_invalid_certs);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_FROM", "alerts@example.com"),
            ("SMTP_USERNAME", "alerts"),
            ("SMTP_OAUTH_TOKEN", "ya29.token"),
            ("SMTP_PASSWORD", "ignored"),
            ("SMTP_SECURITY", "TLS"),
            ("SMTP_TIMEOUT_SECS", "5"),
            ("SMTP_HELO_HOST", "client.example.com"),
            ("SMTP_ALLOW_INVALID_CERTS", "yes"),
        ])
        .unwrap();
        assert_eq!(config.host, "mail.example.com");
        assert_eq!(config.port, 465);
        assert_eq!(
            config.credentials,
            Credentials::new_xoauth2("alerts".to_string(), "ya29.token".to_string())
        );
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.helo_host.as_deref(), Some("client.example.com"));
        assert!(config.allow_invalid_certs);

        let builder = config.client_builder();
        assert_eq!(builder.addr, "mail.example.com:465");
        assert!(builder.tls_implicit);
        assert_eq!(builder.local_host, "client.example.com");
        assert_eq!(builder.timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_values() {
        assert_eq!(
            config(&[("SMTP_PASSWORD", "secret")]).unwrap_err(),
            ConfigError::Missing("SMTP_FROM")
        );
        assert_eq!(
            config(&[("SMTP_FROM", "alerts@example.com"), ("SMTP_PASSWORD", " ")]).unwrap_err(),
            ConfigError::Missing("SMTP_PASSWORD")
        );
    }

    #[test]
    fn invalid_values() {
        let base = [
            ("SMTP_FROM", "alerts@example.com"),
            ("SMTP_PASSWORD", "secret"),
        ];
        for (key, value) in [
            ("SMTP_PORT", "smtp"),
            ("SMTP_PORT", "70000"),
            ("SMTP_SECURITY", "ssl3"),
            ("SMTP_TIMEOUT_SECS", "-1"),
            ("SMTP_ALLOW_INVALID_CERTS", "maybe"),
        ] {
            let mut vars = base.to_vec();
            vars.push((key, value));
            assert_eq!(
                config(&vars).unwrap_err(),
                ConfigError::Invalid {
                    key,
                    value: value.to_string()
                }
            );
        }
    }

    #[test]
    fn debug_hides_secret() {
        let config = config(&[
            ("SMTP_FROM", "alerts@example.com"),
            ("SMTP_PASSWORD", "hunter2"),
        ])
        .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
