//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{convert::TryFrom, env, path::PathBuf, time::Duration};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;

use crate::svc::retry::{self, DelayPolicy};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_SERVER: &str = "https://localhost:6443";
pub const DEFAULT_SECRET_NAME: &str = "k3s-serving";
pub const DEFAULT_SECRET_NAMESPACE: &str = "kube-system";
pub const DEFAULT_SERVICE_ACCOUNT_NAMESPACE: &str = "default";
pub const DEFAULT_KUBECONFIG_NAMESPACE: &str = "default";
pub const DEFAULT_TIMEOUT: u64 = 300;
pub const ENVIRONMENT_PREFIX: &str = "K8S_BOOTSTRAP";

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load file '{0:?}', {1}")]
    File(PathBuf, ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to use multiplier '{0}' for exponential backoff, it must be a finite number greater than or equal to 1")]
    Multiplier(f64),
    #[error("failed to use initial delay of 0 ms for exponential backoff, it must be greater than 0")]
    Delay,
    #[error("failed to use maximum delay of {1} ms for exponential backoff, it must be greater than or equal to the initial delay of {0} ms")]
    MaxDelay(u64, u64),
}

// -----------------------------------------------------------------------------
// Mode enum

/// how the secret holding the certificate authority is found
#[derive(Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Mode {
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "service-account-token")]
    ServiceAccountToken,
}

// -----------------------------------------------------------------------------
// Policy enum

#[derive(Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Policy {
    #[serde(rename = "fixed")]
    Fixed,
    #[serde(rename = "exponential")]
    Exponential,
}

// -----------------------------------------------------------------------------
// Retry structure

#[derive(Deserialize, PartialEq, Clone, Debug)]
pub struct Retry {
    #[serde(rename = "policy")]
    pub policy: Policy,
    /// fixed delay or initial delay of the backoff, in milliseconds
    #[serde(rename = "delay")]
    pub delay: u64,
    /// maximum delay of the backoff, in milliseconds
    #[serde(rename = "max_delay")]
    pub max_delay: u64,
    #[serde(rename = "multiplier")]
    pub multiplier: f64,
}

impl TryFrom<&Retry> for DelayPolicy {
    type Error = Error;

    fn try_from(retry: &Retry) -> Result<Self, Self::Error> {
        Ok(match retry.policy {
            Policy::Fixed => Self::Fixed {
                delay: Duration::from_millis(retry.delay),
            },
            Policy::Exponential => {
                if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
                    return Err(Error::Multiplier(retry.multiplier));
                }

                if retry.delay == 0 {
                    return Err(Error::Delay);
                }

                if retry.max_delay < retry.delay {
                    return Err(Error::MaxDelay(retry.delay, retry.max_delay));
                }

                Self::Exponential {
                    initial: Duration::from_millis(retry.delay),
                    max: Duration::from_millis(retry.max_delay),
                    multiplier: retry.multiplier,
                }
            }
        })
    }
}

// -----------------------------------------------------------------------------
// Auth structure

/// defaults of the `auth` data source
#[derive(Deserialize, Clone, Debug)]
pub struct Auth {
    #[serde(rename = "server")]
    pub server: String,
    /// resolved from the mode when absent
    #[serde(rename = "namespace")]
    pub namespace: Option<String>,
    #[serde(rename = "mode")]
    pub mode: Mode,
    #[serde(rename = "secret_name")]
    pub secret_name: String,
    #[serde(rename = "insecure")]
    pub insecure: bool,
    #[serde(rename = "token")]
    pub token: Option<SecretString>,
    /// in seconds
    #[serde(rename = "timeout")]
    pub timeout: u64,
    #[serde(rename = "retry")]
    pub retry: Retry,
}

// -----------------------------------------------------------------------------
// Kubeconfig structure

/// defaults of the `kubeconfig` data source
#[derive(Deserialize, Clone, Debug)]
pub struct Kubeconfig {
    #[serde(rename = "server")]
    pub server: String,
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "token")]
    pub token: Option<SecretString>,
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Deserialize, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "auth")]
    pub auth: Auth,
    #[serde(rename = "kubeconfig")]
    pub kubeconfig: Kubeconfig,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        defaults()?
            .add_source(File::from(path.to_owned()).required(true))
            .add_source(environment())
            .build()
            .map_err(|err| Error::File(path, err))?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    pub fn try_default() -> Result<Self, Error> {
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
            paths.push(home.join(".config").join(env!("CARGO_PKG_NAME")).join("config"));
            paths.push(
                home.join(".local")
                    .join("share")
                    .join(env!("CARGO_PKG_NAME"))
                    .join("config"),
            );
        }

        paths.push(PathBuf::from("config"));

        paths
            .into_iter()
            .fold(defaults()?, |config, path| {
                config.add_source(File::from(path).required(false))
            })
            .add_source(environment())
            .build()
            .map_err(Error::Cast)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    /// returns the delay policy of the `auth` data source
    pub fn delay_policy(&self) -> Result<DelayPolicy, Error> {
        DelayPolicy::try_from(&self.auth.retry)
    }
}

// -----------------------------------------------------------------------------
// helpers

fn environment() -> Environment {
    Environment::with_prefix(ENVIRONMENT_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
    let defaults: [(&str, config::Value); 11] = [
        ("auth.server", DEFAULT_SERVER.into()),
        ("auth.mode", "name".into()),
        ("auth.secret_name", DEFAULT_SECRET_NAME.into()),
        ("auth.insecure", true.into()),
        ("auth.timeout", (DEFAULT_TIMEOUT as i64).into()),
        ("auth.retry.policy", "fixed".into()),
        (
            "auth.retry.delay",
            (retry::DEFAULT_FIXED_DELAY.as_millis() as i64).into(),
        ),
        (
            "auth.retry.max_delay",
            (retry::DEFAULT_BACKOFF_MAX_DELAY.as_millis() as i64).into(),
        ),
        (
            "auth.retry.multiplier",
            retry::DEFAULT_BACKOFF_MULTIPLIER.into(),
        ),
        ("kubeconfig.server", DEFAULT_SERVER.into()),
        ("kubeconfig.namespace", DEFAULT_KUBECONFIG_NAMESPACE.into()),
    ];

    defaults
        .into_iter()
        .try_fold(Config::builder(), |config, (key, value)| {
            config
                .set_default(key, value)
                .map_err(|err| Error::Default(key.to_string(), err))
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(content: &str) -> Result<Configuration, Error> {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temporary file to be created");

        file.write_all(content.as_bytes())
            .expect("configuration to be written");

        Configuration::try_from(file.path().to_path_buf())
    }

    #[test]
    fn defaults_are_applied() {
        let config = load("").expect("empty configuration to be valid");

        assert_eq!(config.auth.server, DEFAULT_SERVER);
        assert_eq!(config.auth.namespace, None);
        assert_eq!(config.auth.mode, Mode::Name);
        assert_eq!(config.auth.secret_name, DEFAULT_SECRET_NAME);
        assert!(config.auth.insecure);
        assert_eq!(config.auth.timeout, DEFAULT_TIMEOUT);
        assert_eq!(
            config.delay_policy().expect("default policy to be valid"),
            DelayPolicy::default()
        );

        assert_eq!(config.kubeconfig.server, DEFAULT_SERVER);
        assert_eq!(config.kubeconfig.namespace, DEFAULT_KUBECONFIG_NAMESPACE);
    }

    #[test]
    fn file_overrides_defaults() {
        let config = load(
            r#"
[auth]
server = "https://10.0.0.1:6443"
namespace = "default"
mode = "service-account-token"
insecure = false
token = "s3cr3t"
timeout = 30

[auth.retry]
policy = "exponential"
delay = 100
max_delay = 2000
multiplier = 3.0
"#,
        )
        .expect("configuration to be valid");

        assert_eq!(config.auth.server, "https://10.0.0.1:6443");
        assert_eq!(config.auth.namespace.as_deref(), Some("default"));
        assert_eq!(config.auth.mode, Mode::ServiceAccountToken);
        assert!(!config.auth.insecure);
        assert_eq!(config.auth.timeout, 30);
        assert_eq!(
            config.auth.token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("s3cr3t")
        );
        assert_eq!(
            config.delay_policy().expect("policy to be valid"),
            DelayPolicy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(2),
                multiplier: 3.0,
            }
        );
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let config = load(
            r#"
[auth.retry]
policy = "exponential"
multiplier = 0.5
"#,
        )
        .expect("configuration to be valid");

        assert!(matches!(config.delay_policy(), Err(Error::Multiplier(m)) if m == 0.5));
    }

    #[test]
    fn exponential_backoff_must_grow() {
        let config = load(
            r#"
[auth.retry]
policy = "exponential"
delay = 0
"#,
        )
        .expect("configuration to be valid");

        assert!(matches!(config.delay_policy(), Err(Error::Delay)));

        let config = load(
            r#"
[auth.retry]
policy = "exponential"
delay = 2000
max_delay = 1000
"#,
        )
        .expect("configuration to be valid");

        assert!(matches!(
            config.delay_policy(),
            Err(Error::MaxDelay(2000, 1000))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Configuration::try_from(PathBuf::from("/does/not/exist.toml")).unwrap_err();
        assert!(matches!(err, Error::File(..)));
    }
}
