//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::svc::cfg::Configuration;

pub mod auth;
pub mod kubeconfig;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>, output: Output) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Output enum

#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("failed to serialize state as json, {0}")]
    Json(serde_json::Error),
    #[error("failed to serialize state as yaml, {0}")]
    Yaml(serde_yaml::Error),
}

/// format used to print the state computed by a data source
#[derive(ValueEnum, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Output {
    Json,
    Yaml,
}

impl Output {
    pub fn render<T: Serialize>(&self, state: &T) -> Result<String, OutputError> {
        match self {
            Self::Json => serde_json::to_string_pretty(state).map_err(OutputError::Json),
            Self::Yaml => serde_yaml::to_string(state).map_err(OutputError::Yaml),
        }
    }
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to compute auth data source, {0}")]
    Auth(auth::Error),
    #[error("failed to compute kubeconfig data source, {0}")]
    Kubeconfig(kubeconfig::Error),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Discover the certificate authority of the api server and build a kubeconfig from it
    #[clap(name = "auth")]
    Auth(auth::Auth),
    /// Build a kubeconfig from a known certificate authority
    #[clap(name = "kubeconfig", aliases = &["kc"])]
    Kubeconfig(kubeconfig::Kubeconfig),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    async fn execute(&self, config: Arc<Configuration>, output: Output) -> Result<(), Self::Error> {
        match self {
            Self::Auth(auth) => auth
                .execute(config, output)
                .await
                .map_err(Error::Auth)
                .map_err(|err| Error::Execution("auth".into(), Arc::new(err))),
            Self::Kubeconfig(kubeconfig) => kubeconfig
                .execute(config, output)
                .await
                .map_err(Error::Kubeconfig)
                .map_err(|err| Error::Execution("kubeconfig".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    /// Format of the computed state
    #[clap(short = 'o', long = "output", global = true, value_enum, default_value_t = Output::Json)]
    pub output: Output,
    #[clap(subcommand)]
    pub command: Option<Command>,
}
