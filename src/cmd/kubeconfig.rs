//! # Kubeconfig module
//!
//! This module provides the command line interface of the `kubeconfig` data
//! source

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::{
    cmd::{Executor, Output, OutputError},
    svc::{
        cfg::{self, Configuration},
        kubeconfig::assemble,
    },
};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find a bearer token, use '--token' or the 'kubeconfig.token' configuration key")]
    MissingToken,
    #[error("failed to find a certificate authority, use '--ca-crt' or '--ca-crt-file'")]
    MissingCaCrt,
    #[error("failed to read certificate authority from file '{0:?}', {1}")]
    Read(PathBuf, io::Error),
    #[error("failed to assemble kubeconfig, {0}")]
    Assemble(crate::svc::kubeconfig::Error),
    #[error("failed to print state, {0}")]
    Output(OutputError),
}

// -----------------------------------------------------------------------------
// State structure

/// computed state of the `kubeconfig` data source
#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
pub struct State {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "kubeconfig")]
    pub kubeconfig: String,
}

// -----------------------------------------------------------------------------
// Kubeconfig structure

#[derive(clap::Args, Clone, Debug)]
pub struct Kubeconfig {
    /// Url of the kubernetes api server
    #[clap(short = 's', long = "server")]
    pub server: Option<String>,
    /// Namespace of the context, also used as the name of the user
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
    /// Bearer token used to authenticate on the api server
    #[clap(long = "token")]
    pub token: Option<String>,
    /// Pem encoded certificate authority
    #[clap(long = "ca-crt", conflicts_with = "ca_crt_file")]
    pub ca_crt: Option<String>,
    /// File containing the pem encoded certificate authority
    #[clap(long = "ca-crt-file")]
    pub ca_crt_file: Option<PathBuf>,
}

impl Kubeconfig {
    pub async fn state(&self, config: &cfg::Kubeconfig) -> Result<State, Error> {
        let server = self.server.as_deref().unwrap_or(&config.server);
        let namespace = self.namespace.as_deref().unwrap_or(&config.namespace);
        let token = match (&self.token, &config.token) {
            (Some(token), _) => token.as_str(),
            (None, Some(token)) => token.expose_secret().as_str(),
            (None, None) => return Err(Error::MissingToken),
        };

        let ca_crt = match (&self.ca_crt, &self.ca_crt_file) {
            (Some(ca_crt), _) => ca_crt.to_owned(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .map_err(|err| Error::Read(path.to_owned(), err))?,
            (None, None) => return Err(Error::MissingCaCrt),
        };

        Ok(State {
            id: format!("{}-{}", server, namespace),
            kubeconfig: assemble(server, namespace, token, &ca_crt)
                .to_yaml()
                .map_err(Error::Assemble)?,
        })
    }
}

#[async_trait]
impl Executor for Kubeconfig {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, config: Arc<Configuration>, output: Output) -> Result<(), Self::Error> {
        let state = self.state(&config.kubeconfig).await?;

        println!("{}", output.render(&state).map_err(Error::Output)?);
        Ok(())
    }
}
