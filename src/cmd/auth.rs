//! # Auth module
//!
//! This module provides the command line interface of the `auth` data source,
//! which discovers the certificate authority of the api server and builds a
//! kubeconfig from it

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::ArgAction;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cmd::{Executor, Output, OutputError},
    svc::{
        cfg::{self, Configuration, Mode},
        k8s::{
            client::{self, ConnectionParameters},
            secret::Selector,
        },
        kubeconfig, retry,
    },
};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find a bearer token, use '--token' or the 'auth.token' configuration key")]
    MissingToken,
    #[error("failed to compute delay policy, {0}")]
    Configuration(cfg::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to discover certificate authority, {0}")]
    Discover(retry::Error),
    #[error("failed to assemble kubeconfig, {0}")]
    Kubeconfig(kubeconfig::Error),
    #[error("failed to print state, {0}")]
    Output(OutputError),
}

// -----------------------------------------------------------------------------
// State structure

/// computed state of the `auth` data source
#[derive(Serialize, PartialEq, Eq, Clone, Debug)]
pub struct State {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "server")]
    pub server: String,
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "ca_crt")]
    pub ca_crt: String,
    #[serde(rename = "kubeconfig")]
    pub kubeconfig: String,
}

// -----------------------------------------------------------------------------
// Auth structure

#[derive(clap::Args, Clone, Debug)]
pub struct Auth {
    /// Url of the kubernetes api server
    #[clap(short = 's', long = "server")]
    pub server: Option<String>,
    /// Namespace of the secret holding the certificate authority
    #[clap(short = 'n', long = "namespace")]
    pub namespace: Option<String>,
    /// Name of the secret holding the serving certificate chain
    #[clap(long = "secret-name", conflicts_with = "service_account_token")]
    pub secret_name: Option<String>,
    /// Use the certificate authority of the first service account token secret
    #[clap(long = "service-account-token")]
    pub service_account_token: bool,
    /// Skip verification of the api server certificate
    #[clap(long = "insecure", action = ArgAction::Set)]
    pub insecure: Option<bool>,
    /// Bearer token used to authenticate on the api server
    #[clap(long = "token")]
    pub token: Option<String>,
    /// Number of seconds to wait for the certificate authority
    #[clap(long = "timeout")]
    pub timeout: Option<u64>,
}

impl Auth {
    /// merges flags with configuration, flags win
    pub fn resolve(
        &self,
        config: &cfg::Auth,
    ) -> Result<(ConnectionParameters, Selector), Error> {
        let mode = if self.service_account_token {
            Mode::ServiceAccountToken
        } else {
            config.mode
        };

        let selector = match mode {
            Mode::Name => Selector::ByName(
                self.secret_name
                    .to_owned()
                    .unwrap_or_else(|| config.secret_name.to_owned()),
            ),
            Mode::ServiceAccountToken => Selector::ServiceAccountToken,
        };

        let namespace = self
            .namespace
            .to_owned()
            .or_else(|| config.namespace.to_owned())
            .unwrap_or_else(|| match mode {
                Mode::Name => cfg::DEFAULT_SECRET_NAMESPACE.to_string(),
                Mode::ServiceAccountToken => cfg::DEFAULT_SERVICE_ACCOUNT_NAMESPACE.to_string(),
            });

        let token = match (&self.token, &config.token) {
            (Some(token), _) => SecretString::new(token.to_owned()),
            (None, Some(token)) => token.to_owned(),
            (None, None) => return Err(Error::MissingToken),
        };

        let params = ConnectionParameters {
            server: self
                .server
                .to_owned()
                .unwrap_or_else(|| config.server.to_owned()),
            namespace,
            token,
            insecure: self.insecure.unwrap_or(config.insecure),
            timeout: Duration::from_secs(self.timeout.unwrap_or(config.timeout)),
        };

        Ok((params, selector))
    }
}

#[async_trait]
impl Executor for Auth {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, config: Arc<Configuration>, output: Output) -> Result<(), Self::Error> {
        let (params, selector) = self.resolve(&config.auth)?;
        let policy = config.delay_policy().map_err(Error::Configuration)?;
        let client = client::try_new(&params).map_err(Error::Client)?;

        // -------------------------------------------------------------------------
        // Cancel the discovery on interruption
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.to_owned();
            async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        debug!("Received interruption, cancel discovery");
                        cancel.cancel();
                    }
                    Err(err) => {
                        warn!(error = err.to_string(), "Could not listen for interruption");
                    }
                }
            }
        });

        let result = retry::discover(
            &client,
            &params.namespace,
            &selector,
            params.timeout,
            &policy,
            &cancel,
        )
        .await;

        handle.abort();
        let discovery = result.map_err(Error::Discover)?;

        let state = state(&params, discovery)?;
        println!("{}", output.render(&state).map_err(Error::Output)?);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

fn state(params: &ConnectionParameters, discovery: retry::Discovery) -> Result<State, Error> {
    let kubeconfig = kubeconfig::assemble(
        &params.server,
        &params.namespace,
        params.token.expose_secret(),
        discovery.certificate.as_str(),
    )
    .to_yaml()
    .map_err(Error::Kubeconfig)?;

    Ok(State {
        id: discovery.secret_name,
        server: params.server.to_owned(),
        namespace: params.namespace.to_owned(),
        ca_crt: discovery.certificate.into_inner(),
        kubeconfig,
    })
}
