//! # Client module
//!
//! This module provides an helper to create a kubernetes client from explicit
//! connection parameters, without reading any kubeconfig from the environment

use std::{convert::TryFrom, time::Duration};

use http::uri::InvalidUri;
use kube::Config;
use secrecy::SecretString;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse server url '{0}', {1}")]
    ParseUrl(String, InvalidUri),
    #[error("failed to create kubernetes client, {0}")]
    CreateClient(kube::Error),
}

// -----------------------------------------------------------------------------
// ConnectionParameters structure

/// parameters used to reach the api server during one discovery
#[derive(Clone, Debug)]
pub struct ConnectionParameters {
    pub server: String,
    pub namespace: String,
    pub token: SecretString,
    pub insecure: bool,
    pub timeout: Duration,
}

impl TryFrom<&ConnectionParameters> for Config {
    type Error = Error;

    fn try_from(params: &ConnectionParameters) -> Result<Self, Self::Error> {
        let url = params
            .server
            .parse()
            .map_err(|err| Error::ParseUrl(params.server.to_owned(), err))?;

        let mut config = Config::new(url);

        config.default_namespace = params.namespace.to_owned();
        config.accept_invalid_certs = params.insecure;
        config.auth_info.token = Some(params.token.to_owned());

        Ok(config)
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns a new kubernetes client which authenticate on the given server
/// using the bearer token
#[tracing::instrument(skip(params), fields(server = %params.server, insecure = params.insecure))]
pub fn try_new(params: &ConnectionParameters) -> Result<kube::Client, Error> {
    let config = Config::try_from(params)?;

    kube::Client::try_from(config).map_err(Error::CreateClient)
}
