//! # Secret module
//!
//! This module provides helpers to locate the secret which holds the
//! certificate authority of the kubernetes api server

use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::ListParams, Api, Client, ResourceExt};
use tracing::debug;

use crate::svc::pki::SecretData;

// -----------------------------------------------------------------------------
// Constants

pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
pub const TLS_CRT_KEY: &str = "tls.crt";
pub const CA_CRT_KEY: &str = "ca.crt";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find secret '{0}/{1}'")]
    NotFound(String, String),
    #[error("failed to find a secret of type 'kubernetes.io/service-account-token' holding key 'ca.crt' in namespace '{0}'")]
    NoMatchingSecret(String),
    #[error("failed to execute request on kubernetes api, {0}")]
    Transport(kube::Error),
}

// -----------------------------------------------------------------------------
// Selector enumeration

/// describes how to find the secret holding the certificate authority
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Selector {
    /// exact lookup of the secret with the given name
    ByName(String),
    /// first secret of type `kubernetes.io/service-account-token` which
    /// contains the key `ca.crt`, in the order given by the api server
    ServiceAccountToken,
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::ByName(name) => write!(f, "name={}", name),
            Self::ServiceAccountToken => write!(f, "type={}", SERVICE_ACCOUNT_TOKEN_TYPE),
        }
    }
}

// -----------------------------------------------------------------------------
// Located structure

/// secret found by a [`Locator`]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Located {
    pub name: String,
    pub data: SecretData,
}

impl From<Secret> for Located {
    fn from(secret: Secret) -> Self {
        Self {
            name: secret.name_any(),
            data: secret.data.unwrap_or_default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Locator trait

/// performs a single lookup of a secret, without any retry
#[async_trait]
pub trait Locator {
    async fn locate(&self, namespace: &str, selector: &Selector) -> Result<Located, Error>;
}

#[async_trait]
impl Locator for Client {
    #[tracing::instrument(skip(self))]
    async fn locate(&self, namespace: &str, selector: &Selector) -> Result<Located, Error> {
        match selector {
            Selector::ByName(name) => get(self.to_owned(), namespace, name).await,
            Selector::ServiceAccountToken => find(self.to_owned(), namespace).await,
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// retrieve the secret with the given name
pub async fn get(client: Client, namespace: &str, name: &str) -> Result<Located, Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);

    debug!(
        kind = "Secret",
        namespace = namespace,
        name = name,
        "execute a request to retrieve secret"
    );
    match api.get(name).await {
        Ok(secret) => Ok(Located::from(secret)),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            Err(Error::NotFound(namespace.to_string(), name.to_string()))
        }
        Err(err) => Err(Error::Transport(err)),
    }
}

/// retrieve the first service account token secret holding a certificate
/// authority
pub async fn find(client: Client, namespace: &str) -> Result<Located, Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);
    let selector = format!("type={}", SERVICE_ACCOUNT_TOKEN_TYPE);

    debug!(
        kind = "Secret",
        namespace = namespace,
        selector = &selector,
        "execute a request to list secrets"
    );
    let secrets = api
        .list(&ListParams::default().fields(&selector))
        .await
        .map_err(Error::Transport)?;

    secrets
        .items
        .into_iter()
        .find(|secret| {
            secret
                .data
                .as_ref()
                .is_some_and(|data| data.contains_key(CA_CRT_KEY))
        })
        .map(Located::from)
        .ok_or_else(|| Error::NoMatchingSecret(namespace.to_string()))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::svc::fixtures::{self, Server};

    #[tokio::test]
    async fn secret_is_retrieved_by_name() {
        let (client, handle) = fixtures::client();
        let secret = fixtures::secret("kube-system", "k3s-serving", &[("tls.crt", "chain")]);
        let server = Server::spawn(handle, move |_, _| fixtures::ok(&secret));

        let located = client
            .locate("kube-system", &Selector::ByName("k3s-serving".into()))
            .await
            .expect("secret to be found");

        assert_eq!(located.name, "k3s-serving");
        assert_eq!(located.data[TLS_CRT_KEY].0, b"chain".to_vec());
        assert!(server.uris()[0].contains("/api/v1/namespaces/kube-system/secrets/k3s-serving"));
    }

    #[tokio::test]
    async fn lookup_by_name_is_idempotent() {
        let (client, handle) = fixtures::client();
        let secret = fixtures::secret("kube-system", "k3s-serving", &[("tls.crt", "chain")]);
        let server = Server::spawn(handle, move |_, _| fixtures::ok(&secret));
        let selector = Selector::ByName("k3s-serving".into());

        let first = client.locate("kube-system", &selector).await.expect("first lookup");
        let second = client.locate("kube-system", &selector).await.expect("second lookup");

        assert_eq!(first, second);
        assert_eq!(server.count(), 2);
    }

    #[tokio::test]
    async fn absent_secret_is_not_found() {
        let (client, handle) = fixtures::client();
        Server::spawn(handle, |_, _| fixtures::status(StatusCode::NOT_FOUND, "NotFound"));

        let err = client
            .locate("kube-system", &Selector::ByName("k3s-serving".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(ns, name) if ns == "kube-system" && name == "k3s-serving"));
    }

    #[tokio::test]
    async fn forbidden_is_a_transport_error() {
        let (client, handle) = fixtures::client();
        Server::spawn(handle, |_, _| fixtures::status(StatusCode::FORBIDDEN, "Forbidden"));

        let err = client
            .locate("kube-system", &Selector::ByName("k3s-serving".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(kube::Error::Api(resp)) if resp.code == 403));
    }

    #[tokio::test]
    async fn first_service_account_token_with_ca_wins() {
        let (client, handle) = fixtures::client();
        let secrets = vec![
            fixtures::secret("default", "no-ca", &[("token", "abc")]),
            fixtures::secret("default", "first", &[("ca.crt", "first-ca"), ("token", "t")]),
            fixtures::secret("default", "second", &[("ca.crt", "second-ca")]),
        ];
        let server = Server::spawn(handle, move |_, _| fixtures::ok(&fixtures::list(secrets.to_owned())));

        let located = client
            .locate("default", &Selector::ServiceAccountToken)
            .await
            .expect("a service account token to be found");

        assert_eq!(located.name, "first");
        assert_eq!(located.data[CA_CRT_KEY].0, b"first-ca".to_vec());

        let uri = &server.uris()[0];
        assert!(uri.contains("/api/v1/namespaces/default/secrets"));
        assert!(uri.contains("fieldSelector=type%3Dkubernetes.io%2Fservice-account-token"));
    }

    #[tokio::test]
    async fn empty_list_has_no_matching_secret() {
        let (client, handle) = fixtures::client();
        Server::spawn(handle, |_, _| fixtures::ok(&fixtures::list(vec![])));

        let err = client
            .locate("default", &Selector::ServiceAccountToken)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoMatchingSecret(ns) if ns == "default"));
    }
}
