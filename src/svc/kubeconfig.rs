//! # Kubeconfig module
//!
//! This module provides structures to assemble a kubeconfig document with a
//! single cluster, context and user. It follows the layout written by
//! `kubectl` (`clientcmd`).

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64_ENGINE, Engine};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants

pub const CLUSTER_NAME: &str = "default-cluster";
pub const CONTEXT_NAME: &str = "default-context";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize kubeconfig, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// Kubeconfig structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Cluster {
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: String,
    #[serde(rename = "server")]
    pub server: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct NamedCluster {
    #[serde(rename = "cluster")]
    pub cluster: Cluster,
    #[serde(rename = "name")]
    pub name: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Context {
    #[serde(rename = "cluster")]
    pub cluster: String,
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "user")]
    pub user: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct NamedContext {
    #[serde(rename = "context")]
    pub context: Context,
    #[serde(rename = "name")]
    pub name: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct User {
    #[serde(rename = "token")]
    pub token: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct NamedUser {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "user")]
    pub user: User,
}

/// kubeconfig document, fields are declared in the order `kubectl` writes
/// them
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "clusters")]
    pub clusters: Vec<NamedCluster>,
    #[serde(rename = "contexts")]
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    pub current_context: String,
    #[serde(rename = "kind")]
    pub kind: String,
    #[serde(rename = "preferences")]
    pub preferences: BTreeMap<String, String>,
    #[serde(rename = "users")]
    pub users: Vec<NamedUser>,
}

impl Kubeconfig {
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(Error::Serialize)
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns a kubeconfig which connects to the server using the certificate
/// authority and authenticates with the bearer token. The namespace is used
/// as the context namespace and as the name of the user.
pub fn assemble(server: &str, namespace: &str, token: &str, ca_crt: &str) -> Kubeconfig {
    Kubeconfig {
        api_version: "v1".to_string(),
        clusters: vec![NamedCluster {
            cluster: Cluster {
                certificate_authority_data: BASE64_ENGINE.encode(ca_crt),
                server: server.to_string(),
            },
            name: CLUSTER_NAME.to_string(),
        }],
        contexts: vec![NamedContext {
            context: Context {
                cluster: CLUSTER_NAME.to_string(),
                namespace: namespace.to_string(),
                user: namespace.to_string(),
            },
            name: CONTEXT_NAME.to_string(),
        }],
        current_context: CONTEXT_NAME.to_string(),
        kind: "Config".to_string(),
        preferences: BTreeMap::new(),
        users: vec![NamedUser {
            name: namespace.to_string(),
            user: User {
                token: token.to_string(),
            },
        }],
    }
}
