//! # Services module
//!
//! This module provide services to discover the certificate authority of a
//! kubernetes api server and to assemble a kubeconfig from it.
pub mod cfg;
pub mod k8s;
pub mod kubeconfig;
pub mod pki;
pub mod retry;

#[cfg(test)]
pub mod fixtures;
