//! # Kubernetes module
//!
//! This module provide helpers to reach a kubernetes api server with explicit
//! connection parameters and to locate the secrets holding its certificate
//! authority
pub mod client;
pub mod secret;
