//! # Public key infrastructure module
//!
//! This module provides helpers to retrieve a certificate authority from the
//! data of a kubernetes secret

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    str::Utf8Error,
};

use k8s_openapi::ByteString;
use pem::{EncodeConfig, LineEnding};
use x509_parser::{
    error::{PEMError, X509Error},
    nom,
    pem::Pem,
};

// -----------------------------------------------------------------------------
// Types

/// data of a kubernetes secret as returned by the api server
pub type SecretData = BTreeMap<String, ByteString>;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find key '{0}' in secret data")]
    MissingKey(String),
    #[error("failed to decode pem block at key '{0}', {1}")]
    Decode(String, PEMError),
    #[error("failed to parse x509 certificate at key '{0}', {1}")]
    Parse(String, nom::Err<X509Error>),
    #[error("failed to read certificate at key '{0}' as utf-8, {1}")]
    Utf8(String, Utf8Error),
    #[error("failed to find a certificate authority in the chain at key '{0}'")]
    NoCaInChain(String),
}

// -----------------------------------------------------------------------------
// CaCertificate structure

/// pem encoded certificate authority
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct CaCertificate(String);

impl CaCertificate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for CaCertificate {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for CaCertificate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// returns the first certificate of the chain stored at the given key which
/// has the certificate authority basic constraint, as a standalone pem block
pub fn extract_ca(data: &SecretData, key: &str) -> Result<CaCertificate, Error> {
    let payload = data
        .get(key)
        .ok_or_else(|| Error::MissingKey(key.to_string()))?;

    for block in Pem::iter_from_buffer(&payload.0) {
        let block = block.map_err(|err| Error::Decode(key.to_string(), err))?;
        let certificate = block
            .parse_x509()
            .map_err(|err| Error::Parse(key.to_string(), err))?;

        if certificate.tbs_certificate.is_ca() {
            return Ok(CaCertificate(encode(&block)));
        }
    }

    Err(Error::NoCaInChain(key.to_string()))
}

/// returns the value stored at the given key unmodified, it is expected to
/// already be a certificate authority
pub fn verbatim(data: &SecretData, key: &str) -> Result<CaCertificate, Error> {
    let payload = data
        .get(key)
        .ok_or_else(|| Error::MissingKey(key.to_string()))?;

    std::str::from_utf8(&payload.0)
        .map(|s| CaCertificate(s.to_string()))
        .map_err(|err| Error::Utf8(key.to_string(), err))
}

fn encode(block: &Pem) -> String {
    let block = pem::Pem::new(block.label.to_owned(), block.contents.to_owned());

    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}
