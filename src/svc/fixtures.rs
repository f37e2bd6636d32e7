//! # Fixtures module
//!
//! This module provides certificates and kubernetes objects shared by tests

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use http::{header, Request, Response, StatusCode};
use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube::{api::ObjectMeta, client::Body};
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use serde::Serialize;

// -----------------------------------------------------------------------------
// Authority structure

pub struct Authority {
    pub certificate: Certificate,
    pub key: KeyPair,
}

impl Authority {
    /// returns a new self-signed certificate authority
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().expect("key pair to be generated");
        let certificate = params(name, IsCa::Ca(BasicConstraints::Unconstrained))
            .self_signed(&key)
            .expect("certificate authority to be self-signed");

        Self { certificate, key }
    }

    /// returns a new certificate authority signed by this one
    pub fn intermediate(&self, name: &str) -> Self {
        let key = KeyPair::generate().expect("key pair to be generated");
        let certificate = params(name, IsCa::Ca(BasicConstraints::Unconstrained))
            .signed_by(&key, &self.certificate, &self.key)
            .expect("intermediate authority to be signed");

        Self { certificate, key }
    }

    /// returns a new leaf certificate signed by this authority
    pub fn leaf(&self, name: &str) -> Certificate {
        let key = KeyPair::generate().expect("key pair to be generated");

        params(name, IsCa::ExplicitNoCa)
            .signed_by(&key, &self.certificate, &self.key)
            .expect("leaf certificate to be signed")
    }
}

fn params(name: &str, is_ca: IsCa) -> CertificateParams {
    let mut params =
        CertificateParams::new(vec![format!("{name}.local")]).expect("valid alternative name");

    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = is_ca;
    params
}

// -----------------------------------------------------------------------------
// Kubernetes objects

pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

pub fn list(items: Vec<Secret>) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "SecretList",
        "metadata": { "resourceVersion": "1" },
        "items": items,
    })
}

// -----------------------------------------------------------------------------
// Mock api server

pub type Handle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// returns a kubernetes client whose requests are received by the returned
/// handle instead of an api server
pub fn client() -> (kube::Client, Handle) {
    let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();

    (kube::Client::new(service, "default"), handle)
}

pub fn ok<T: Serialize>(obj: &T) -> Response<Body> {
    respond(StatusCode::OK, serde_json::to_vec(obj).expect("object to be serializable"))
}

pub fn status(code: StatusCode, reason: &str) -> Response<Body> {
    let body = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Status",
        "metadata": {},
        "status": "Failure",
        "message": format!("request failed, {reason}"),
        "reason": reason,
        "code": code.as_u16(),
    });

    respond(code, serde_json::to_vec(&body).expect("status to be serializable"))
}

fn respond(code: StatusCode, body: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(code)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("response to be valid")
}

/// records the request received by a mock api server
#[derive(Clone, Default)]
pub struct Server {
    requests: Arc<Mutex<Vec<String>>>,
}

impl Server {
    /// answers each request received on the handle with the responder, which
    /// is given the request number starting at 1
    pub fn spawn<F>(mut handle: Handle, responder: F) -> Self
    where
        F: Fn(usize, &Request<Body>) -> Response<Body> + Send + 'static,
    {
        let server = Self::default();
        let requests = server.requests.to_owned();

        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                let n = {
                    let mut requests = requests.lock().expect("lock not to be poisoned");
                    requests.push(request.uri().to_string());
                    requests.len()
                };

                send.send_response(responder(n, &request));
            }
        });

        server
    }

    pub fn uris(&self) -> Vec<String> {
        self.requests.lock().expect("lock not to be poisoned").to_owned()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().expect("lock not to be poisoned").len()
    }
}
