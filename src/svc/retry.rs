//! # Retry module
//!
//! This module provides the loop which discovers the certificate authority of
//! the api server. The api server may not be reachable yet or the secret may
//! not be populated yet, so lookups are retried until a deadline following a
//! [`DelayPolicy`].

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::svc::{
    k8s::secret::{self, Located, Locator, Selector, CA_CRT_KEY, TLS_CRT_KEY},
    pki::{self, CaCertificate},
};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_FIXED_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// attempts allowed per second of timeout with a fixed delay
pub const ATTEMPTS_PER_SECOND: u64 = 2;

/// deadline used when the timeout cannot be represented as an instant
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// -----------------------------------------------------------------------------
// Kind enumeration

/// classification of the failures which could happen during a discovery
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum Kind {
    NotFound,
    NoMatchingSecret,
    Transport,
    MissingKey,
    MalformedCertificate,
    NoCaInChain,
    TimedOut,
    Cancelled,
}

impl Kind {
    /// returns if another attempt may succeed after a failure of this kind
    pub const fn retryable(self) -> bool {
        match self {
            // 401 and 403 are transport failures, they are retried until the
            // deadline like any other
            Self::NotFound
            | Self::NoMatchingSecret
            | Self::Transport
            | Self::MissingKey
            | Self::MalformedCertificate
            | Self::NoCaInChain => true,
            Self::TimedOut | Self::Cancelled => false,
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NotFound"),
            Self::NoMatchingSecret => write!(f, "NoMatchingSecret"),
            Self::Transport => write!(f, "TransportError"),
            Self::MissingKey => write!(f, "MissingKey"),
            Self::MalformedCertificate => write!(f, "MalformedCertificate"),
            Self::NoCaInChain => write!(f, "NoCAInChain"),
            Self::TimedOut => write!(f, "TimedOut"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to locate secret, {0}")]
    Locate(secret::Error),
    #[error("failed to extract certificate authority from secret '{0}', {1}")]
    Extract(String, pki::Error),
    #[error("failed to discover certificate authority within {timeout:?} after {attempts} attempt(s){}", cause(.last))]
    TimedOut {
        attempts: u32,
        timeout: Duration,
        /// error returned by the last attempt which completed
        last: Option<Box<Error>>,
    },
    #[error("failed to discover certificate authority, cancelled after {0} attempt(s)")]
    Cancelled(u32),
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Locate(secret::Error::NotFound(..)) => Kind::NotFound,
            Self::Locate(secret::Error::NoMatchingSecret(..)) => Kind::NoMatchingSecret,
            Self::Locate(secret::Error::Transport(..)) => Kind::Transport,
            Self::Extract(_, pki::Error::MissingKey(..)) => Kind::MissingKey,
            Self::Extract(_, pki::Error::NoCaInChain(..)) => Kind::NoCaInChain,
            Self::Extract(
                _,
                pki::Error::Decode(..) | pki::Error::Parse(..) | pki::Error::Utf8(..),
            ) => Kind::MalformedCertificate,
            Self::TimedOut { .. } => Kind::TimedOut,
            Self::Cancelled(_) => Kind::Cancelled,
        }
    }
}

fn cause(last: &Option<Box<Error>>) -> String {
    match last {
        Some(err) => format!(", last error: {}", err),
        None => String::new(),
    }
}

// -----------------------------------------------------------------------------
// DelayPolicy enumeration

/// discipline used to wait between two attempts
#[derive(PartialEq, Clone, Debug)]
pub enum DelayPolicy {
    /// constant wait, the number of attempts is also capped to
    /// [`ATTEMPTS_PER_SECOND`] per second of timeout
    Fixed { delay: Duration },
    /// growing wait, only bounded by the deadline
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay: DEFAULT_FIXED_DELAY,
        }
    }
}

impl DelayPolicy {
    /// returns the maximum number of attempts within the given timeout, if
    /// the policy has one. There is always room for at least one attempt.
    pub fn max_attempts(&self, timeout: Duration) -> Option<u32> {
        match self {
            Self::Fixed { .. } => Some(
                u32::try_from(timeout.as_secs().saturating_mul(ATTEMPTS_PER_SECOND))
                    .unwrap_or(u32::MAX)
                    .max(1),
            ),
            Self::Exponential { .. } => None,
        }
    }

    /// returns the wait following the failure of the given attempt, counted
    /// from 1
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);

                Duration::try_from_secs_f64(secs)
                    .map(|delay| delay.min(*max))
                    .unwrap_or(*max)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Discovery structure

/// certificate authority found by [`discover`]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Discovery {
    pub certificate: CaCertificate,
    pub secret_name: String,
    pub attempts: u32,
}

// -----------------------------------------------------------------------------
// State enumeration

enum State {
    Attempting,
    Retrying(Duration),
    Succeeded(Discovery),
    Fatal(Error),
    TimedOut,
    Cancelled,
}

// -----------------------------------------------------------------------------
// Helpers functions

/// looks up the secret and extracts the certificate authority until it
/// succeeds, the timeout elapses or the token is cancelled.
///
/// Attempts are strictly sequential. The deadline bounds both the request in
/// flight and the wait between attempts.
#[tracing::instrument(skip(locator, policy, cancel))]
pub async fn discover<L>(
    locator: &L,
    namespace: &str,
    selector: &Selector,
    timeout: Duration,
    policy: &DelayPolicy,
    cancel: &CancellationToken,
) -> Result<Discovery, Error>
where
    L: Locator + Sync + ?Sized,
{
    let now = Instant::now();
    let deadline = now
        .checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE);
    let max_attempts = policy.max_attempts(timeout);
    let mut attempts = 0;
    let mut last = None;
    let mut state = State::Attempting;

    loop {
        state = match state {
            State::Attempting if Instant::now() >= deadline => State::TimedOut,
            State::Attempting => {
                attempts += 1;
                debug!(attempt = attempts, "Attempt to discover certificate authority");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => State::Cancelled,
                    result = timeout_at(deadline, attempt(locator, namespace, selector)) => match result {
                        Err(_) => {
                            warn!(
                                attempt = attempts,
                                kind = Kind::TimedOut.to_string(),
                                "Failed to discover certificate authority, deadline reached during the attempt"
                            );

                            State::TimedOut
                        }
                        Ok(Ok((secret_name, certificate))) => State::Succeeded(Discovery {
                            certificate,
                            secret_name,
                            attempts,
                        }),
                        Ok(Err(err)) if !err.kind().retryable() => State::Fatal(err),
                        Ok(Err(err)) => {
                            warn!(
                                attempt = attempts,
                                kind = err.kind().to_string(),
                                error = err.to_string(),
                                "Failed to discover certificate authority"
                            );

                            let delay = policy.delay(attempts);
                            last = Some(Box::new(err));
                            if max_attempts.is_some_and(|max| attempts >= max) {
                                State::TimedOut
                            } else {
                                State::Retrying(delay)
                            }
                        }
                    },
                }
            }
            State::Retrying(delay) => {
                let wake = Instant::now()
                    .checked_add(delay)
                    .map_or(deadline, |wake| wake.min(deadline));

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => State::Cancelled,
                    _ = sleep_until(wake) => State::Attempting,
                }
            }
            State::Succeeded(discovery) => {
                info!(
                    secret = &discovery.secret_name,
                    attempts = discovery.attempts,
                    "Discovered certificate authority"
                );
                return Ok(discovery);
            }
            State::Fatal(err) => return Err(err),
            State::TimedOut => {
                return Err(Error::TimedOut {
                    attempts,
                    timeout,
                    last,
                })
            }
            State::Cancelled => return Err(Error::Cancelled(attempts)),
        }
    }
}

async fn attempt<L>(
    locator: &L,
    namespace: &str,
    selector: &Selector,
) -> Result<(String, CaCertificate), Error>
where
    L: Locator + Sync + ?Sized,
{
    let Located { name, data } = locator
        .locate(namespace, selector)
        .await
        .map_err(Error::Locate)?;

    // service account tokens hold the certificate authority itself, the
    // serving secret holds a chain
    let certificate = match selector {
        Selector::ByName(_) => pki::extract_ca(&data, TLS_CRT_KEY),
        Selector::ServiceAccountToken => pki::verbatim(&data, CA_CRT_KEY),
    }
    .map_err(|err| Error::Extract(name.to_owned(), err))?;

    Ok((name, certificate))
}
