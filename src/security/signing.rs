//! Time-limited signed WebSocket URLs.
//!
//! A signed URL carries `expires` (unix seconds) and `signature`, the hex
//! HMAC-SHA256 over the path and the sorted remaining query pairs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ring::hmac;
use thiserror::Error;
use url::Url;

use crate::error::RelayError;

const EXPIRES: &str = "expires";
const SIGNATURE: &str = "signature";

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("missing {0} parameter")]
    Missing(&'static str),
    #[error("signed url expired")]
    Expired,
    #[error("invalid signature")]
    Invalid,
}

impl From<SignatureError> for RelayError {
    fn from(e: SignatureError) -> Self {
        RelayError::Unauthorized(e.to_string())
    }
}

#[derive(Clone)]
pub struct UrlSigner {
    key: hmac::Key,
    ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").field("ttl", &self.ttl).finish()
    }
}

impl UrlSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            ttl,
        }
    }

    /// Append `expires` and `signature` to `url`.
    pub fn sign(&self, url: &Url) -> Url {
        let expires = unix_now() + self.ttl.as_secs();
        let mut signed = url.clone();
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != EXPIRES && k != SIGNATURE)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.push((EXPIRES.to_string(), expires.to_string()));

        let tag = hmac::sign(&self.key, canonical(url.path(), &pairs).as_bytes());
        signed
            .query_pairs_mut()
            .clear()
            .extend_pairs(&pairs)
            .append_pair(SIGNATURE, &hex::encode(tag.as_ref()));
        signed
    }

    /// Check a request path and its decoded query pairs.
    pub fn verify(&self, path: &str, query: &[(String, String)]) -> Result<(), SignatureError> {
        let mut signature = None;
        let mut expires = None;
        let mut pairs = Vec::with_capacity(query.len());
        for (k, v) in query {
            match k.as_str() {
                SIGNATURE => signature = Some(v.as_str()),
                EXPIRES => {
                    expires = Some(v.as_str());
                    pairs.push((k.clone(), v.clone()));
                }
                _ => pairs.push((k.clone(), v.clone())),
            }
        }

        let signature = signature.ok_or(SignatureError::Missing(SIGNATURE))?;
        let expires: u64 = expires
            .ok_or(SignatureError::Missing(EXPIRES))?
            .parse()
            .map_err(|_| SignatureError::Invalid)?;
        if unix_now() > expires {
            return Err(SignatureError::Expired);
        }

        let tag = hex::decode(signature).map_err(|_| SignatureError::Invalid)?;
        hmac::verify(&self.key, canonical(path, &pairs).as_bytes(), &tag)
            .map_err(|_| SignatureError::Invalid)
    }
}

fn canonical(path: &str, pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort();
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}\n{}", path, query.join("&"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
