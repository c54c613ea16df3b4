//! HMAC signer.
//!
//! A signature is `base64url(HMAC-SHA256(body ":" expires)) ":" expires`,
//! where `expires` is a unix timestamp and `0` means the signature never
//! expires.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Signature check failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    /// No signature was supplied.
    #[error("signature missing")]
    Missing,

    /// The signature does not match.
    #[error("signature invalid")]
    Invalid,

    /// The signature's expiry has passed.
    #[error("signature expired")]
    Expired,

    /// The URI to sign could not be parsed.
    #[error("invalid uri: {0}")]
    InvalidUri(String),
}

/// Canonical content signed for a peer request.
///
/// Upload requests carry their policy in `X-Policy` and sign the path and
/// policy only; other requests sign the path and the body.
#[must_use]
pub fn request_sign_content(path: &str, policy: Option<&str>, body: &str) -> String {
    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct RequestRawSign<'a> {
        path: &'a str,
        policy: &'a str,
        body: &'a str,
    }

    let raw = match policy {
        Some(policy) => RequestRawSign {
            path,
            policy,
            body: "",
        },
        None => RequestRawSign {
            path,
            policy: "",
            body,
        },
    };
    serde_json::to_string(&raw).unwrap_or_default()
}

/// HMAC-SHA256 signer keyed by a shared secret.
#[derive(Clone)]
pub struct HmacSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").field("key", &"[hidden]").finish()
    }
}

impl HmacSigner {
    /// Creates a signer.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, body: &str, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(format!("{body}:{expires}").as_bytes());
        Some(mac)
    }

    /// Signs `body` with an absolute expiry timestamp.
    #[must_use]
    pub fn sign(&self, body: &str, expires: i64) -> String {
        self.mac(body, expires).map_or_else(String::new, |mac| {
            format!("{}:{expires}", URL_SAFE.encode(mac.finalize().into_bytes()))
        })
    }

    /// Verifies a signature produced by [`HmacSigner::sign`].
    pub fn check(&self, body: &str, sign: &str) -> Result<(), SignError> {
        if sign.is_empty() {
            return Err(SignError::Missing);
        }
        let (digest, expires) = sign.rsplit_once(':').ok_or(SignError::Invalid)?;
        let expires: i64 = expires.parse().map_err(|_| SignError::Invalid)?;
        if expires != 0 && expires < Utc::now().timestamp() {
            return Err(SignError::Expired);
        }

        let digest = URL_SAFE.decode(digest).map_err(|_| SignError::Invalid)?;
        let mac = self.mac(body, expires).ok_or(SignError::Invalid)?;
        mac.verify_slice(&digest).map_err(|_| SignError::Invalid)
    }

    /// Adds a `sign` query parameter covering the URI's path.
    ///
    /// `ttl` is relative seconds; `0` never expires. Relative URIs stay
    /// relative.
    pub fn sign_uri(&self, uri: &str, ttl: i64) -> Result<String, SignError> {
        let expires = if ttl == 0 {
            0
        } else {
            Utc::now().timestamp() + ttl
        };

        let (mut url, relative) = match Url::parse(uri) {
            Ok(url) => (url, false),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let url = Url::parse("http://localhost")
                    .and_then(|base| base.join(uri))
                    .map_err(|e| SignError::InvalidUri(e.to_string()))?;
                (url, true)
            }
            Err(e) => return Err(SignError::InvalidUri(e.to_string())),
        };

        let sign = self.sign(url.path(), expires);
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "sign")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("sign", &sign);

        if relative {
            Ok(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
        } else {
            Ok(url.to_string())
        }
    }

    /// Verifies the `sign` query parameter of a signed URI.
    pub fn check_path(&self, path: &str, sign: Option<&str>) -> Result<(), SignError> {
        self.check(path, sign.ok_or(SignError::Missing)?)
    }

    /// Produces an `Authorization` header value for a peer request.
    ///
    /// `ttl` is relative seconds; `0` never expires.
    #[must_use]
    pub fn sign_request(&self, path: &str, policy: Option<&str>, body: &str, ttl: i64) -> String {
        let expires = if ttl > 0 {
            Utc::now().timestamp() + ttl
        } else {
            ttl
        };
        format!(
            "Bearer {}",
            self.sign(&request_sign_content(path, policy, body), expires)
        )
    }

    /// Verifies an `Authorization` header produced by [`HmacSigner::sign_request`].
    pub fn check_request(
        &self,
        path: &str,
        policy: Option<&str>,
        body: &str,
        authorization: Option<&str>,
    ) -> Result<(), SignError> {
        let header = authorization.ok_or(SignError::Missing)?;
        let sign = header.strip_prefix("Bearer ").unwrap_or(header);
        self.check(&request_sign_content(path, policy, body), sign)
    }
}
