//! Request and URL signing.
//!
//! This module provides:
//! - HMAC-SHA256 signatures with an embedded expiry
//! - Signed URIs (signature carried in the `sign` query parameter)
//! - Signed peer requests (signature carried in `Authorization`)

mod signer;

pub use signer::{HmacSigner, SignError, request_sign_content};
