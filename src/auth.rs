//! SASL PLAIN (RFC 4616) payload decoding.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;

/// The three fields of a PLAIN response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Identity to act as. Usually empty.
    pub authorization: String,
    /// Identity whose password is presented.
    pub authentication: String,
    pub password: String,
}

#[derive(Error, Debug)]
pub enum PlainError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("expected 3 NUL-separated fields, found {0}")]
    FieldCount(usize),
}

/// Decodes `base64(authzid NUL authcid NUL passwd)`.
///
/// Every failure here is a syntax problem; whether the credentials are any
/// good is for the caller to decide.
pub fn decode_plain(payload: &str) -> Result<Credentials, PlainError> {
    let bytes = B64.decode(payload.trim().as_bytes())?;
    let text = String::from_utf8(bytes).map_err(|_| PlainError::NotUtf8)?;

    let fields: Vec<&str> = text.split('\0').collect();
    match fields.as_slice() {
        [authorization, authentication, password] => Ok(Credentials {
            authorization: authorization.to_string(),
            authentication: authentication.to_string(),
            password: password.to_string(),
        }),
        _ => Err(PlainError::FieldCount(fields.len())),
    }
}
