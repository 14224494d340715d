//! SASL PLAIN payload encoding (RFC 4616).
//!
//! Reference: <https://ircv3.net/specs/extensions/sasl-3.2>

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// SASL PLAIN credentials.
///
/// `authzid` is usually empty; `authcid` is the account being
/// authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaslPlain {
    /// Authorization identity (who to act as), usually empty.
    pub authzid: String,
    /// Authentication identity (account name).
    pub authcid: String,
    /// Password.
    pub password: String,
}

impl SaslPlain {
    /// Credentials with an empty authzid.
    pub fn new(authcid: impl Into<String>, password: impl Into<String>) -> SaslPlain {
        SaslPlain {
            authzid: String::new(),
            authcid: authcid.into(),
            password: password.into(),
        }
    }

    /// The base64 payload for `AUTHENTICATE <b64>`.
    pub fn payload(&self) -> String {
        encode_plain(&self.authzid, &self.authcid, &self.password)
    }
}

/// Encode `authzid NUL authcid NUL password` as base64.
pub fn encode_plain(authzid: &str, authcid: &str, password: &str) -> String {
    let payload = format!("{}\0{}\0{}", authzid, authcid, password);
    BASE64.encode(payload.as_bytes())
}
