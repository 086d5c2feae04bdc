use std::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;

pub const HEADER: &str = "X-Hub-Signature";

const PREFIX: &[u8] = b"sha1=";
const DIGEST_LEN: usize = 20;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("`X-Hub-Signature` header isn't found")]
    HeaderNotFound,
    #[error("`X-Hub-Signature` has invalid length")]
    InvalidLength,
    #[error("`X-Hub-Signature` must start with `sha1=`")]
    InvalidPrefix,
    #[error("signature must be 40 lowercase hex digits")]
    NotHex,
    #[error("HMAC key has invalid length")]
    HmacInvalidLength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub [u8; DIGEST_LEN]);

impl Signature {
    pub fn from_headers(headers: &actix_web::http::header::HeaderMap) -> Result<Self, Error> {
        let sig_b = headers.get(HEADER).ok_or(Error::HeaderNotFound)?.as_bytes();
        Self::parse(sig_b)
    }

    pub fn parse(sig_b: &[u8]) -> Result<Self, Error> {
        if sig_b.len() != DIGEST_LEN * 2 + PREFIX.len() {
            return Err(Error::InvalidLength);
        }
        let (sig_prefix, sig_b) = sig_b.split_at(PREFIX.len());
        if sig_prefix != PREFIX {
            return Err(Error::InvalidPrefix);
        }
        // GitHub always sends lowercase; accepting uppercase would let a
        // mutated header through.
        if !sig_b.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::NotHex);
        }

        hex::FromHex::from_hex(sig_b)
            .map(Self)
            .map_err(|_| Error::NotHex)
    }

    pub fn compute(secret: &[u8], body: &[u8]) -> Result<Self, Error> {
        let mut mac = new_mac(secret)?;
        mac.update(body);
        let mut digest = [0; DIGEST_LEN];
        digest.copy_from_slice(&mac.finalize().into_bytes());
        Ok(Self(digest))
    }

    /// Constant-time check of this signature against `HMAC-SHA1(secret, body)`.
    pub fn verify(&self, secret: &[u8], body: &[u8]) -> Result<bool, Error> {
        let mut mac = new_mac(secret)?;
        mac.update(body);
        Ok(mac.verify_slice(&self.0).is_ok())
    }
}

fn new_mac(secret: &[u8]) -> Result<HmacSha1, Error> {
    HmacSha1::new_from_slice(secret).map_err(|_| Error::HmacInvalidLength)
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha1={}", hex::encode(self.0))
    }
}
