//! HMAC-signed JWT issuance for handshake tokens.
//!
//! Tokens carry a single `sub` claim and no expiry. The header is serialized
//! as `{"alg":..,"typ":"JWT"}` so the output matches what mainstream JWT
//! libraries produce for the same secret.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use clap::ValueEnum;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SigningAlgorithm {
    #[value(name = "HS256")]
    Hs256,
    #[value(name = "HS384")]
    Hs384,
    #[value(name = "HS512")]
    Hs512,
}

impl SigningAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            SigningAlgorithm::Hs256 => "HS256",
            SigningAlgorithm::Hs384 => "HS384",
            SigningAlgorithm::Hs512 => "HS512",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
}

/// A signed token, consumed by exactly one handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Stateless token signer. Cloning shares the key.
#[derive(Clone)]
pub struct CredentialIssuer {
    key: Arc<Vec<u8>>,
    algorithm: SigningAlgorithm,
}

impl CredentialIssuer {
    /// Builds an issuer and signs a throwaway token so that a bad key fails
    /// here, before any worker depends on it.
    pub fn new(secret: &str, algorithm: SigningAlgorithm) -> Result<Self, CredentialError> {
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }

        let issuer = Self {
            key: Arc::new(secret.as_bytes().to_vec()),
            algorithm,
        };
        issuer.issue("startup")?;
        Ok(issuer)
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn issue(&self, subject: &str) -> Result<Credential, CredentialError> {
        let header = sonic_rs::to_string(&Header {
            alg: self.algorithm.as_str(),
            typ: "JWT",
        })?;
        let claims = sonic_rs::to_string(&Claims { sub: subject })?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );

        let signature = match self.algorithm {
            SigningAlgorithm::Hs256 => {
                sign::<Hmac<Sha256>>(&self.key, &signing_input, self.algorithm)?
            }
            SigningAlgorithm::Hs384 => {
                sign::<Hmac<Sha384>>(&self.key, &signing_input, self.algorithm)?
            }
            SigningAlgorithm::Hs512 => {
                sign::<Hmac<Sha512>>(&self.key, &signing_input, self.algorithm)?
            }
        };

        Ok(Credential(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        )))
    }
}

fn sign<M: Mac + KeyInit>(
    key: &[u8],
    input: &str,
    algorithm: SigningAlgorithm,
) -> Result<Vec<u8>, CredentialError> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| {
        CredentialError::InvalidKey {
            algorithm: algorithm.as_str(),
        }
    })?;
    mac.update(input.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Subject id presented by worker `id`.
pub fn subject_for(id: usize) -> String {
    format!("u_{}", id)
}
