//! JWT-style signed token codec.
//!
//! ```text
//! b64url(header) "." b64url(claims) "." hex(ed25519 signature)
//! ```
//!
//! The signature covers the ASCII bytes of `b64url(header) "." b64url(claims)`
//! exactly as transmitted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::signature::{Ed25519KeyPair, UnparsedPublicKey, ED25519};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// The only accepted `alg` header value.
pub const TOKEN_ALGORITHM: &str = "Ed25519";

/// Upper bound on the encoded token length.
pub const MAX_TOKEN_LEN: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// A token split into its parts, signature not yet checked.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    signing_input: String,
    claims_json: Vec<u8>,
    signature_hex: String,
}

impl DecodedToken {
    /// Deserialize the claim set.
    pub fn claims<C: DeserializeOwned>(&self) -> Result<C, RemoteError> {
        serde_json::from_slice(&self.claims_json)
            .map_err(|e| RemoteError::malformed(format!("invalid claims: {}", e)))
    }

    /// Check the signature against a raw 32-byte Ed25519 public key.
    pub fn verify(&self, public_key: &[u8]) -> bool {
        let signature = match hex::decode(&self.signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(self.signing_input.as_bytes(), &signature)
            .is_ok()
    }
}

/// Produces the raw 64-byte Ed25519 signature over a token's signing input.
pub trait TokenSigner {
    fn sign_input(&self, input: &[u8]) -> Vec<u8>;
}

impl TokenSigner for Ed25519KeyPair {
    fn sign_input(&self, input: &[u8]) -> Vec<u8> {
        self.sign(input).as_ref().to_vec()
    }
}

/// Serialize and sign a claim set.
pub fn encode_token<C, S>(claims: &C, signer: &S) -> Result<String, RemoteError>
where
    C: Serialize,
    S: TokenSigner + ?Sized,
{
    let header = serde_json::to_vec(&TokenHeader::default())?;
    let claims = serde_json::to_vec(claims)?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );
    let signature = signer.sign_input(signing_input.as_bytes());

    Ok(format!("{}.{}", signing_input, hex::encode(signature)))
}

/// Split and decode a token without verifying it.
pub fn decode_token(raw: &[u8]) -> Result<DecodedToken, RemoteError> {
    if raw.len() > MAX_TOKEN_LEN {
        return Err(RemoteError::malformed(format!(
            "token is {} bytes, maximum is {}",
            raw.len(),
            MAX_TOKEN_LEN
        )));
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| RemoteError::malformed("token is not UTF-8"))?
        .trim();

    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 3 {
        return Err(RemoteError::malformed(format!(
            "expected 3 token parts, got {}",
            parts.len()
        )));
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|e| RemoteError::malformed(format!("invalid header encoding: {}", e)))?;
    let header: TokenHeader = serde_json::from_slice(&header_json)
        .map_err(|e| RemoteError::malformed(format!("invalid header: {}", e)))?;
    if header.alg != TOKEN_ALGORITHM {
        return Err(RemoteError::malformed(format!(
            "unsupported algorithm '{}'",
            header.alg
        )));
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| RemoteError::malformed(format!("invalid claims encoding: {}", e)))?;

    Ok(DecodedToken {
        signing_input: format!("{}.{}", parts[0], parts[1]),
        claims_json,
        signature_hex: parts[2].to_string(),
    })
}
