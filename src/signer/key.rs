//! Node signing key and its providers.

use std::fmt;
use std::path::{Path, PathBuf};

use ed25519_dalek::hazmat::{raw_sign, ExpandedSecretKey};
use ed25519_dalek::VerifyingKey;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use sha2::Sha512;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::RemoteError;
use crate::protocol::{encode_token, TokenSigner};
use crate::serial::SerialLink;

/// Serial command that prints the node's private key.
pub const DEVICE_KEY_COMMAND: &str = "get prv.key";

/// The node's Ed25519 signing key. Lives in memory only.
///
/// Held in expanded form (clamped scalar and nonce prefix), which is what
/// the node firmware stores and prints.
pub struct NodeKey {
    secret: ExpandedSecretKey,
    public: VerifyingKey,
    public_hex: String,
}

impl NodeKey {
    fn from_expanded(secret: ExpandedSecretKey) -> Self {
        let public = VerifyingKey::from(&secret);
        let public_hex = hex::encode(public.as_bytes());
        Self {
            secret,
            public,
            public_hex,
        }
    }

    /// Key derived from a 32-byte RFC 8032 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_expanded(ExpandedSecretKey::from(seed))
    }

    /// Fresh random key.
    pub fn generate() -> Result<Self, RemoteError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        SystemRandom::new()
            .fill(&mut seed[..])
            .map_err(|_| RemoteError::Key {
                message: "system random source failed".to_string(),
            })?;
        Ok(Self::from_seed(&seed))
    }

    /// Parse hex key material: a 32-byte seed, or the 64-byte expanded
    /// key `clamp(SHA-512(seed))` as printed by the node.
    pub fn from_hex(material: &str) -> Result<Self, RemoteError> {
        let compact: Zeroizing<String> =
            Zeroizing::new(material.chars().filter(|c| !c.is_whitespace()).collect());
        let bytes = Zeroizing::new(hex::decode(compact.as_str()).map_err(|e| RemoteError::Key {
            message: format!("key material is not hex: {}", e),
        })?);

        match bytes.len() {
            32 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                seed.copy_from_slice(&bytes);
                Ok(Self::from_seed(&seed))
            }
            64 => {
                let mut expanded = Zeroizing::new([0u8; 64]);
                expanded.copy_from_slice(&bytes);
                Ok(Self::from_expanded(ExpandedSecretKey::from_bytes(&expanded)))
            }
            other => Err(RemoteError::Key {
                message: format!("expected 32 or 64 key bytes, got {}", other),
            }),
        }
    }

    pub fn public_key(&self) -> &[u8] {
        self.public.as_bytes()
    }

    /// Lowercase hex public key.
    pub fn public_hex(&self) -> &str {
        &self.public_hex
    }

    /// Sign a claim set into a token.
    pub fn sign_claims<C: Serialize>(&self, claims: &C) -> Result<String, RemoteError> {
        encode_token(claims, self)
    }
}

impl TokenSigner for NodeKey {
    fn sign_input(&self, input: &[u8]) -> Vec<u8> {
        raw_sign::<Sha512>(&self.secret, input, &self.public)
            .to_bytes()
            .to_vec()
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKey")
            .field("public_key", &self.public_hex)
            .finish_non_exhaustive()
    }
}

/// One-time source of the node signing key.
pub trait KeyProvider {
    fn signing_key(&mut self) -> Result<NodeKey, RemoteError>;
}

/// Reads hex key material from a file readable only by its owner.
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn check_permissions(path: &Path) -> Result<(), RemoteError> {
        let metadata = std::fs::metadata(path).map_err(|e| RemoteError::Key {
            message: format!("Failed to read key metadata from {}: {}", path.display(), e),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(RemoteError::Key {
                    message: format!(
                        "Key file {} has insecure permissions {:04o}, expected 0600 or 0400",
                        path.display(),
                        mode & 0o777
                    ),
                });
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        Ok(())
    }
}

impl KeyProvider for FileKeyProvider {
    fn signing_key(&mut self) -> Result<NodeKey, RemoteError> {
        Self::check_permissions(&self.path)?;
        let content = Zeroizing::new(std::fs::read_to_string(&self.path).map_err(|e| {
            RemoteError::Key {
                message: format!("Failed to read key from {}: {}", self.path.display(), e),
            }
        })?);

        let key = NodeKey::from_hex(&content)?;
        info!(
            path = %self.path.display(),
            public_key = %key.public_hex(),
            "Loaded node signing key from file"
        );
        Ok(key)
    }
}

/// Asks the node for its key over the serial line.
pub struct DeviceKeyProvider<'a> {
    link: &'a mut dyn SerialLink,
}

impl<'a> DeviceKeyProvider<'a> {
    pub fn new(link: &'a mut dyn SerialLink) -> Self {
        Self { link }
    }
}

impl KeyProvider for DeviceKeyProvider<'_> {
    fn signing_key(&mut self) -> Result<NodeKey, RemoteError> {
        debug!(command = DEVICE_KEY_COMMAND, "Requesting signing key from node");
        let lines = self.link.exchange(DEVICE_KEY_COMMAND)?;

        let material = lines
            .iter()
            .flat_map(|line| line.split(|c: char| !c.is_ascii_hexdigit()))
            .find(|word| word.len() == 64 || word.len() == 128)
            .map(|word| Zeroizing::new(word.to_string()))
            .ok_or_else(|| RemoteError::Key {
                message: "node reply did not contain key material".to_string(),
            })?;

        let key = NodeKey::from_hex(&material)?;
        info!(public_key = %key.public_hex(), "Loaded node signing key from device");
        Ok(key)
    }
}
