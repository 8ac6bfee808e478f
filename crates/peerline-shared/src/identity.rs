use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::constants::{ADDRESS_HEX_LEN, ADDRESS_PREFIX, KDF_CONTEXT_ADDRESS, PUBKEY_SIZE};
use crate::error::IdentityError;

/// A signing capability bound to an address.
///
/// This is what a channel session is established with. Implementations wrap
/// a wallet, a hardware key or, for local use and tests, [`LocalIdentity`].
pub trait SigningIdentity: Send + Sync {
    /// The stable address this identity signs for.
    fn address(&self) -> Address;

    /// Raw public key bytes.
    fn public_key(&self) -> Vec<u8>;

    /// Sign an arbitrary message.
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// An Ed25519 identity held in memory.
#[derive(Clone)]
pub struct LocalIdentity {
    signing_key: SigningKey,
}

/// Serializable format for storing/exporting identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub secret_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl LocalIdentity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    pub fn from_export(export: &IdentityExport) -> Self {
        Self::from_secret_bytes(&export.secret_key)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: *self.signing_key.as_bytes(),
            public_key: self.signing_key.verifying_key().to_bytes(),
        }
    }
}

impl SigningIdentity for LocalIdentity {
    fn address(&self) -> Address {
        address_for_public_key(&self.public_key_bytes())
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_key_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Derive the wallet-style address for an Ed25519 public key.
pub fn address_for_public_key(public_key: &[u8; PUBKEY_SIZE]) -> Address {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_ADDRESS);
    hasher.update(public_key);
    let hash = hasher.finalize();
    let digits = hex::encode(&hash.as_bytes()[..ADDRESS_HEX_LEN / 2]);
    Address::new(format!("{ADDRESS_PREFIX}{digits}"))
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let pubkey: [u8; PUBKEY_SIZE] = pubkey_bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyBytes)?;
    let verifying_key =
        VerifyingKey::from_bytes(&pubkey).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| IdentityError::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| IdentityError::InvalidSignature)
}
