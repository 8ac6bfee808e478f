//! Where the session gets its signer from.

use std::sync::Arc;

use peerline_shared::{LocalIdentity, SigningIdentity};

/// Source of the signing identity for a login, e.g. a connected wallet.
pub trait IdentityProvider: Send + Sync {
    /// The current signer, or `None` when nothing is connected.
    fn signer(&self) -> Option<Arc<dyn SigningIdentity>>;
}

/// Hands out a fixed signer (or none).
#[derive(Clone, Default)]
pub struct StaticIdentityProvider {
    signer: Option<Arc<dyn SigningIdentity>>,
}

impl StaticIdentityProvider {
    pub fn new(signer: Arc<dyn SigningIdentity>) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    /// A provider with no signer connected.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl From<LocalIdentity> for StaticIdentityProvider {
    fn from(identity: LocalIdentity) -> Self {
        Self::new(Arc::new(identity))
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn signer(&self) -> Option<Arc<dyn SigningIdentity>> {
        self.signer.clone()
    }
}
