//! Persistent node identity.
//!
//! A node's identity is a secp256k1 key pair. The private key is persisted
//! as a hex-encoded 32-byte scalar; the node ID is the keccak256 digest of
//! the 64-byte uncompressed public key, so the same key file always yields
//! the same ID.

use alloy_primitives::{keccak256, B256};
use alloy_signer::k256::ecdsa::SigningKey;
use alloy_signer::k256::elliptic_curve::sec1::ToEncodedPoint;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 32-byte node identifier derived from the public key.
pub type NodeId = B256;

/// Errors from loading or creating the persistent node key.
///
/// Every variant is fatal: the process must not participate in the network
/// without a stable identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The key file exists but could not be decoded.
    #[error("corrupt node key file {path}")]
    Corrupt {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying decode failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A freshly generated key could not be written out.
    #[error("failed to persist node key to {path}")]
    Persist {
        /// Path the key was being written to.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Probing the key file failed for a reason other than absence.
    #[error("failed to probe node key file {path}")]
    Probe {
        /// Path that was probed.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The node's cryptographic identity.
///
/// Cloning is cheap; the signing key is shared behind an `Arc` and never
/// mutated after construction. The node ID is cached at construction time.
#[derive(Clone)]
pub struct NodeIdentity {
    /// Signing key for this node.
    key: Arc<SigningKey>,
    /// Cached node ID.
    id: NodeId,
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl NodeIdentity {
    /// Build an identity from an existing signing key.
    pub fn from_key(key: SigningKey) -> Self {
        let point = key.verifying_key().to_encoded_point(false);
        let id = keccak256(&point.as_bytes()[1..]);
        Self {
            key: Arc::new(key),
            id,
        }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::from_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// The node ID: `keccak256` of the uncompressed public key.
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// The signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// The 64-byte uncompressed public key body (SEC1 tag stripped), as
    /// carried in enode URLs.
    pub fn public_key_bytes(&self) -> [u8; 64] {
        let point = self.key.verifying_key().to_encoded_point(false);
        let mut out = [0u8; 64];
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// The raw 32-byte secret scalar.
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.key.to_bytes().as_slice());
        out
    }
}

/// Load the node key from `path`, or generate and persist a new one if no
/// file exists there.
///
/// The written encoding is loadable by this same function, and the derived
/// node ID is stable across restarts.
pub fn load_or_create(path: impl AsRef<Path>) -> Result<NodeIdentity, IdentityError> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Ok(_) => load(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => generate_and_persist(path),
        Err(err) => Err(IdentityError::Probe {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn load(path: &Path) -> Result<NodeIdentity, IdentityError> {
    let corrupt = |source: Box<dyn std::error::Error + Send + Sync>| IdentityError::Corrupt {
        path: path.to_path_buf(),
        source,
    };

    let text = fs::read_to_string(path).map_err(|e| corrupt(Box::new(e)))?;
    let bytes = hex::decode(text.trim()).map_err(|e| corrupt(Box::new(e)))?;
    let key = SigningKey::from_slice(&bytes).map_err(|e| corrupt(Box::new(e)))?;
    Ok(NodeIdentity::from_key(key))
}

fn generate_and_persist(path: &Path) -> Result<NodeIdentity, IdentityError> {
    let persist = |source: io::Error| IdentityError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let identity = NodeIdentity::generate();

    // Only directories created here get the restrictive mode; an existing
    // parent is left untouched.
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_key_dir(dir).map_err(persist)?;
    }

    fs::write(path, hex::encode(identity.secret_bytes())).map_err(persist)?;
    restrict_key_file(path).map_err(persist)?;

    info!(id = %identity.node_id(), path = %path.display(), "generated new node key");
    Ok(identity)
}

#[cfg(unix)]
fn create_key_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_key_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn restrict_key_file(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn restrict_key_file(_path: &Path) -> io::Result<()> {
    Ok(())
}
