//! One-shot session configuration.

use strand_enode::BootstrapDescriptor;
use strand_identity::NodeIdentity;

/// Maximum concurrent peer connections.
pub const MAX_PEERS: usize = 50;

/// Client name advertised to peers.
pub const CLIENT_NAME: &str = concat!("strand/v", env!("CARGO_PKG_VERSION"));

/// Fully assembled engine configuration.
///
/// Built once from pre-validated inputs, consumed once by session start,
/// never mutated in between.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local node identity.
    pub identity: NodeIdentity,
    /// Listen address in `[host]:port` form; an empty host binds all
    /// interfaces. Interpreted by the engine.
    pub listen_addr: String,
    /// Upper bound on concurrent peer connections.
    pub max_peers: usize,
    /// Client name advertised to peers.
    pub name: String,
    /// Whether the engine should run peer discovery.
    pub discovery: bool,
    /// Whether the engine should attempt NAT traversal.
    pub nat: bool,
    /// Comma-separated CIDR ranges restricting peer connections.
    /// Opaque here; parsed and enforced by the engine.
    pub netrestrict: Option<String>,
    /// Initial peers to dial.
    pub bootnodes: Vec<BootstrapDescriptor>,
}

impl SessionConfig {
    /// Assemble the engine configuration from its pre-validated parts.
    ///
    /// Pure construction: policy constants are embedded here, and there is
    /// no failure path.
    pub fn assemble(
        identity: NodeIdentity,
        listen_addr: impl Into<String>,
        bootnodes: Vec<BootstrapDescriptor>,
        netrestrict: Option<String>,
    ) -> Self {
        Self {
            identity,
            listen_addr: listen_addr.into(),
            max_peers: MAX_PEERS,
            name: CLIENT_NAME.to_string(),
            discovery: true,
            nat: true,
            netrestrict,
            bootnodes,
        }
    }
}
