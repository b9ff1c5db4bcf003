//! Bootstrap peer descriptors in the `enode://` URL scheme.
//!
//! An enode URL has the form
//! `enode://<128 hex chars>@<ip>:<tcp-port>[?discport=<udp-port>]`.
//! The hex body is the remote node's 64-byte uncompressed secp256k1 public
//! key; the node ID is its keccak256 digest. The host must be a literal IP
//! address. Without a `discport` query the UDP discovery port equals the
//! TCP port.

use alloy_primitives::{keccak256, B256, B512};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tracing::warn;

/// Errors from parsing an enode URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnodeParseError {
    /// The `enode://` scheme prefix is missing.
    #[error("missing enode:// scheme")]
    MissingScheme,

    /// No `@` separator between node ID and address.
    #[error("missing @ separator between node ID and address")]
    MissingAddress,

    /// The node ID is not 128 hex characters.
    #[error("node ID must be 128 hex characters")]
    InvalidId,

    /// The host is not a literal IP address.
    #[error("invalid IP address {0:?}")]
    InvalidHost(String),

    /// The TCP port is missing or unparseable.
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    /// The `discport` value is unparseable.
    #[error("invalid discovery port {0:?}")]
    InvalidDiscPort(String),

    /// The query string contains something other than `discport`.
    #[error("unsupported query parameter {0:?}")]
    UnsupportedQuery(String),
}

/// A validated bootstrap peer address.
///
/// Descriptors only exist for inputs that passed URL and identifier
/// validation; they are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapDescriptor {
    /// 64-byte uncompressed public key of the remote node.
    pubkey: B512,
    /// IP address of the remote node.
    addr: IpAddr,
    /// TCP listening port.
    tcp_port: u16,
    /// UDP discovery port.
    udp_port: u16,
}

impl BootstrapDescriptor {
    /// Create a descriptor with the discovery port equal to the TCP port.
    pub fn new(pubkey: B512, addr: IpAddr, tcp_port: u16) -> Self {
        Self {
            pubkey,
            addr,
            tcp_port,
            udp_port: tcp_port,
        }
    }

    /// Override the UDP discovery port.
    pub fn with_disc_port(mut self, udp_port: u16) -> Self {
        self.udp_port = udp_port;
        self
    }

    /// The remote node's 64-byte uncompressed public key.
    pub fn pubkey(&self) -> B512 {
        self.pubkey
    }

    /// The remote node ID: `keccak256` of the public key.
    pub fn node_id(&self) -> B256 {
        keccak256(self.pubkey)
    }

    /// The remote IP address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The remote TCP port.
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    /// The remote UDP discovery port.
    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }
}

impl FromStr for BootstrapDescriptor {
    type Err = EnodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("enode://")
            .ok_or(EnodeParseError::MissingScheme)?;
        let (id_part, addr_part) = rest
            .split_once('@')
            .ok_or(EnodeParseError::MissingAddress)?;

        if id_part.len() != 128 {
            return Err(EnodeParseError::InvalidId);
        }
        let mut pubkey = [0u8; 64];
        hex::decode_to_slice(id_part, &mut pubkey).map_err(|_| EnodeParseError::InvalidId)?;
        let pubkey = B512::from(pubkey);

        let (host_part, query) = match addr_part.split_once('?') {
            Some((host, query)) => (host, Some(query)),
            None => (addr_part, None),
        };

        let (host, port) = host_part
            .rsplit_once(':')
            .ok_or_else(|| EnodeParseError::InvalidPort(host_part.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let addr: IpAddr = host
            .parse()
            .map_err(|_| EnodeParseError::InvalidHost(host.to_string()))?;
        let tcp_port: u16 = port
            .parse()
            .map_err(|_| EnodeParseError::InvalidPort(port.to_string()))?;

        let mut descriptor = Self::new(pubkey, addr, tcp_port);
        if let Some(query) = query {
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some(("discport", value)) => {
                        let udp_port = value
                            .parse()
                            .map_err(|_| EnodeParseError::InvalidDiscPort(value.to_string()))?;
                        descriptor = descriptor.with_disc_port(udp_port);
                    }
                    _ => return Err(EnodeParseError::UnsupportedQuery(pair.to_string())),
                }
            }
        }
        Ok(descriptor)
    }
}

impl fmt::Display for BootstrapDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enode://{}@{}",
            hex::encode(self.pubkey),
            SocketAddr::new(self.addr, self.tcp_port)
        )?;
        if self.udp_port != self.tcp_port {
            write!(f, "?discport={}", self.udp_port)?;
        }
        Ok(())
    }
}

/// Parse a comma-separated bootstrap node list, dropping malformed entries.
///
/// Empty input and empty segments produce nothing. A malformed segment is
/// logged and skipped, so one bad entry never empties the whole list.
/// Ordering follows the input; duplicates are kept.
pub fn parse_bootstrap_list(csv: &str) -> Vec<BootstrapDescriptor> {
    let mut nodes = Vec::new();
    for segment in csv.split(',') {
        if segment.is_empty() {
            continue;
        }
        match segment.parse() {
            Ok(node) => nodes.push(node),
            Err(err) => warn!(url = segment, %err, "invalid bootstrap node URL"),
        }
    }
    nodes
}
