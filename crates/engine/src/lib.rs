//! libp2p-backed peer-networking engine.
//!
//! Transport stack:
//! ```text
//! DNS (resolves /dns/, /dns4/, /dns6/)
//!   └── TCP
//!         └── Noise (encryption)
//!               └── Yamux (multiplexing)
//! ```
//!
//! The node's persisted secp256k1 key keys the transport, so the engine
//! peer ID and the node ID derive from the same identity. Behaviours are
//! identify (peer info exchange), ping (keepalive), and optionally UPnP
//! port mapping when NAT traversal is requested.

mod restrict;

pub use restrict::{InvalidMask, NetRestrict};

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use alloy_signer::k256::ecdsa::VerifyingKey;
use alloy_signer::k256::elliptic_curve::sec1::ToEncodedPoint;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::StreamExt;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{
    identify, identity, multiaddr::Protocol, noise, ping, tcp, upnp, yamux, Multiaddr, PeerId,
    Swarm, SwarmBuilder,
};
use strand_enode::BootstrapDescriptor;
use strand_identity::NodeIdentity;
use strand_node::{EngineHandle, PeerCount, PeerEngine, SessionConfig};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection idle timeout.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Keepalive ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Bound on waiting for the listener to come up during start.
const LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for the event loop to wind down during stop.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Combined network behaviour.
#[derive(NetworkBehaviour)]
struct EngineBehaviour {
    /// Identify protocol - exchange peer info.
    identify: identify::Behaviour,

    /// Ping protocol - keep connections alive.
    ping: ping::Behaviour,

    /// UPnP port mapping, present when NAT traversal is requested.
    upnp: Toggle<upnp::tokio::Behaviour>,
}

impl EngineBehaviour {
    fn new(local_public_key: identity::PublicKey, name: &str, nat: bool) -> Self {
        Self {
            identify: identify::Behaviour::new(
                identify::Config::new("/strand/1.0.0".to_string(), local_public_key)
                    .with_agent_version(name.to_string()),
            ),
            ping: ping::Behaviour::new(ping::Config::new().with_interval(PING_INTERVAL)),
            upnp: nat.then(upnp::tokio::Behaviour::default).into(),
        }
    }
}

/// Peer-networking engine over libp2p.
#[derive(Debug, Clone, Copy, Default)]
pub struct Libp2pEngine;

#[async_trait]
impl PeerEngine for Libp2pEngine {
    type Handle = Libp2pHandle;

    async fn start(&self, config: SessionConfig) -> Result<Self::Handle> {
        start_session(config).await
    }
}

/// Handle to a started engine instance.
pub struct Libp2pHandle {
    local_url: String,
    peers: PeerCount,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[async_trait]
impl EngineHandle for Libp2pHandle {
    fn local_url(&self) -> &str {
        &self.local_url
    }

    fn peers(&self) -> &PeerCount {
        &self.peers
    }

    async fn stop(self) {
        let Libp2pHandle {
            shutdown, mut task, ..
        } = self;

        let _ = shutdown.send(());
        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(_) => debug!("engine stopped"),
            Err(_) => {
                task.abort();
                warn!("engine shutdown timed out, aborting event loop");
            }
        }
    }
}

async fn start_session(config: SessionConfig) -> Result<Libp2pHandle> {
    let restrict = match config.netrestrict.as_deref() {
        Some(list) => NetRestrict::parse(list).wrap_err("invalid network restriction filter")?,
        None => NetRestrict::default(),
    };

    debug!(
        name = %config.name,
        max_peers = config.max_peers,
        discovery = config.discovery,
        nat = config.nat,
        restricted = !restrict.is_empty(),
        "engine configuration"
    );

    let keypair = engine_keypair(&config.identity)?;

    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_dns()?
        .with_behaviour(|keypair| {
            Ok(EngineBehaviour::new(
                keypair.public().clone(),
                &config.name,
                config.nat,
            ))
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(IDLE_TIMEOUT))
        .build();

    let listen_addr = parse_listen_addr(&config.listen_addr)?;
    swarm
        .listen_on(listen_addr.clone())
        .wrap_err_with(|| format!("failed to listen on {listen_addr}"))?;

    // The local URL carries the bound address, which only materializes once
    // the listener reports in.
    let bound = wait_for_listen_addr(&mut swarm).await?;
    let local_url = enode_url(&config.identity, bound);
    info!(peer_id = %swarm.local_peer_id(), %bound, "engine listening");

    dial_bootnodes(&mut swarm, &config.bootnodes);

    let peers = PeerCount::new();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(event_loop(
        swarm,
        peers.clone(),
        restrict,
        config.max_peers,
        shutdown_rx,
    ));

    Ok(Libp2pHandle {
        local_url,
        peers,
        shutdown: shutdown_tx,
        task,
    })
}

/// Build the transport keypair from the node's persisted secret.
fn engine_keypair(identity: &NodeIdentity) -> Result<identity::Keypair> {
    let secret = identity::secp256k1::SecretKey::try_from_bytes(identity.secret_bytes())
        .map_err(|err| eyre!("node key rejected by transport: {err}"))?;
    Ok(identity::secp256k1::Keypair::from(secret).into())
}

/// Interpret a `[host]:port` listen string; an empty host binds all
/// interfaces.
fn parse_listen_addr(addr: &str) -> Result<Multiaddr> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| eyre!("listen address {addr:?} is missing a port"))?;
    let port: u16 = port
        .parse()
        .wrap_err_with(|| format!("invalid port in listen address {addr:?}"))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let ip: IpAddr = if host.is_empty() {
        IpAddr::from([0u8, 0, 0, 0])
    } else {
        host.parse()
            .wrap_err_with(|| format!("invalid host in listen address {addr:?}"))?
    };

    Ok(socketaddr_to_multiaddr(SocketAddr::new(ip, port)))
}

/// Drive the swarm until the listener reports its bound address.
async fn wait_for_listen_addr(swarm: &mut Swarm<EngineBehaviour>) -> Result<SocketAddr> {
    let wait = async {
        loop {
            match swarm.select_next_some().await {
                SwarmEvent::NewListenAddr { address, .. } => {
                    if let Some(addr) = multiaddr_to_socketaddr(&address) {
                        return Ok(addr);
                    }
                }
                SwarmEvent::ListenerError { error, .. } => {
                    return Err(eyre!("listener failed during startup: {error}"));
                }
                SwarmEvent::ListenerClosed { reason, .. } => {
                    return Err(eyre!("listener closed during startup: {reason:?}"));
                }
                _ => {}
            }
        }
    };

    tokio::time::timeout(LISTEN_TIMEOUT, wait)
        .await
        .map_err(|_| eyre!("timed out waiting for the listener to come up"))?
}

/// Canonical enode URL for the local node bound at `addr`.
fn enode_url(identity: &NodeIdentity, addr: SocketAddr) -> String {
    format!(
        "enode://{}@{addr}",
        hex::encode(identity.public_key_bytes())
    )
}

/// Dial every bootstrap descriptor. Individual failures are logged and
/// skipped; bootstrap connectivity is best-effort.
fn dial_bootnodes(swarm: &mut Swarm<EngineBehaviour>, bootnodes: &[BootstrapDescriptor]) {
    for node in bootnodes {
        let addr = match bootnode_multiaddr(node) {
            Ok(addr) => addr,
            Err(err) => {
                warn!(bootnode = %node, %err, "skipping undialable bootstrap node");
                continue;
            }
        };
        match swarm.dial(addr.clone()) {
            Ok(()) => debug!(%addr, "dialing bootstrap node"),
            Err(err) => warn!(%addr, %err, "failed to dial bootstrap node"),
        }
    }
}

/// Convert a descriptor to a dialable multiaddr, pinning the peer ID
/// derived from the descriptor's public key.
fn bootnode_multiaddr(node: &BootstrapDescriptor) -> Result<Multiaddr> {
    let peer_id = descriptor_peer_id(node)?;
    Ok(socketaddr_to_multiaddr(SocketAddr::new(node.addr(), node.tcp_port())).with(Protocol::P2p(peer_id)))
}

/// Derive the transport peer ID from a descriptor's 64-byte public key.
fn descriptor_peer_id(node: &BootstrapDescriptor) -> Result<PeerId> {
    // Reattach the SEC1 tag, then recompress for the transport key format.
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(node.pubkey().as_slice());

    let key = VerifyingKey::from_sec1_bytes(&sec1)
        .map_err(|err| eyre!("public key is not a valid curve point: {err}"))?;
    let compressed = key.to_encoded_point(true);
    let public = identity::secp256k1::PublicKey::try_from_bytes(compressed.as_bytes())
        .map_err(|err| eyre!("transport rejected public key: {err}"))?;
    Ok(identity::PublicKey::from(public).to_peer_id())
}

fn socketaddr_to_multiaddr(addr: SocketAddr) -> Multiaddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty().with(ip).with(Protocol::Tcp(addr.port()))
}

fn multiaddr_ip(addr: &Multiaddr) -> Option<IpAddr> {
    addr.iter().find_map(|proto| match proto {
        Protocol::Ip4(ip) => Some(IpAddr::V4(ip)),
        Protocol::Ip6(ip) => Some(IpAddr::V6(ip)),
        _ => None,
    })
}

fn multiaddr_to_socketaddr(addr: &Multiaddr) -> Option<SocketAddr> {
    let ip = multiaddr_ip(addr)?;
    let port = addr.iter().find_map(|proto| match proto {
        Protocol::Tcp(port) => Some(port),
        _ => None,
    })?;
    Some(SocketAddr::new(ip, port))
}

/// Process swarm events until the shutdown signal arrives.
///
/// Dropping the swarm on exit closes the listener and every peer link.
async fn event_loop(
    mut swarm: Swarm<EngineBehaviour>,
    peers: PeerCount,
    restrict: NetRestrict,
    max_peers: usize,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("engine event loop stopping");
                break;
            }
            event = swarm.select_next_some() => {
                handle_swarm_event(&mut swarm, &peers, &restrict, max_peers, event);
            }
        }
    }
}

fn handle_swarm_event(
    swarm: &mut Swarm<EngineBehaviour>,
    peers: &PeerCount,
    restrict: &NetRestrict,
    max_peers: usize,
    event: SwarmEvent<EngineBehaviourEvent>,
) {
    match event {
        SwarmEvent::ConnectionEstablished {
            peer_id,
            endpoint,
            num_established,
            ..
        } => {
            let remote = endpoint.get_remote_address().clone();
            if num_established.get() == 1 {
                peers.increment();
            }

            if let Some(ip) = multiaddr_ip(&remote) {
                if !restrict.permits(ip) {
                    warn!(%peer_id, %ip, "peer outside restricted ranges, disconnecting");
                    let _ = swarm.disconnect_peer_id(peer_id);
                    return;
                }
            }
            if peers.get() > max_peers {
                debug!(%peer_id, "peer limit reached, disconnecting");
                let _ = swarm.disconnect_peer_id(peer_id);
                return;
            }

            info!(%peer_id, remote = %remote, "peer connected");
        }
        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established,
            cause,
            ..
        } => {
            if num_established == 0 {
                peers.decrement();
            }
            info!(%peer_id, cause = ?cause, "peer disconnected");
        }
        SwarmEvent::IncomingConnection {
            local_addr,
            send_back_addr,
            ..
        } => {
            debug!(%local_addr, %send_back_addr, "incoming connection");
        }
        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            if let Some(peer_id) = peer_id {
                warn!(%peer_id, %error, "outgoing connection error");
            } else {
                warn!(%error, "outgoing connection error (unknown peer)");
            }
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            debug!(%address, "new listen address");
        }
        SwarmEvent::Behaviour(event) => handle_behaviour_event(event),
        _ => {}
    }
}

fn handle_behaviour_event(event: EngineBehaviourEvent) {
    match event {
        EngineBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
            debug!(
                %peer_id,
                protocol_version = %info.protocol_version,
                agent_version = %info.agent_version,
                "received identify info"
            );
        }
        EngineBehaviourEvent::Identify(identify::Event::Sent { peer_id, .. }) => {
            debug!(%peer_id, "sent identify info");
        }
        EngineBehaviourEvent::Identify(identify::Event::Pushed { peer_id, .. }) => {
            debug!(%peer_id, "pushed identify info");
        }
        EngineBehaviourEvent::Identify(identify::Event::Error { peer_id, error, .. }) => {
            warn!(%peer_id, %error, "identify error");
        }
        EngineBehaviourEvent::Ping(ping::Event { peer, result, .. }) => match result {
            Ok(rtt) => debug!(%peer, ?rtt, "ping"),
            Err(err) => warn!(%peer, %err, "ping failed"),
        },
        EngineBehaviourEvent::Upnp(event) => match event {
            upnp::Event::NewExternalAddr(addr) => info!(%addr, "UPnP mapped external address"),
            upnp::Event::ExpiredExternalAddr(addr) => debug!(%addr, "UPnP mapping expired"),
            upnp::Event::GatewayNotFound => debug!("no UPnP gateway found"),
            upnp::Event::NonRoutableGateway => debug!("UPnP gateway is not routable"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(
        identity: NodeIdentity,
        bootnodes: Vec<BootstrapDescriptor>,
    ) -> SessionConfig {
        let mut config = SessionConfig::assemble(identity, "127.0.0.1:0", bootnodes, None);
        // UPnP chatter has no place in loopback tests.
        config.nat = false;
        config
    }

    async fn wait_for_peers(peers: &PeerCount, expected: usize) -> bool {
        for _ in 0..100 {
            if peers.get() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_reports_parseable_local_url() {
        let identity = NodeIdentity::generate();
        let pubkey = identity.public_key_bytes();

        let handle = Libp2pEngine
            .start(loopback_config(identity, vec![]))
            .await
            .unwrap();

        let descriptor: BootstrapDescriptor = handle.local_url().parse().unwrap();
        assert_eq!(descriptor.pubkey().as_slice(), pubkey.as_slice());
        assert_eq!(descriptor.addr(), "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_ne!(descriptor.tcp_port(), 0);
        assert_eq!(handle.peers().get(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn malformed_restriction_filter_fails_start() {
        let mut config = loopback_config(NodeIdentity::generate(), vec![]);
        config.netrestrict = Some("not-a-cidr".to_string());

        assert!(Libp2pEngine.start(config).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engines_connect_through_bootstrap_descriptor() {
        let first = Libp2pEngine
            .start(loopback_config(NodeIdentity::generate(), vec![]))
            .await
            .unwrap();
        let descriptor: BootstrapDescriptor = first.local_url().parse().unwrap();

        let second = Libp2pEngine
            .start(loopback_config(NodeIdentity::generate(), vec![descriptor]))
            .await
            .unwrap();

        assert!(wait_for_peers(first.peers(), 1).await, "first engine never saw the peer");
        assert!(wait_for_peers(second.peers(), 1).await, "second engine never saw the peer");

        second.stop().await;
        assert!(wait_for_peers(first.peers(), 0).await, "first engine never saw the disconnect");
        first.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restriction_filter_rejects_out_of_range_peers() {
        let mut restricted = loopback_config(NodeIdentity::generate(), vec![]);
        restricted.netrestrict = Some("10.0.0.0/8".to_string());
        let first = Libp2pEngine.start(restricted).await.unwrap();
        let descriptor: BootstrapDescriptor = first.local_url().parse().unwrap();

        let second = Libp2pEngine
            .start(loopback_config(NodeIdentity::generate(), vec![descriptor]))
            .await
            .unwrap();

        // Loopback is outside 10.0.0.0/8, so any established link must be
        // torn down again.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(first.peers().get(), 0);
        assert_eq!(second.peers().get(), 0);

        second.stop().await;
        first.stop().await;
    }
}
