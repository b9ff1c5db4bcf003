//! Node bootstrap core.
//!
//! This crate holds the only original logic of the node process:
//! - [`config`] - one-shot session configuration assembly
//! - [`engine`] - the capability seam to the peer-networking engine
//! - [`session`] - the peer session lifecycle controller
//! - [`supervisor`] - top-level start/report/stop control flow
//!
//! Everything protocol-level lives behind [`engine::PeerEngine`]; see
//! `strand-engine` for the production implementation.

pub mod config;
pub mod engine;
pub mod session;
pub mod supervisor;

pub use config::SessionConfig;
pub use engine::{EngineHandle, PeerCount, PeerEngine};
pub use session::PeerSession;
pub use supervisor::{run_until, shutdown_signal, REPORT_INTERVAL};
