//! STOMP Broker
//!
//! In-process STOMP 1.0-1.2 simple broker over WebSocket. Clients connect
//! to the WebSocket endpoint, subscribe to `/topic/...` destinations, and
//! receive every message published to them.
//!
//! # Modules
//!
//! - [`frame`]: wire codec
//! - [`heartbeat`]: `heart-beat` negotiation and liveness
//! - [`session`]: per-connection protocol state machine
//! - [`server`]: axum endpoint and connection tasks

pub mod frame;
pub mod heartbeat;
pub mod session;
pub mod server;

pub use frame::{Command, Frame, FrameDecoder, FrameError};
pub use heartbeat::{HeartBeat, Negotiated};
pub use session::{SessionConfig, SessionError, StompSession, StompVersion};
pub use server::{StompServer, StompServerConfig, StompServerError, StompServerState};
