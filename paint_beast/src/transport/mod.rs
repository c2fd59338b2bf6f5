//! In-process RPC between actors and the learner side.
//!
//! - `LearnerServer`: owns the queues' producer side and serves connections
//! - `Connector` / `Connection`: what an actor holds
//! - `Backoff`: reconnect pacing after `ConnectionLost`

pub mod backoff;
pub mod client;
pub mod protocol;
pub mod server;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::{Connection, FrameSender, TransportConfig};
pub use protocol::{Ack, TransportError, WeightsReply};
pub use server::{Connector, LearnerServer};
