// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Meshbus - brokerless LAN transport middleware
//!
//! Anonymous topic-based publish/subscribe and request/response service
//! calls between processes on a LAN. Endpoints are symmetric: any
//! participant may publish, subscribe, offer services, or invoke them.
//! There is no broker; participants find one another through a UDP
//! multicast discovery protocol and then exchange messages directly
//! over stream sockets.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use meshbus::{Message, Node, Result, Scope};
//!
//! #[derive(Debug)]
//! struct Counter { value: u64 }
//!
//! impl Message for Counter {
//!     fn type_name() -> &'static str { "demo.Counter" }
//!     fn encode(&self) -> Result<Vec<u8>> { Ok(self.value.to_le_bytes().to_vec()) }
//!     fn decode(data: &[u8]) -> Result<Self> {
//!         let bytes: [u8; 8] = data.try_into()
//!             .map_err(|_| meshbus::Error::Serialization("bad width".into()))?;
//!         Ok(Self { value: u64::from_le_bytes(bytes) })
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let node = Node::new()?;
//!     node.advertise("/counter", Scope::All)?;
//!     node.subscribe("/counter", |topic: &str, msg: Counter| {
//!         println!("{}: {}", topic, msg.value);
//!     })?;
//!     node.publish("/counter", &Counter { value: 1 })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       Node (facade)                          |
//! |  advertise / publish / subscribe / services / request        |
//! +--------------------------------------------------------------+
//! |                 NodeShared (per-partition runtime)           |
//! |  six stream sockets | reception thread | handler registries  |
//! +--------------------------------------------------------------+
//! |                Discovery (UDP multicast)                     |
//! |  announce / probe | heartbeats | liveness | callbacks        |
//! +--------------------------------------------------------------+
//! ```
//!
//! Two long-lived threads per process: the discovery reception thread
//! and the node-shared reception thread. Delivery is best-effort and
//! lossy under overload; ordering holds per (publisher, topic,
//! subscriber) only.

/// Wire and timing constants plus environment variable handling.
pub mod config;
/// Topic discovery over UDP multicast.
pub mod discovery;
/// Crate error type.
pub mod error;
/// The payload codec seam.
pub mod message;
/// The node facade and the shared runtime behind it.
pub mod node;
/// Discovery packet codec and wire constants.
pub mod protocol;
/// Topic name grammar and partition/namespace handling.
pub mod topic;

pub use error::{Error, Result};
pub use message::Message;
pub use node::{Node, NodeShared};
pub use protocol::Scope;

/// Meshbus version string.
pub const VERSION: &str = "0.2.0";
