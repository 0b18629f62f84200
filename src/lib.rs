//! Real-time text chat over two independent transports that share one
//! contract: broadcast a sender-tagged message to every other participant.
//!
//! - [`relay`] is the TCP path: a relay server that accepts connections,
//!   tracks them in a [`registry::ClientRegistry`], and fans each inbound
//!   chunk out to every other peer.
//! - [`mailbox`] is the same-host path: a single shared-memory slot with a
//!   version counter that readers poll on an interval.
//! - [`message`] defines the message value, its field bounds, and the raw
//!   `[sender]: body` wire convention.
//! - [`client`] connects to a relay and exposes the send/receive surface the
//!   terminal front end (and the tests) drive.
//! - [`cli`] parses the command-line interface for the three modes.
//!
//! The two transports do not interoperate; they are alternative cores behind
//! the same presentation-facing surface. Integration tests use this crate
//! directly to exercise the registry, the fan-out, and the mailbox protocol.

pub mod cli;
pub mod client;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod relay;
