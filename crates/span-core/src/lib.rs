//! # span-core
//!
//! Shared library for screenspan containing the wire-protocol codec,
//! message definitions, version negotiation, and the screen-topology and
//! clipboard domain logic.
//!
//! This crate has zero dependencies on sockets, timers, or OS APIs; it is
//! the pure, unit-testable foundation the server builds on.
//!
//! # Architecture overview (for beginners)
//!
//! screenspan lets one keyboard and mouse drive several computers. The
//! machine with the physical input devices runs the *server*; every other
//! machine runs a client that connects over TCP. When the cursor hits the
//! edge of one screen, control jumps to the screen configured on the other
//! side of that edge, and subsequent input is delivered there.
//!
//! This crate defines:
//!
//! - **`protocol`** – How bytes travel over the network. Every message is
//!   a four-byte ASCII tag plus a payload described by a small format
//!   string (`"CINN%2i%2i%4i%2i"`), encoded big-endian.
//!
//! - **`domain`** – Pure business rules: the directed screen-topology
//!   graph with offline-skipping neighbor resolution, fractional
//!   coordinate remapping between screens of different sizes, and the
//!   sequence-numbered clipboard ownership rules.

pub mod domain;
pub mod protocol;

pub use domain::clipboard::{ClipboardId, ClipboardSlot, ClipboardUpdate, CLIPBOARD_COUNT};
pub use domain::topology::{Direction, ScreenShape, TopologyError, TopologyMap};
pub use protocol::codec::{readf, writef, CodecError, Item, Value};
pub use protocol::parse::{parse_client_message, ClientMessage, ParseError};
pub use protocol::version::ProtocolVersion;
