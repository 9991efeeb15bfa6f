//! Domain entities for screenspan.
//!
//! Pure business logic: the screen-topology graph and clipboard ownership
//! rules. No sockets, no timers, no OS APIs — everything here is directly
//! unit-testable.

pub mod clipboard;
pub mod topology;
