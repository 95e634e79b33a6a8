//! Host-side communication stack for the NXT brick.
//!
//! Two wire protocols live here: the length-delimited packet framing spoken
//! by the firmware over the raw chunked transport ([`framing`]), and the
//! ASCII in-system-programming protocol of the AT91SAM7 boot ROM
//! ([`samba`]), with page-oriented flash programming on top ([`flash`],
//! [`api`]). Everything is strictly synchronous: one request at a time per
//! exclusively-owned transport handle.

pub mod api;
pub mod command;
pub mod firmware;
pub mod flash;
pub mod framing;
pub mod nxt;
pub mod operation;
pub mod samba;
pub mod targets;
pub mod transport;
