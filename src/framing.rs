//! Message framing over a raw chunked transport.
//!
//! The brick's raw channel moves arbitrary chunk-sized bursts with no
//! message boundaries. [`FramedLink`] restores boundaries when the peer
//! supports it: a negotiated "packet mode" prefixes every message with a
//! 2-byte little-endian length, and a zero length marks end-of-stream. When
//! the peer does not answer the probe the link silently stays unframed and
//! callers see raw bursts, exactly as the device firmware sends them.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, warn};

use crate::nxt;
use crate::transport::{self, RawTransport, TransportError, DEFAULT_IO_RETRIES};

/// Probe request asking the firmware to switch the channel into packet
/// mode.
const PACKET_MODE_PROBE: [u8; 2] = [0x01, 0xFE];
/// Out-of-band acknowledgment the firmware answers with when it does.
const PACKET_MODE_ACK: [u8; 3] = [0x02, 0xFE, 0xEF];

/// Size of one internal refill, a handful of native chunks.
const FILL_SIZE: usize = nxt::RAW_CHUNK * 8;

/// I/O discipline requested when opening a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Raw chunk access, no negotiation. Used by boot-ROM sessions.
    Raw,
    /// Unframed one-shot request/reply system commands.
    Command,
    /// Ask for packet framing, falling back to unframed if refused.
    Stream,
}

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Closed,
    Raw,
    Command,
    /// Stream mode with negotiated packet framing.
    Packet,
    /// Stream mode after falling back to the unframed discipline.
    Unframed,
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("link is not open")]
    NotOpen,

    #[error("message too long for packet framing: {len} bytes")]
    MessageTooLong { len: usize },
}

/// A message link over one exclusively-owned raw transport.
///
/// The transport is consumed on open and dropped on close; a closed link
/// reports [`LinkError::NotOpen`] forever after, it never reopens.
pub struct FramedLink<T: RawTransport> {
    io: Option<T>,
    mode: LinkMode,
    packet_mode: bool,
    eof: bool,
    rx: VecDeque<u8>,
    retries: u32,
}

impl<T: RawTransport> FramedLink<T> {
    /// Opens a link in the requested mode. `Stream` sends the packet-mode
    /// probe; the other modes start talking immediately.
    pub fn open(io: T, mode: LinkMode) -> Self {
        let mut link = Self {
            io: Some(io),
            mode,
            packet_mode: false,
            eof: false,
            rx: VecDeque::new(),
            retries: DEFAULT_IO_RETRIES,
        };
        if mode == LinkMode::Stream {
            link.negotiate();
        }
        link
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn state(&self) -> LinkState {
        if self.io.is_none() {
            return LinkState::Closed;
        }
        match self.mode {
            LinkMode::Raw => LinkState::Raw,
            LinkMode::Command => LinkState::Command,
            LinkMode::Stream if self.packet_mode => LinkState::Packet,
            LinkMode::Stream => LinkState::Unframed,
        }
    }

    pub fn is_packet_mode(&self) -> bool {
        self.packet_mode
    }

    /// Probe the peer for packet-mode support. Any failure, including a
    /// probe that is never answered, leaves the link unframed.
    fn negotiate(&mut self) {
        let result = (|| -> Result<Vec<u8>, LinkError> {
            self.write_unframed(&PACKET_MODE_PROBE)?;
            let mut buf = [0u8; FILL_SIZE];
            let io = self.io.as_mut().ok_or(LinkError::NotOpen)?;
            let n = transport::read_some(io, &mut buf, self.retries)?;
            Ok(buf[..n].to_vec())
        })();

        match result {
            Ok(reply) if reply.len() >= 3 && reply[..3] == PACKET_MODE_ACK => {
                debug!("packet mode negotiated");
                self.packet_mode = true;
            }
            Ok(_) => {
                debug!("packet mode refused, staying unframed");
            }
            Err(e) => {
                debug!(error = %e, "packet mode probe unanswered, staying unframed");
            }
        }
    }

    fn write_unframed(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        let retries = self.retries;
        let io = self.io.as_mut().ok_or(LinkError::NotOpen)?;
        transport::write_all(io, buf, retries)?;
        Ok(())
    }

    /// Writes one whole message. In packet mode the message is prefixed
    /// with its 2-byte little-endian length; an empty message is the
    /// end-of-stream marker.
    pub fn write(&mut self, msg: &[u8]) -> Result<(), LinkError> {
        if self.io.is_none() {
            return Err(LinkError::NotOpen);
        }
        if !self.packet_mode {
            return self.write_unframed(msg);
        }
        if msg.len() > u16::MAX as usize {
            return Err(LinkError::MessageTooLong { len: msg.len() });
        }
        let mut buf = Vec::with_capacity(2 + msg.len());
        buf.extend_from_slice(&(msg.len() as u16).to_le_bytes());
        buf.extend_from_slice(msg);
        self.write_unframed(&buf)
    }

    /// Reads the next message.
    ///
    /// Packet mode returns whole messages of exactly the advertised length,
    /// regardless of how the transport chunks them, and `Ok(None)` forever
    /// once the zero-length end-of-stream packet arrives. Unframed mode
    /// returns the buffered bytes FIFO, refilling only when the buffer is
    /// empty.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if self.io.is_none() {
            return Err(LinkError::NotOpen);
        }
        if self.eof {
            return Ok(None);
        }

        if self.packet_mode {
            let mut hdr = [0u8; 2];
            self.read_exact(&mut hdr)?;
            let len = u16::from_le_bytes(hdr) as usize;
            if len == 0 {
                debug!("end-of-stream packet received");
                self.eof = true;
                return Ok(None);
            }
            let mut msg = vec![0u8; len];
            self.read_exact(&mut msg)?;
            return Ok(Some(msg));
        }

        if self.rx.is_empty() {
            self.fill()?;
        }
        Ok(Some(self.rx.drain(..).collect()))
    }

    fn fill(&mut self) -> Result<(), LinkError> {
        let retries = self.retries;
        let io = self.io.as_mut().ok_or(LinkError::NotOpen)?;
        let mut buf = [0u8; FILL_SIZE];
        let n = transport::read_some(io, &mut buf, retries)?;
        self.rx.extend(&buf[..n]);
        Ok(())
    }

    fn next_byte(&mut self) -> Result<u8, LinkError> {
        loop {
            if let Some(b) = self.rx.pop_front() {
                return Ok(b);
            }
            self.fill()?;
        }
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Result<(), LinkError> {
        for slot in out.iter_mut() {
            *slot = self.next_byte()?;
        }
        Ok(())
    }

    /// Closes the link.
    ///
    /// In packet mode this first sends the zero-length end-of-stream packet
    /// and then reads and discards until the peer's own end-of-stream is
    /// seen, so in-flight messages drain and the peer observes a clean
    /// shutdown. Handshake failures are logged; the transport is released
    /// either way.
    pub fn close(&mut self) {
        if self.io.is_none() {
            return;
        }
        if self.packet_mode {
            if let Err(e) = self.drain_eof() {
                warn!(error = %e, "close handshake failed");
            }
        }
        self.io = None;
        debug!("link closed");
    }

    fn drain_eof(&mut self) -> Result<(), LinkError> {
        self.write_unframed(&[0, 0])?;
        while !self.eof {
            self.read()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{LoopbackTransport, ScriptedTransport};

    /// A loopback pre-seeded with the negotiation ack, so the link comes up
    /// in packet mode and then talks to itself.
    fn packet_loopback(chunk: usize) -> FramedLink<LoopbackTransport> {
        let mut io = LoopbackTransport::new(chunk);
        io.seed(&PACKET_MODE_ACK);
        let link = FramedLink::open(io, LinkMode::Stream);
        assert!(link.is_packet_mode());
        link
    }

    #[test]
    fn round_trip_restores_message_boundaries() {
        for chunk in [8, 64] {
            let mut link = packet_loopback(chunk);
            let sizes = [1usize, 2, 63, 64, 65, 300, 65535];
            for len in sizes {
                let msg: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                link.write(&msg).unwrap();
                assert_eq!(link.read().unwrap().as_deref(), Some(&msg[..]));
            }
        }
    }

    #[test]
    fn eof_only_after_explicit_zero_length_packet() {
        let mut link = packet_loopback(64);
        link.write(b"last words").unwrap();
        link.write(&[]).unwrap();

        assert_eq!(link.read().unwrap().as_deref(), Some(&b"last words"[..]));
        assert_eq!(link.read().unwrap(), None);
        // Permanent from here on.
        assert_eq!(link.read().unwrap(), None);
    }

    #[test]
    fn silent_probe_falls_back_to_unframed() {
        let io = ScriptedTransport::new(64);
        let link = FramedLink::open(io, LinkMode::Stream);
        assert!(!link.is_packet_mode());
        assert_eq!(link.state(), LinkState::Unframed);
    }

    #[test]
    fn negotiation_is_deterministic() {
        for _ in 0..2 {
            let mut io = ScriptedTransport::new(64);
            io.push_reply(&PACKET_MODE_ACK);
            let link = FramedLink::open(io, LinkMode::Stream);
            assert_eq!(link.state(), LinkState::Packet);
        }
        for _ in 0..2 {
            let io = ScriptedTransport::new(64);
            let link = FramedLink::open(io, LinkMode::Stream);
            assert_eq!(link.state(), LinkState::Unframed);
        }
    }

    #[test]
    fn command_mode_never_probes() {
        let io = ScriptedTransport::new(64);
        let mut link = FramedLink::open(io, LinkMode::Command);
        assert_eq!(link.state(), LinkState::Command);
        link.write(b"\x01\x9B").unwrap();
        // The probe would have been the first write; only the request went
        // out.
        let io = link.io.as_ref().unwrap();
        assert_eq!(io.written, b"\x01\x9B");
    }

    #[test]
    fn unframed_read_serves_buffered_bytes_fifo() {
        let mut io = LoopbackTransport::new(4);
        io.seed(b"abcdef");
        let mut link = FramedLink::open(io, LinkMode::Raw);
        // Bursts come back in transport-chunk sizes, FIFO order.
        assert_eq!(link.read().unwrap().as_deref(), Some(&b"abcd"[..]));
        assert_eq!(link.read().unwrap().as_deref(), Some(&b"ef"[..]));
    }

    #[test]
    fn oversized_message_is_rejected_before_io() {
        let mut link = packet_loopback(64);
        let msg = vec![0u8; 65536];
        let err = link.write(&msg).unwrap_err();
        assert!(matches!(err, LinkError::MessageTooLong { len: 65536 }));
    }

    #[test]
    fn close_sends_eof_and_drains_peer() {
        let mut link = packet_loopback(64);
        // The loopback feeds our own EOF packet back as the peer's.
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert!(matches!(link.read(), Err(LinkError::NotOpen)));
        assert!(matches!(link.write(b"x"), Err(LinkError::NotOpen)));
    }

    #[test]
    fn read_timeout_escalates() {
        let io = ScriptedTransport::new(64);
        let mut io_link = FramedLink::open(io, LinkMode::Raw).with_retries(2);
        let err = io_link.read().unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(TransportError::Timeout { .. })
        ));
    }
}
