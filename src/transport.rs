//! The raw transport boundary.
//!
//! A [`RawTransport`] moves opaque chunks of bytes to and from the brick.
//! Calls block up to the native timeout and report `Ok(0)` when it expires;
//! fatal native results surface as typed errors immediately, so nothing
//! above this module ever branches on sentinel return values.

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;

/// How often a timed-out native call is repeated before the operation is
/// abandoned with [`TransportError::Timeout`].
pub const DEFAULT_IO_RETRIES: u32 = 3;

/// Native timeout applied to each serial read/write call.
pub const DEFAULT_NATIVE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unable to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("{op} timed out after {attempts} attempts")]
    Timeout { op: &'static str, attempts: u32 },

    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Blocking chunked byte channel to the device.
///
/// Both calls move at most one native chunk and block up to a bounded
/// native timeout; `Ok(0)` means the timeout expired with no bytes moved.
/// Opening is the implementor's constructor; dropping the value releases
/// the handle. A handle is owned by exactly one link or session for its
/// whole lifetime and is never reopened in place.
pub trait RawTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    fn write_chunk(&mut self, buf: &[u8]) -> Result<usize, TransportError>;
}

/// Writes the whole buffer, looping partial writes and spending `retries`
/// timed-out calls before giving up.
pub(crate) fn write_all<T: RawTransport + ?Sized>(
    io: &mut T,
    buf: &[u8],
    retries: u32,
) -> Result<(), TransportError> {
    let mut written = 0;
    let mut attempts = 0;
    while written < buf.len() {
        let n = io.write_chunk(&buf[written..])?;
        if n == 0 {
            attempts += 1;
            if attempts > retries {
                return Err(TransportError::Timeout {
                    op: "write",
                    attempts,
                });
            }
            continue;
        }
        attempts = 0;
        written += n;
    }
    Ok(())
}

/// Reads at least one byte into `buf`, spending `retries` timed-out calls
/// before giving up.
pub(crate) fn read_some<T: RawTransport + ?Sized>(
    io: &mut T,
    buf: &mut [u8],
    retries: u32,
) -> Result<usize, TransportError> {
    let mut attempts = 0;
    loop {
        let n = io.read_chunk(buf)?;
        if n > 0 {
            return Ok(n);
        }
        attempts += 1;
        if attempts > retries {
            return Err(TransportError::Timeout {
                op: "read",
                attempts,
            });
        }
    }
}

/// Serial-port transport.
///
/// Covers both ways a brick shows up as a serial device: the SAM-BA boot
/// ROM enumerates as a CDC-ACM port, and Bluetooth links surface as RFCOMM
/// ports. The native USB bulk binding used in firmware mode lives outside
/// this crate; anything implementing [`RawTransport`] plugs in above.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport {
    pub fn open(port_name: &str, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, 115_200)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| TransportError::Open {
                port: port_name.to_string(),
                source: e,
            })?;

        tracing::debug!(port = port_name, "serial transport open");
        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.name
    }
}

impl RawTransport for SerialTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(TransportError::Io {
                op: "read",
                source: e,
            }),
        }
    }

    fn write_chunk(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        match self.port.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(TransportError::Io {
                op: "write",
                source: e,
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{LoopbackTransport, ScriptedTransport, StutterTransport};
    use super::*;

    #[test]
    fn write_all_loops_partial_chunks() {
        let mut io = LoopbackTransport::new(4);
        write_all(&mut io, b"0123456789", 3).unwrap();

        let mut buf = [0u8; 16];
        let mut out = Vec::new();
        loop {
            let n = io.read_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"0123456789");
    }

    #[test]
    fn write_all_survives_timeouts_within_budget() {
        let io = LoopbackTransport::new(64);
        let mut io = StutterTransport::new(io, 2);
        write_all(&mut io, b"abc", 3).unwrap();
    }

    #[test]
    fn read_some_escalates_to_timeout() {
        let mut io = ScriptedTransport::new(64);
        let mut buf = [0u8; 8];
        let err = read_some(&mut io, &mut buf, 3).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Timeout { op: "read", attempts: 4 }
        ));
    }

    #[test]
    fn read_some_returns_partial_burst() {
        let mut io = ScriptedTransport::new(64);
        io.push_reply(&[1, 2]);
        let mut buf = [0u8; 8];
        let n = read_some(&mut io, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], &[1, 2]);
    }
}
