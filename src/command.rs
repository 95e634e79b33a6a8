//! One-shot system command exchanges over a [`FramedLink`].
//!
//! These are the small request/reply commands the firmware answers in both
//! link disciplines; upper-layer glue uses them for discovery and naming.

use thiserror::Error;
use tracing::debug;

use crate::framing::{FramedLink, LinkError};
use crate::transport::RawTransport;

/// System command expecting a reply.
pub const SYSTEM_COMMAND_REPLY: u8 = 0x01;
/// First byte of every reply.
pub const REPLY_COMMAND: u8 = 0x02;
/// Device-info query opcode.
pub const GET_DEVICE_INFO: u8 = 0x9B;

/// Device-info reply: `[0x02, opcode, status, name[16], bt_addr[7],
/// signal[4], free_flash[4]]`.
const DEVICE_INFO_REPLY_LEN: usize = 33;
const NAME_OFFSET: usize = 3;
const NAME_LEN: usize = 15;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("peer closed the channel mid-exchange")]
    Eof,

    #[error("short reply: {got} bytes, expected {expected}")]
    ShortReply { got: usize, expected: usize },

    #[error("command 0x{command:02X} failed with status 0x{status:02X}")]
    Status { command: u8, status: u8 },
}

/// Sends one request and reads one reply of at least `min_reply` bytes.
///
/// In packet mode the reply is one whole message; unframed replies are
/// reassembled from as many bursts as it takes to reach `min_reply`.
pub fn exchange<T: RawTransport>(
    link: &mut FramedLink<T>,
    request: &[u8],
    min_reply: usize,
) -> Result<Vec<u8>, CommandError> {
    link.write(request)?;

    let mut reply = link.read()?.ok_or(CommandError::Eof)?;
    if !link.is_packet_mode() {
        while reply.len() < min_reply {
            let more = link.read()?.ok_or(CommandError::Eof)?;
            reply.extend(more);
        }
    }
    if reply.len() < min_reply {
        return Err(CommandError::ShortReply {
            got: reply.len(),
            expected: min_reply,
        });
    }
    debug!(len = reply.len(), "exchange complete");
    Ok(reply)
}

/// Queries the device's display name.
pub fn device_name<T: RawTransport>(link: &mut FramedLink<T>) -> Result<String, CommandError> {
    let reply = exchange(
        link,
        &[SYSTEM_COMMAND_REPLY, GET_DEVICE_INFO],
        DEVICE_INFO_REPLY_LEN,
    )?;

    let status = reply[2];
    if status != 0 {
        return Err(CommandError::Status {
            command: GET_DEVICE_INFO,
            status,
        });
    }

    let raw = &reply[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::LinkMode;
    use crate::transport::testing::ScriptedTransport;

    fn info_reply(name: &str, status: u8) -> Vec<u8> {
        let mut reply = vec![REPLY_COMMAND, GET_DEVICE_INFO, status];
        let mut field = [0u8; 15];
        field[..name.len()].copy_from_slice(name.as_bytes());
        reply.extend_from_slice(&field);
        reply.extend_from_slice(&[0u8; 7]); // bt address
        reply.extend_from_slice(&[0u8; 4]); // signal strength
        reply.extend_from_slice(&[0u8; 4]); // free flash
        assert_eq!(reply.len(), 33);
        reply
    }

    #[test]
    fn device_name_reassembles_split_reply() {
        let mut io = ScriptedTransport::new(8);
        for part in info_reply("BRICK-01", 0).chunks(8) {
            io.push_reply(part);
        }
        let mut link = FramedLink::open(io, LinkMode::Command);
        assert_eq!(device_name(&mut link).unwrap(), "BRICK-01");
    }

    #[test]
    fn device_name_rejects_bad_status() {
        let mut io = ScriptedTransport::new(64);
        io.push_reply(&info_reply("BRICK-01", 0xEC));
        let mut link = FramedLink::open(io, LinkMode::Command);
        let err = device_name(&mut link).unwrap_err();
        assert!(matches!(err, CommandError::Status { status: 0xEC, .. }));
    }

    #[test]
    fn truncated_reply_times_out_as_transport_error() {
        let mut io = ScriptedTransport::new(64);
        io.push_reply(&[REPLY_COMMAND, GET_DEVICE_INFO]); // 2 of 33 bytes
        let mut link = FramedLink::open(io, LinkMode::Command).with_retries(1);
        let err = device_name(&mut link).unwrap_err();
        assert!(matches!(err, CommandError::Link(_)));
    }
}
