//! SAM-BA boot ROM session.
//!
//! The AT91SAM7 boot ROM speaks a line-oriented ASCII protocol over the raw
//! transport: one command character, an 8-digit uppercase hex address and an
//! optional argument, terminated by `#\n`. Numeric reads answer in raw
//! little-endian binary; text commands answer in ASCII ending with a
//! line-feed or, in verbose mode, a `>` prompt. On top of the grammar this
//! module carries the flash-programming flow: uploading the flash-writer
//! routine into free RAM, streaming page-write units to it, and driving the
//! flash controller's lock regions.

use thiserror::Error;
use tracing::{debug, trace};

use crate::nxt;
use crate::transport::{self, RawTransport, TransportError, DEFAULT_IO_RETRIES};

const CMD_GOTO: char = 'G';
/// Text mode: the ROM echoes and answers every line with a `>` prompt.
const CMD_VERBOSE: char = 'T';
/// Quiet mode: bare replies, no prompt.
const CMD_QUIET: char = 'N';
const CMD_VERSION: char = 'V';
const CMD_READ_OCTET: char = 'o';
const CMD_READ_HWORD: char = 'h';
const CMD_READ_WORD: char = 'w';
const CMD_WRITE_OCTET: char = 'O';
const CMD_WRITE_HWORD: char = 'H';
const CMD_WRITE_WORD: char = 'W';
const CMD_STREAM_READ: char = 'R';
const CMD_STREAM_WRITE: char = 'S';

const PROMPT: u8 = b'>';
const TERMINATOR: &str = "#\n";

/// Ready-bit polls spent before a lock command is abandoned.
const FLASH_READY_POLLS: u32 = 100;

#[derive(Error, Debug)]
pub enum SambaError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("bad reply length: got {got} bytes, expected {expected}")]
    BadReplyLength { got: usize, expected: usize },

    #[error("session is already attached")]
    AlreadyAttached,

    #[error("session is not attached")]
    NotAttached,

    #[error("page {page} out of flash range")]
    PageOutOfRange { page: u32 },

    #[error("lock region {region} out of range")]
    RegionOutOfRange { region: u32 },

    #[error("helper image of {len} bytes does not fit the free RAM window (max {max})")]
    HelperTooLarge { len: usize, max: usize },

    #[error("flash controller stayed busy")]
    FlashBusy,
}

/// Formats exactly `width` uppercase hex digits. Values wider than the
/// field keep only their low `width * 4` bits.
pub fn hex_format(value: u32, width: usize) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(width);
    for i in 0..width {
        let shift = 4 * (width - i - 1);
        let nibble = if shift >= 32 { 0 } else { (value >> shift) & 0xF };
        out.push(DIGITS[nibble as usize] as char);
    }
    out
}

/// The flash-writer routine uploaded into the boot-ROM-free RAM window.
///
/// The routine's code sits directly above its stack; the page-write unit it
/// consumes sits directly after the code. Construction fails if that layout
/// does not fit below the end of RAM.
#[derive(Debug)]
pub struct FlashHelper {
    code: Vec<u8>,
}

impl FlashHelper {
    pub fn new(code: Vec<u8>) -> Result<Self, SambaError> {
        let max = Self::max_code_len();
        if code.is_empty() || code.len() > max {
            return Err(SambaError::HelperTooLarge {
                len: code.len(),
                max,
            });
        }
        Ok(Self { code })
    }

    pub fn max_code_len() -> usize {
        (nxt::SAMBA_RAM_END - nxt::HELPER_CODE_ADDR) as usize - nxt::HELPER_PACKET
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Load address and entry point of the routine.
    pub fn entry(&self) -> u32 {
        nxt::HELPER_CODE_ADDR
    }

    /// RAM address of the page-write unit, immediately after the code.
    pub fn data_addr(&self) -> u32 {
        nxt::HELPER_CODE_ADDR + self.code.len() as u32
    }
}

/// Packs one streamed page-write unit: 4-byte LE page number, then the
/// payload zero-padded to a full page.
pub(crate) fn pack_page(page: u32, data: &[u8]) -> [u8; nxt::HELPER_PACKET] {
    let mut buf = [0u8; nxt::HELPER_PACKET];
    buf[..4].copy_from_slice(&page.to_le_bytes());
    let len = data.len().min(nxt::PAGE_SIZE);
    buf[4..4 + len].copy_from_slice(&data[..len]);
    buf
}

/// An attached boot ROM conversation over one exclusively-owned transport.
pub struct SambaSession<T: RawTransport> {
    io: T,
    retries: u32,
    attached: bool,
    version: Option<String>,
}

impl<T: RawTransport> SambaSession<T> {
    pub fn new(io: T) -> Self {
        Self {
            io,
            retries: DEFAULT_IO_RETRIES,
            attached: false,
            version: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Boot ROM version string, known after [`attach`](Self::attach).
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Synchronizes with the ROM, whose current text mode is unknown.
    ///
    /// Forces verbose mode and waits for the prompt (safe in either mode),
    /// drops back to quiet mode discarding its reply, then asks for the
    /// version and keeps the first whitespace-delimited token.
    pub fn attach(&mut self) -> Result<(), SambaError> {
        if self.attached {
            return Err(SambaError::AlreadyAttached);
        }

        self.send_line(format!("{CMD_VERBOSE}{TERMINATOR}"))?;
        self.read_until_prompt()?;

        self.send_line(format!("{CMD_QUIET}{TERMINATOR}"))?;
        self.read_text()?;

        self.send_line(format!("{CMD_VERSION}{TERMINATOR}"))?;
        let line = self.read_text()?;
        let version = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();

        debug!(version = %version, "boot ROM attached");
        self.version = Some(version);
        self.attached = true;
        Ok(())
    }

    pub fn read_octet(&mut self, addr: u32) -> Result<u8, SambaError> {
        self.read_value(CMD_READ_OCTET, addr, 1).map(|v| v as u8)
    }

    pub fn read_halfword(&mut self, addr: u32) -> Result<u16, SambaError> {
        self.read_value(CMD_READ_HWORD, addr, 2).map(|v| v as u16)
    }

    pub fn read_word(&mut self, addr: u32) -> Result<u32, SambaError> {
        self.read_value(CMD_READ_WORD, addr, 4)
    }

    pub fn write_octet(&mut self, addr: u32, value: u8) -> Result<(), SambaError> {
        self.send_write(CMD_WRITE_OCTET, addr, 1, value as u32)
    }

    pub fn write_halfword(&mut self, addr: u32, value: u16) -> Result<(), SambaError> {
        self.send_write(CMD_WRITE_HWORD, addr, 2, value as u32)
    }

    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), SambaError> {
        self.send_write(CMD_WRITE_WORD, addr, 4, value)
    }

    /// Stream-reads `len` bytes of memory.
    pub fn read_bytes(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, SambaError> {
        self.send_line(format!(
            "{CMD_STREAM_READ}{},{len}{TERMINATOR}",
            hex_format(addr, 8)
        ))?;
        self.read_exact_reply(len)
    }

    /// Stream-writes bytes to memory.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), SambaError> {
        self.send_line(format!(
            "{CMD_STREAM_WRITE}{},{}{TERMINATOR}",
            hex_format(addr, 8),
            data.len()
        ))?;
        self.write_raw(data)
    }

    /// Starts execution at `addr`.
    pub fn go(&mut self, addr: u32) -> Result<(), SambaError> {
        self.send_line(format!("{CMD_GOTO}{}{TERMINATOR}", hex_format(addr, 8)))
    }

    /// Leaves the monitor and boots the firmware in flash.
    pub fn reboot(&mut self) -> Result<(), SambaError> {
        self.go(nxt::FLASH_BASE)
    }

    /// Uploads the flash-writer routine and switches the master clock to
    /// PLL/2, ready for programming.
    pub fn prepare_flash(&mut self, helper: &FlashHelper) -> Result<(), SambaError> {
        self.ensure_attached()?;
        self.write_bytes(helper.entry(), helper.code())?;
        self.write_word(nxt::PMC_MCKR, nxt::PMC_MCKR_PLL_DIV2)?;
        debug!(
            addr = helper.entry(),
            len = helper.code().len(),
            "flash helper loaded"
        );
        Ok(())
    }

    /// Writes one flash page through the uploaded helper routine.
    ///
    /// The page-write unit is streamed to the helper's data window and the
    /// helper is entered with a goto. The ROM sends no completion
    /// acknowledgment for the goto: the routine returns to the monitor when
    /// done, and the write is only known to have finished when the next
    /// command is accepted.
    pub fn write_page(
        &mut self,
        helper: &FlashHelper,
        page: u32,
        data: &[u8],
    ) -> Result<(), SambaError> {
        self.ensure_attached()?;
        if page >= nxt::PAGE_COUNT {
            return Err(SambaError::PageOutOfRange { page });
        }

        let unit = pack_page(page, data);
        self.write_bytes(helper.data_addr(), &unit)?;
        self.go(helper.entry())
    }

    /// Stream-reads one flash page.
    pub fn read_page(&mut self, page: u32) -> Result<Vec<u8>, SambaError> {
        if page >= nxt::PAGE_COUNT {
            return Err(SambaError::PageOutOfRange { page });
        }
        let addr = nxt::FLASH_BASE + page * nxt::PAGE_SIZE as u32;
        self.read_bytes(addr, nxt::PAGE_SIZE)
    }

    /// Locks or unlocks one flash region: wait for the controller's ready
    /// bit, then the timing-setup word, the keyed region command and the
    /// timing-restore word.
    pub fn change_region_lock(&mut self, region: u32, lock: bool) -> Result<(), SambaError> {
        if region >= nxt::LOCK_REGION_COUNT {
            return Err(SambaError::RegionOutOfRange { region });
        }

        let op = if lock { nxt::MC_LOCK } else { nxt::MC_UNLOCK };
        let cmd = nxt::MC_KEY | (region << nxt::MC_REGION_SHIFT) | op;

        self.wait_flash_ready()?;
        self.write_word(nxt::MC_FMR, nxt::MC_FMR_WRITE_SETUP)?;
        self.write_word(nxt::MC_FCR, cmd)?;
        self.write_word(nxt::MC_FMR, nxt::MC_FMR_WRITE_DONE)?;
        trace!(region, lock, "lock region changed");
        Ok(())
    }

    /// Drops write protection on the whole flash.
    pub fn unlock_all_regions(&mut self) -> Result<(), SambaError> {
        for region in 0..nxt::LOCK_REGION_COUNT {
            self.change_region_lock(region, false)?;
        }
        Ok(())
    }

    fn ensure_attached(&self) -> Result<(), SambaError> {
        if self.attached {
            Ok(())
        } else {
            Err(SambaError::NotAttached)
        }
    }

    fn wait_flash_ready(&mut self) -> Result<(), SambaError> {
        for _ in 0..FLASH_READY_POLLS {
            if self.read_word(nxt::MC_FSR)? & nxt::MC_FSR_READY != 0 {
                return Ok(());
            }
        }
        Err(SambaError::FlashBusy)
    }

    fn read_value(&mut self, cmd: char, addr: u32, width: usize) -> Result<u32, SambaError> {
        self.send_line(format!("{cmd}{},{width}{TERMINATOR}", hex_format(addr, 8)))?;
        let bytes = self.read_exact_reply(width)?;

        let mut value = 0u32;
        for (i, b) in bytes.iter().enumerate() {
            value |= (*b as u32) << (8 * i);
        }
        Ok(value)
    }

    fn send_write(
        &mut self,
        cmd: char,
        addr: u32,
        width: usize,
        value: u32,
    ) -> Result<(), SambaError> {
        self.send_line(format!(
            "{cmd}{},{}{TERMINATOR}",
            hex_format(addr, 8),
            hex_format(value, 2 * width)
        ))
    }

    fn send_line(&mut self, line: String) -> Result<(), SambaError> {
        trace!(line = line.trim_end(), "samba command");
        self.write_raw(line.as_bytes())
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<(), SambaError> {
        transport::write_all(&mut self.io, buf, self.retries)?;
        Ok(())
    }

    fn read_burst(&mut self) -> Result<Vec<u8>, SambaError> {
        let mut buf = [0u8; nxt::RAW_CHUNK];
        let n = transport::read_some(&mut self.io, &mut buf, self.retries)?;
        Ok(buf[..n].to_vec())
    }

    /// Collects bursts until the expected byte count is reached. A burst
    /// that overshoots the expectation is a framing error.
    fn read_exact_reply(&mut self, len: usize) -> Result<Vec<u8>, SambaError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let burst = self.read_burst()?;
            if out.len() + burst.len() > len {
                return Err(SambaError::BadReplyLength {
                    got: out.len() + burst.len(),
                    expected: len,
                });
            }
            out.extend(burst);
        }
        Ok(out)
    }

    fn read_until_prompt(&mut self) -> Result<(), SambaError> {
        loop {
            let burst = self.read_burst()?;
            if burst.last() == Some(&PROMPT) {
                return Ok(());
            }
        }
    }

    /// Reads an ASCII reply. The ROM ends text with a line-feed in quiet
    /// mode and a `>` prompt in verbose mode, so both terminators count.
    fn read_text(&mut self) -> Result<String, SambaError> {
        let mut raw: Vec<u8> = Vec::new();
        loop {
            let burst = self.read_burst()?;
            raw.extend(burst);
            if text_complete(&raw) {
                return Ok(String::from_utf8_lossy(&raw).into_owned());
            }
        }
    }
}

#[cfg(test)]
impl<T: RawTransport> SambaSession<T> {
    pub(crate) fn io(&self) -> &T {
        &self.io
    }
}

fn text_complete(buf: &[u8]) -> bool {
    match buf.last() {
        Some(&b'\n') | Some(&b'\r') | Some(&PROMPT) => true,
        _ => buf.len() >= 2 && buf[buf.len() - 2] == b'\n',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;

    fn attach_script(io: &mut ScriptedTransport) {
        io.push_reply(b"\n\r>"); // verbose switch, prompt appears
        io.push_reply(b"\n\r"); // quiet switch ack
        io.push_reply(b"v1.4 Nov 10 2004 14:49:33\n\r");
    }

    const ATTACH_WIRE: &[u8] = b"T#\nN#\nV#\n";

    #[test]
    fn test_hex_format_exact_width() {
        assert_eq!(hex_format(0xA, 8), "0000000A");
        assert_eq!(hex_format(0x0020_3000, 8), "00203000");
        assert_eq!(hex_format(0xFF, 2), "FF");
    }

    #[test]
    fn test_hex_format_truncates_to_field() {
        // Wider values keep only the low width*4 bits.
        assert_eq!(hex_format(0x12345, 4), "2345");
        assert_eq!(hex_format(0xDEAD_BEEF, 2), "EF");
    }

    #[test]
    fn test_pack_page_pads_with_zeros() {
        let payload: Vec<u8> = (0..100u8).collect();
        let unit = pack_page(7, &payload);

        assert_eq!(unit.len(), 260);
        assert_eq!(&unit[..4], &7u32.to_le_bytes());
        assert_eq!(&unit[4..104], &payload[..]);
        assert!(unit[104..].iter().all(|&b| b == 0));
    }

    #[test]
    fn attach_parses_version_token() {
        let mut io = ScriptedTransport::new(64);
        attach_script(&mut io);

        let mut s = SambaSession::new(io);
        s.attach().unwrap();
        assert_eq!(s.version(), Some("v1.4"));
        assert_eq!(s.io.written, ATTACH_WIRE);
    }

    #[test]
    fn attach_twice_is_an_error() {
        let mut io = ScriptedTransport::new(64);
        attach_script(&mut io);

        let mut s = SambaSession::new(io);
        s.attach().unwrap();
        assert!(matches!(s.attach(), Err(SambaError::AlreadyAttached)));
    }

    #[test]
    fn word_reply_split_across_bursts_reassembles_little_endian() {
        let mut io = ScriptedTransport::new(64);
        io.push_reply(&[0x78, 0x56]);
        io.push_reply(&[0x34, 0x12]);

        let mut s = SambaSession::new(io);
        let value = s.read_word(0x0020_0000).unwrap();
        assert_eq!(value, 0x1234_5678);
        assert_eq!(s.io.written, b"w00200000,4#\n");
    }

    #[test]
    fn overlong_reply_is_a_framing_error() {
        let mut io = ScriptedTransport::new(64);
        io.push_reply(&[1, 2, 3, 4, 5]);

        let mut s = SambaSession::new(io);
        let err = s.read_word(0x0020_0000).unwrap_err();
        assert!(matches!(
            err,
            SambaError::BadReplyLength {
                got: 5,
                expected: 4
            }
        ));
    }

    #[test]
    fn write_word_formats_fixed_width_argument() {
        let io = ScriptedTransport::new(64);
        let mut s = SambaSession::new(io);
        s.write_word(0x0020_1000, 0xA).unwrap();
        assert_eq!(s.io.written, b"W00201000,0000000A#\n");
    }

    #[test]
    fn write_octet_uses_two_hex_digits() {
        let io = ScriptedTransport::new(64);
        let mut s = SambaSession::new(io);
        s.write_octet(0x0020_1000, 0x5A).unwrap();
        assert_eq!(s.io.written, b"O00201000,5A#\n");
    }

    #[test]
    fn stream_write_sends_decimal_length_then_payload() {
        let io = ScriptedTransport::new(64);
        let mut s = SambaSession::new(io);
        s.write_bytes(0x0020_3000, &[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(s.io.written, b"S00203000,3#\n\xAA\xBB\xCC");
    }

    #[test]
    fn write_page_streams_unit_then_enters_helper() {
        let mut io = ScriptedTransport::new(64);
        attach_script(&mut io);

        let mut s = SambaSession::new(io);
        s.attach().unwrap();

        let helper = FlashHelper::new(vec![0; 16]).unwrap();
        assert_eq!(helper.entry(), 0x0020_3000);
        assert_eq!(helper.data_addr(), 0x0020_3010);

        let payload: Vec<u8> = (0..100u8).collect();
        s.write_page(&helper, 10, &payload).unwrap();

        let written = &s.io.written[ATTACH_WIRE.len()..];
        let header = b"S00203010,260#\n";
        assert_eq!(&written[..header.len()], header);

        let unit = &written[header.len()..header.len() + 260];
        assert_eq!(&unit[..4], &10u32.to_le_bytes());
        assert_eq!(&unit[4..104], &payload[..]);
        assert!(unit[104..].iter().all(|&b| b == 0));

        assert_eq!(&written[header.len() + 260..], b"G00203000#\n");
    }

    #[test]
    fn write_page_requires_attach() {
        let io = ScriptedTransport::new(64);
        let mut s = SambaSession::new(io);
        let helper = FlashHelper::new(vec![0; 16]).unwrap();
        let err = s.write_page(&helper, 0, &[0]).unwrap_err();
        assert!(matches!(err, SambaError::NotAttached));
    }

    #[test]
    fn page_number_is_range_checked() {
        let mut io = ScriptedTransport::new(64);
        attach_script(&mut io);
        let mut s = SambaSession::new(io);
        s.attach().unwrap();

        let helper = FlashHelper::new(vec![0; 16]).unwrap();
        let err = s.write_page(&helper, nxt::PAGE_COUNT, &[0]).unwrap_err();
        assert!(matches!(err, SambaError::PageOutOfRange { page } if page == nxt::PAGE_COUNT));
    }

    #[test]
    fn unlock_issues_controller_sequence_after_ready_poll() {
        let mut io = ScriptedTransport::new(64);
        io.push_reply(&[0x01, 0, 0, 0]); // MC_FSR: ready

        let mut s = SambaSession::new(io);
        s.change_region_lock(3, false).unwrap();

        // Ready poll, then setup, keyed command (0x5A000000 | 3 << 14 |
        // unlock), restore.
        let expected: &[u8] = b"wFFFFFF68,4#\n\
                                WFFFFFF60,00050100#\n\
                                WFFFFFF64,5A00C004#\n\
                                WFFFFFF60,00340100#\n";
        assert_eq!(s.io.written, expected);
    }

    #[test]
    fn busy_controller_bounds_the_poll() {
        let mut io = ScriptedTransport::new(64);
        for _ in 0..FLASH_READY_POLLS {
            io.push_reply(&[0, 0, 0, 0]);
        }

        let mut s = SambaSession::new(io);
        let err = s.change_region_lock(0, false).unwrap_err();
        assert!(matches!(err, SambaError::FlashBusy));
    }

    #[test]
    fn helper_layout_is_validated() {
        assert!(FlashHelper::new(Vec::new()).is_err());
        assert!(FlashHelper::new(vec![0; FlashHelper::max_code_len()]).is_ok());
        let err = FlashHelper::new(vec![0; FlashHelper::max_code_len() + 1]).unwrap_err();
        assert!(matches!(err, SambaError::HelperTooLarge { .. }));
    }

    #[test]
    fn reboot_jumps_to_flash_base() {
        let io = ScriptedTransport::new(64);
        let mut s = SambaSession::new(io);
        s.reboot().unwrap();
        assert_eq!(s.io.written, b"G00100000#\n");
    }
}
