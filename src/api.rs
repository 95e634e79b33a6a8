use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::{
    command,
    firmware::{self, FirmwareImage},
    flash,
    framing::{FramedLink, LinkMode},
    nxt,
    operation::OperationEvent,
    samba::{FlashHelper, SambaError, SambaSession},
    targets::{self, Target},
    transport::{SerialTransport, TransportError, DEFAULT_NATIVE_TIMEOUT},
};

#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Talk to this serial port instead of discovering one.
    ///
    /// Example: "COM6" or "/dev/ttyACM0".
    pub port: Option<String>,

    /// Wait for a SAM-BA target to be detected.
    pub wait: bool,
    /// Max time to wait when `wait=true` (None = forever).
    pub wait_timeout: Option<Duration>,

    /// First flash page to program.
    pub start_page: u32,

    /// Drop write protection on all lock regions before programming.
    pub unlock: bool,

    /// Read the programmed range back and compare it against the image.
    pub verify: bool,

    /// Boot the flashed firmware when done.
    pub reboot: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            port: None,
            wait: false,
            wait_timeout: None,
            start_page: 0,
            unlock: true,
            verify: false,
            reboot: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlashErrorKind {
    NoDevice,
    AmbiguousTarget,
    InvalidImage,
    WriteFailed,
    VerifyFailed,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("no SAM-BA target found")]
    NoTargets,

    #[error("ambiguous target: {message}")]
    AmbiguousTarget { message: String },

    #[error("target discovery failed: {source}")]
    DiscoveryFailed {
        #[source]
        source: targets::DiscoverError,
    },

    #[error("invalid firmware image: {source}")]
    InvalidImage {
        #[source]
        source: firmware::ImageError,
    },

    #[error("unable to read helper routine: {source}")]
    HelperIo {
        #[source]
        source: std::io::Error,
    },

    #[error("invalid helper routine: {source}")]
    InvalidHelper {
        #[source]
        source: SambaError,
    },

    #[error("unable to open {port}: {source}")]
    OpenPort {
        port: String,
        #[source]
        source: TransportError,
    },

    #[error("boot ROM attach failed on {port}: {source}")]
    AttachFailed {
        port: String,
        #[source]
        source: SambaError,
    },

    #[error("unlock failed: {source}")]
    UnlockFailed {
        #[source]
        source: SambaError,
    },

    #[error("helper upload failed: {source}")]
    PrepareFailed {
        #[source]
        source: SambaError,
    },

    #[error("write failed at page {page}: {source}")]
    WriteFailed {
        page: u32,
        #[source]
        source: SambaError,
    },

    #[error("flash read failed: {source}")]
    ReadFailed {
        #[source]
        source: SambaError,
    },

    #[error("verify mismatch at page {page}")]
    VerifyMismatch { page: u32 },

    #[error("name query failed on {port}: {source}")]
    NameFailed {
        port: String,
        #[source]
        source: command::CommandError,
    },
}

impl FlashError {
    pub fn kind(&self) -> FlashErrorKind {
        match self {
            FlashError::NoTargets => FlashErrorKind::NoDevice,
            FlashError::AmbiguousTarget { .. } => FlashErrorKind::AmbiguousTarget,
            FlashError::DiscoveryFailed { .. } => FlashErrorKind::Unexpected,
            FlashError::InvalidImage { .. }
            | FlashError::HelperIo { .. }
            | FlashError::InvalidHelper { .. } => FlashErrorKind::InvalidImage,
            FlashError::OpenPort { .. } | FlashError::AttachFailed { .. } => {
                FlashErrorKind::NoDevice
            }
            FlashError::UnlockFailed { .. }
            | FlashError::PrepareFailed { .. }
            | FlashError::WriteFailed { .. }
            | FlashError::ReadFailed { .. } => FlashErrorKind::WriteFailed,
            FlashError::VerifyMismatch { .. } => FlashErrorKind::VerifyFailed,
            FlashError::NameFailed { .. } => FlashErrorKind::Unexpected,
        }
    }
}

/// Everything resolved before any byte is written to flash.
pub struct FlashPlan {
    pub image: FirmwareImage,
    pub helper: FlashHelper,
    pub port: String,
}

/// Loads the inputs and resolves the target without touching the device.
pub fn plan_flash<F>(
    image_path: &Path,
    helper_path: &Path,
    opts: &FlashOptions,
    mut on_event: F,
) -> Result<FlashPlan, FlashError>
where
    F: FnMut(OperationEvent),
{
    let image =
        FirmwareImage::load(image_path).map_err(|e| FlashError::InvalidImage { source: e })?;
    on_event(OperationEvent::ImageLoaded {
        bytes: image.len(),
        pages: image.page_count(),
    });

    let code = fs::read(helper_path).map_err(|e| FlashError::HelperIo { source: e })?;
    let helper = FlashHelper::new(code).map_err(|e| FlashError::InvalidHelper { source: e })?;
    on_event(OperationEvent::HelperLoaded {
        bytes: helper.code().len(),
    });

    let port = select_port(opts, &mut on_event)?;
    Ok(FlashPlan {
        image,
        helper,
        port,
    })
}

/// Flashes a firmware image through the SAM-BA boot ROM.
pub fn flash_image<F>(
    image_path: &Path,
    helper_path: &Path,
    opts: &FlashOptions,
    mut on_event: F,
) -> Result<(), FlashError>
where
    F: FnMut(OperationEvent),
{
    let plan = plan_flash(image_path, helper_path, opts, &mut on_event)?;
    let FlashPlan {
        image,
        helper,
        port,
    } = plan;
    let target_id = format!("samba:{port}");

    let mut session = open_session(&port, &mut on_event)?;

    if opts.unlock {
        on_event(OperationEvent::UnlockStart {
            regions: nxt::LOCK_REGION_COUNT,
        });
        session
            .unlock_all_regions()
            .map_err(|e| FlashError::UnlockFailed { source: e })?;
        on_event(OperationEvent::Unlocked);
    }

    session
        .prepare_flash(&helper)
        .map_err(|e| FlashError::PrepareFailed { source: e })?;

    let mut current = opts.start_page;
    flash::write_pages(&mut session, &helper, opts.start_page, &image.data, |p| {
        current = p.page;
        on_event(OperationEvent::Page {
            index: p.index,
            total: p.total,
            page: p.page,
        });
    })
    .map_err(|e| FlashError::WriteFailed {
        page: current,
        source: e,
    })?;

    if opts.verify {
        on_event(OperationEvent::VerifyStart {
            pages: image.page_count(),
        });
        let readback = flash::read_pages(&mut session, opts.start_page, image.page_count())
            .map_err(|e| FlashError::ReadFailed { source: e })?;
        if let Some(page) = first_mismatch(&image.data, &readback, opts.start_page) {
            return Err(FlashError::VerifyMismatch { page });
        }
        on_event(OperationEvent::Verified);
    }

    if opts.reboot {
        on_event(OperationEvent::Reboot);
        // Best-effort: the goto tears the monitor down underneath us.
        if let Err(e) = session.reboot() {
            warn!(error = %e, "reboot command failed");
        }
    }

    on_event(OperationEvent::Done { target_id });
    Ok(())
}

/// Streams a page range out of flash.
pub fn read_flash<F>(
    first_page: u32,
    pages: u32,
    opts: &FlashOptions,
    mut on_event: F,
) -> Result<Vec<u8>, FlashError>
where
    F: FnMut(OperationEvent),
{
    let port = select_port(opts, &mut on_event)?;
    let target_id = format!("samba:{port}");
    let mut session = open_session(&port, &mut on_event)?;

    let data = flash::read_pages(&mut session, first_page, pages)
        .map_err(|e| FlashError::ReadFailed { source: e })?;

    on_event(OperationEvent::Done { target_id });
    Ok(data)
}

/// Boot ROM facts for the `info` command.
pub struct BootInfo {
    pub target_id: String,
    pub version: String,
}

pub fn boot_info<F>(opts: &FlashOptions, mut on_event: F) -> Result<BootInfo, FlashError>
where
    F: FnMut(OperationEvent),
{
    let port = select_port(opts, &mut on_event)?;
    let target_id = format!("samba:{port}");
    let session = open_session(&port, &mut on_event)?;

    Ok(BootInfo {
        target_id,
        version: session.version().unwrap_or_default().to_string(),
    })
}

/// Asks a firmware-mode board for its display name over the command
/// channel.
pub fn device_name(port: &str) -> Result<String, FlashError> {
    let io = SerialTransport::open(port, DEFAULT_NATIVE_TIMEOUT).map_err(|e| {
        FlashError::OpenPort {
            port: port.to_string(),
            source: e,
        }
    })?;

    let mut link = FramedLink::open(io, LinkMode::Command);
    let name = command::device_name(&mut link);
    link.close();
    name.map_err(|e| FlashError::NameFailed {
        port: port.to_string(),
        source: e,
    })
}

fn open_session<F>(
    port: &str,
    on_event: &mut F,
) -> Result<SambaSession<SerialTransport>, FlashError>
where
    F: FnMut(OperationEvent),
{
    let io =
        SerialTransport::open(port, DEFAULT_NATIVE_TIMEOUT).map_err(|e| FlashError::OpenPort {
            port: port.to_string(),
            source: e,
        })?;

    let mut session = SambaSession::new(io);
    session.attach().map_err(|e| FlashError::AttachFailed {
        port: port.to_string(),
        source: e,
    })?;

    on_event(OperationEvent::Attached {
        target_id: format!("samba:{port}"),
        version: session.version().unwrap_or_default().to_string(),
    });
    Ok(session)
}

fn select_port<F>(opts: &FlashOptions, on_event: &mut F) -> Result<String, FlashError>
where
    F: FnMut(OperationEvent),
{
    if let Some(port) = &opts.port {
        on_event(OperationEvent::TargetSelected {
            target_id: format!("samba:{port}"),
        });
        return Ok(port.clone());
    }

    let targets = discover_targets_wait(opts, on_event)?;
    let target = select_single(&targets)?;
    on_event(OperationEvent::TargetSelected {
        target_id: target.id(),
    });
    Ok(target.address.clone())
}

fn discover_targets_wait<F>(
    opts: &FlashOptions,
    on_event: &mut F,
) -> Result<Vec<Target>, FlashError>
where
    F: FnMut(OperationEvent),
{
    on_event(OperationEvent::DiscoverStart);

    let start = Instant::now();
    loop {
        let targets = targets::discover_samba_targets()
            .map_err(|e| FlashError::DiscoveryFailed { source: e })?;

        for (i, t) in targets.iter().cloned().enumerate() {
            on_event(OperationEvent::TargetDetected {
                index: i,
                target: t,
            });
        }
        on_event(OperationEvent::DiscoverDone {
            count: targets.len(),
        });

        if !targets.is_empty() {
            return Ok(targets);
        }
        if !opts.wait {
            return Err(FlashError::NoTargets);
        }
        if let Some(t) = opts.wait_timeout {
            if start.elapsed() >= t {
                return Err(FlashError::NoTargets);
            }
        }
        std::thread::sleep(Duration::from_millis(250));
    }
}

fn select_single(targets: &[Target]) -> Result<&Target, FlashError> {
    match targets {
        [] => Err(FlashError::NoTargets),
        [one] => Ok(one),
        many => Err(FlashError::AmbiguousTarget {
            message: format!(
                "multiple SAM-BA targets detected ({}); use --port",
                many.len()
            ),
        }),
    }
}

/// First page whose read-back differs from the image, if any.
fn first_mismatch(image: &[u8], readback: &[u8], start_page: u32) -> Option<u32> {
    let len = image.len().min(readback.len());
    for i in 0..len {
        if image[i] != readback[i] {
            return Some(start_page + (i / nxt::PAGE_SIZE) as u32);
        }
    }
    if readback.len() < image.len() {
        return Some(start_page + (readback.len() / nxt::PAGE_SIZE) as u32);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::TransportKind;

    fn samba_target(address: &str) -> Target {
        Target {
            address: address.to_string(),
            name: None,
            transport: TransportKind::Usb,
            vid: nxt::VID_SAMBA,
            pid: nxt::PID_SAMBA,
            serial_number: None,
        }
    }

    #[test]
    fn select_single_requires_exactly_one_target() {
        assert!(matches!(select_single(&[]), Err(FlashError::NoTargets)));

        let one = [samba_target("/dev/ttyACM0")];
        assert_eq!(select_single(&one).unwrap().address, "/dev/ttyACM0");

        let two = [samba_target("/dev/ttyACM0"), samba_target("/dev/ttyACM1")];
        assert!(matches!(
            select_single(&two),
            Err(FlashError::AmbiguousTarget { .. })
        ));
    }

    #[test]
    fn first_mismatch_reports_the_failing_page() {
        let image = vec![0xAB; 600];
        let mut readback = image.clone();
        assert_eq!(first_mismatch(&image, &readback, 10), None);

        readback[300] = 0;
        assert_eq!(first_mismatch(&image, &readback, 10), Some(11));

        // A short read-back fails on the first missing page.
        assert_eq!(first_mismatch(&image, &image[..256], 10), Some(11));
    }

    #[test]
    fn error_kinds_map_for_exit_codes() {
        assert_eq!(FlashError::NoTargets.kind(), FlashErrorKind::NoDevice);
        assert_eq!(
            FlashError::VerifyMismatch { page: 3 }.kind(),
            FlashErrorKind::VerifyFailed
        );
        assert_eq!(
            FlashError::WriteFailed {
                page: 3,
                source: SambaError::FlashBusy
            }
            .kind(),
            FlashErrorKind::WriteFailed
        );
    }
}
