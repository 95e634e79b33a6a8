use std::io::{IsTerminal, Write};
use std::path::Path;

use nxt_loader::{api, operation::OperationEvent, targets};

use crate::output::{DryRunSummary, Output, OutputOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Quiet,
    Verbose,
    Progress,
}

pub struct HumanOutput {
    opts: OutputOptions,
    is_tty: bool,
    progress_active: bool,
    last_percent: Option<u64>,
}

impl HumanOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            is_tty: std::io::stderr().is_terminal(),
            progress_active: false,
            last_percent: None,
        }
    }

    fn mode(&self) -> Mode {
        if self.opts.quiet {
            Mode::Quiet
        } else if self.opts.verbose {
            Mode::Verbose
        } else {
            Mode::Progress
        }
    }

    fn finish_line(&mut self) {
        if self.progress_active {
            eprintln!();
            self.progress_active = false;
        }
    }

    fn println(&mut self, msg: &str) {
        if self.mode() == Mode::Quiet {
            return;
        }
        self.finish_line();
        eprintln!("{msg}");
    }

    fn verbose_line(&mut self, msg: &str) {
        if self.mode() == Mode::Verbose {
            self.println(msg);
        }
    }

    fn progress_update(&mut self, percent: u64, i: usize, n: usize, page: u32) {
        if self.mode() == Mode::Quiet {
            return;
        }

        if self.is_tty {
            eprint!("\r  programming {percent:3}% ({i}/{n}) page {page}");
            let _ = std::io::stderr().flush();
            self.progress_active = true;
            self.last_percent = Some(percent);
            return;
        }

        let last = self.last_percent.unwrap_or(0);
        if percent == 0 || percent == 100 || percent >= last + 10 {
            self.last_percent = Some(percent);
            self.println(&format!("  programming {percent:3}% ({i}/{n})"));
        }
    }
}

impl Output for HumanOutput {
    fn event(&mut self, event: OperationEvent) {
        match event {
            OperationEvent::DiscoverStart => {
                self.verbose_line("Scanning for SAM-BA targets...");
            }
            OperationEvent::TargetDetected { index, target } => {
                self.verbose_line(&format!(
                    "[{index}] {} {:04X}:{:04X}",
                    target.id(),
                    target.vid,
                    target.pid
                ));
            }
            OperationEvent::DiscoverDone { count } => {
                self.verbose_line(&format!("Scan done, {count} target(s)"));
            }
            OperationEvent::TargetSelected { target_id } => {
                self.println(&format!("Target: {target_id}"));
            }
            OperationEvent::ImageLoaded { bytes, pages } => {
                self.println(&format!("Image: {bytes} bytes ({pages} pages)"));
            }
            OperationEvent::HelperLoaded { bytes } => {
                self.verbose_line(&format!("Helper: {bytes} bytes"));
            }
            OperationEvent::Attached { version, .. } => {
                self.println(&format!("Boot ROM {version}"));
            }
            OperationEvent::UnlockStart { regions } => {
                self.verbose_line(&format!("Unlocking {regions} flash regions"));
            }
            OperationEvent::Unlocked => {
                self.verbose_line("Flash unlocked");
            }
            OperationEvent::Page { index, total, page } => {
                let percent = ((index + 1) * 100 / total.max(1)) as u64;
                self.progress_update(percent, index + 1, total, page);
            }
            OperationEvent::VerifyStart { pages } => {
                self.println(&format!("Verifying {pages} pages"));
            }
            OperationEvent::Verified => {
                self.println("Verify OK");
            }
            OperationEvent::Reboot => {
                self.println("Booting firmware");
            }
            OperationEvent::Done { target_id } => {
                self.println(&format!("Done: {target_id}"));
            }
        }
    }

    fn list_targets(&mut self, targets: &[targets::Target]) {
        if targets.is_empty() {
            self.println(&format!(
                "No SAM-BA targets found ({:04X}:{:04X})",
                nxt_loader::nxt::VID_SAMBA,
                nxt_loader::nxt::PID_SAMBA
            ));
            return;
        }
        for (i, t) in targets.iter().enumerate() {
            self.println(&format!(
                "[{i}] {} {:04X}:{:04X} {}",
                t.id(),
                t.vid,
                t.pid,
                t.serial_number.as_deref().unwrap_or("")
            ));
        }
    }

    fn info(&mut self, info: &api::BootInfo) {
        self.println(&format!("Target: {}", info.target_id));
        self.println(&format!("Boot ROM version: {}", info.version));
    }

    fn name(&mut self, port: &str, name: &str) {
        self.println(&format!("{port}: {name}"));
    }

    fn saved(&mut self, path: &Path, bytes: usize) {
        self.println(&format!("Saved {bytes} bytes to {}", path.display()));
    }

    fn dry_run(&mut self, summary: &DryRunSummary) {
        self.println("Dry run OK");
        self.println(&format!(
            "Firmware: {} bytes, {} pages from page {}",
            summary.bytes, summary.pages, summary.start_page
        ));
        self.println(&format!("Target: {}", summary.target_id));
    }

    fn error(&mut self, _code: i32, message: &str) {
        self.finish_line();
        eprintln!("error: {message}");
    }

    fn finish(&mut self) {
        self.finish_line();
    }
}
