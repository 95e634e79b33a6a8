use std::collections::BTreeMap;
use std::path::Path;

use nxt_loader::{api, operation::OperationEvent, targets};

use crate::output::{DryRunSummary, Output, OutputOptions};

/// One JSON line on stdout per event.
#[derive(serde::Serialize)]
struct JsonEvent {
    schema: u32,
    event: &'static str,
    #[serde(flatten)]
    fields: BTreeMap<&'static str, serde_json::Value>,
}

impl JsonEvent {
    fn new(event: &'static str) -> Self {
        Self {
            schema: 1,
            event,
            fields: BTreeMap::new(),
        }
    }

    fn field(mut self, key: &'static str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key, value.into());
        self
    }
}

pub struct JsonOutput {
    opts: OutputOptions,
    last_percent: Option<u64>,
}

impl JsonOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            last_percent: None,
        }
    }

    fn emit(&mut self, ev: JsonEvent) {
        println!(
            "{}",
            serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string())
        );
    }
}

fn target_value(target: &targets::Target) -> serde_json::Value {
    serde_json::to_value(target).unwrap_or(serde_json::Value::Null)
}

impl Output for JsonOutput {
    fn event(&mut self, event: OperationEvent) {
        let ev = match event {
            OperationEvent::DiscoverStart => JsonEvent::new("discover_start"),
            OperationEvent::TargetDetected { index, target } => JsonEvent::new("target")
                .field("index", index as u64)
                .field("target", target_value(&target)),
            OperationEvent::DiscoverDone { count } => {
                JsonEvent::new("discover_done").field("count", count as u64)
            }
            OperationEvent::TargetSelected { target_id } => {
                JsonEvent::new("selected").field("target_id", target_id)
            }
            OperationEvent::ImageLoaded { bytes, pages } => JsonEvent::new("image_loaded")
                .field("bytes", bytes as u64)
                .field("pages", pages),
            OperationEvent::HelperLoaded { bytes } => {
                JsonEvent::new("helper_loaded").field("bytes", bytes as u64)
            }
            OperationEvent::Attached { target_id, version } => JsonEvent::new("attached")
                .field("target_id", target_id)
                .field("version", version),
            OperationEvent::UnlockStart { regions } => {
                JsonEvent::new("unlock_start").field("regions", regions)
            }
            OperationEvent::Unlocked => JsonEvent::new("unlocked"),
            OperationEvent::Page { index, total, page } => {
                // Throttle to percent changes so big images don't flood
                // stdout.
                let percent = ((index + 1) * 100 / total.max(1)) as u64;
                if self.last_percent == Some(percent) {
                    return;
                }
                self.last_percent = Some(percent);
                JsonEvent::new("progress")
                    .field("percent", percent)
                    .field("written", index as u64 + 1)
                    .field("total", total as u64)
                    .field("page", page)
            }
            OperationEvent::VerifyStart { pages } => {
                JsonEvent::new("verify_start").field("pages", pages)
            }
            OperationEvent::Verified => JsonEvent::new("verified"),
            OperationEvent::Reboot => JsonEvent::new("reboot"),
            OperationEvent::Done { target_id } => {
                JsonEvent::new("done").field("target_id", target_id)
            }
        };
        self.emit(ev);
    }

    fn list_targets(&mut self, targets: &[targets::Target]) {
        for (i, t) in targets.iter().enumerate() {
            self.emit(
                JsonEvent::new("target")
                    .field("index", i as u64)
                    .field("target", target_value(t)),
            );
        }
    }

    fn info(&mut self, info: &api::BootInfo) {
        self.emit(
            JsonEvent::new("info")
                .field("target_id", info.target_id.as_str())
                .field("version", info.version.as_str()),
        );
    }

    fn name(&mut self, port: &str, name: &str) {
        self.emit(JsonEvent::new("name").field("port", port).field("name", name));
    }

    fn saved(&mut self, path: &Path, bytes: usize) {
        self.emit(
            JsonEvent::new("saved")
                .field("path", path.display().to_string())
                .field("bytes", bytes as u64),
        );
    }

    fn dry_run(&mut self, summary: &DryRunSummary) {
        self.emit(
            JsonEvent::new("dry_run")
                .field("bytes", summary.bytes as u64)
                .field("pages", summary.pages)
                .field("start_page", summary.start_page)
                .field("target_id", summary.target_id.as_str()),
        );
    }

    fn error(&mut self, code: i32, message: &str) {
        self.emit(
            JsonEvent::new("error")
                .field("code", code as i64)
                .field("message", message),
        );

        if self.opts.verbose {
            eprintln!("error: {message}");
        }
    }
}
