use std::path::Path;

use nxt_loader::{api, operation::OperationEvent, targets};

use crate::cli;

pub mod human;
pub mod json;

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct DryRunSummary {
    pub bytes: usize,
    pub pages: u32,
    pub start_page: u32,
    pub target_id: String,
}

pub trait Output {
    fn event(&mut self, event: OperationEvent);
    fn list_targets(&mut self, targets: &[targets::Target]);
    fn info(&mut self, info: &api::BootInfo);
    fn name(&mut self, port: &str, name: &str);
    fn saved(&mut self, path: &Path, bytes: usize);
    fn dry_run(&mut self, summary: &DryRunSummary);
    fn error(&mut self, code: i32, message: &str);
    fn finish(&mut self) {}
}

fn make(json: bool, opts: OutputOptions) -> Box<dyn Output> {
    if json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn make_for_flash(args: &cli::FlashArgs) -> Box<dyn Output> {
    make(
        args.json,
        OutputOptions {
            verbose: args.verbose,
            quiet: args.quiet,
        },
    )
}

pub fn make_for_read(args: &cli::ReadArgs) -> Box<dyn Output> {
    make(
        args.json,
        OutputOptions {
            verbose: args.verbose,
            quiet: args.quiet,
        },
    )
}

pub fn make_for_info(args: &cli::InfoArgs) -> Box<dyn Output> {
    make(
        args.json,
        OutputOptions {
            verbose: args.verbose,
            quiet: false,
        },
    )
}

pub fn make_for_name(args: &cli::NameArgs) -> Box<dyn Output> {
    make(
        args.json,
        OutputOptions {
            verbose: false,
            quiet: false,
        },
    )
}

pub fn make_for_list(args: &cli::ListArgs) -> Box<dyn Output> {
    make(
        args.json,
        OutputOptions {
            verbose: false,
            quiet: false,
        },
    )
}
