use nxt_loader::api;

use crate::cli;
use crate::context;
use crate::exit_codes;
use crate::output::{DryRunSummary, Output};

pub fn run(args: cli::FlashArgs, out: &mut dyn Output) -> i32 {
    let opts = api::FlashOptions {
        port: args.port.clone(),
        wait: args.wait,
        wait_timeout: context::wait_timeout(args.wait_timeout_ms),
        start_page: args.start_page,
        unlock: !args.no_unlock,
        verify: args.verify,
        reboot: !args.no_reboot,
    };

    if args.dry_run {
        return dry_run(&args, &opts, out);
    }

    match api::flash_image(&args.image, &args.helper, &opts, |ev| out.event(ev)) {
        Ok(()) => exit_codes::EXIT_OK,
        Err(e) => report(&e, out),
    }
}

fn dry_run(args: &cli::FlashArgs, opts: &api::FlashOptions, out: &mut dyn Output) -> i32 {
    match api::plan_flash(&args.image, &args.helper, opts, |ev| out.event(ev)) {
        Ok(plan) => {
            out.dry_run(&DryRunSummary {
                bytes: plan.image.len(),
                pages: plan.image.page_count(),
                start_page: opts.start_page,
                target_id: format!("samba:{}", plan.port),
            });
            exit_codes::EXIT_OK
        }
        Err(e) => report(&e, out),
    }
}

pub(crate) fn report(e: &api::FlashError, out: &mut dyn Output) -> i32 {
    let code = map_flash_error(e);
    out.error(code, &e.to_string());
    code
}

pub(crate) fn map_flash_error(e: &api::FlashError) -> i32 {
    match e.kind() {
        api::FlashErrorKind::NoDevice => exit_codes::EXIT_NO_DEVICE,
        api::FlashErrorKind::AmbiguousTarget => exit_codes::EXIT_AMBIGUOUS,
        api::FlashErrorKind::InvalidImage => exit_codes::EXIT_INVALID_IMAGE,
        api::FlashErrorKind::WriteFailed | api::FlashErrorKind::VerifyFailed => {
            exit_codes::EXIT_WRITE_FAILED
        }
        api::FlashErrorKind::Unexpected => exit_codes::EXIT_UNEXPECTED,
    }
}
