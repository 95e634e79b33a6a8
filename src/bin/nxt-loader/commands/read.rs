use nxt_loader::api;

use crate::cli;
use crate::commands::flash::report;
use crate::context;
use crate::exit_codes;
use crate::output::Output;

pub fn run(args: cli::ReadArgs, out: &mut dyn Output) -> i32 {
    let opts = api::FlashOptions {
        port: args.port.clone(),
        wait: args.wait,
        wait_timeout: context::wait_timeout(args.wait_timeout_ms),
        ..Default::default()
    };

    match api::read_flash(args.start_page, args.pages, &opts, |ev| out.event(ev)) {
        Ok(data) => {
            if let Err(e) = std::fs::write(&args.out, &data) {
                out.error(
                    exit_codes::EXIT_UNEXPECTED,
                    &format!("unable to write {}: {e}", args.out.display()),
                );
                return exit_codes::EXIT_UNEXPECTED;
            }
            out.saved(&args.out, data.len());
            exit_codes::EXIT_OK
        }
        Err(e) => report(&e, out),
    }
}
