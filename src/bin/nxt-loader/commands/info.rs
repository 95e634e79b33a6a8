use nxt_loader::api;

use crate::cli;
use crate::commands::flash::report;
use crate::context;
use crate::output::Output;

pub fn run(args: cli::InfoArgs, out: &mut dyn Output) -> i32 {
    let opts = api::FlashOptions {
        port: args.port.clone(),
        wait: args.wait,
        wait_timeout: context::wait_timeout(args.wait_timeout_ms),
        ..Default::default()
    };

    match api::boot_info(&opts, |ev| out.event(ev)) {
        Ok(info) => {
            out.info(&info);
            crate::exit_codes::EXIT_OK
        }
        Err(e) => report(&e, out),
    }
}
