use nxt_loader::api;

use crate::cli;
use crate::commands::flash::report;
use crate::exit_codes;
use crate::output::Output;

pub fn run(args: cli::NameArgs, out: &mut dyn Output) -> i32 {
    match api::device_name(&args.port) {
        Ok(name) => {
            out.name(&args.port, &name);
            exit_codes::EXIT_OK
        }
        Err(e) => report(&e, out),
    }
}
