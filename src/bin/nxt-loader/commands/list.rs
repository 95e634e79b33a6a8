use nxt_loader::targets;

use crate::cli;
use crate::exit_codes;
use crate::output::Output;

pub fn run(_args: cli::ListArgs, out: &mut dyn Output) -> i32 {
    match targets::discover_samba_targets() {
        Ok(ts) => {
            out.list_targets(&ts);
            exit_codes::EXIT_OK
        }
        Err(e) => {
            out.error(exit_codes::EXIT_UNEXPECTED, &e.to_string());
            exit_codes::EXIT_UNEXPECTED
        }
    }
}
