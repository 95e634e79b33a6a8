use std::process;

use clap::Parser;

mod cli;
mod commands;
mod context;
mod exit_codes;
mod logging;
mod output;

fn main() {
    logging::init_tracing();

    let cli = cli::Cli::parse();

    let exit_code = match cli.command {
        cli::Command::Flash(args) => {
            let mut out = output::make_for_flash(&args);
            let code = commands::flash::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Read(args) => {
            let mut out = output::make_for_read(&args);
            let code = commands::read::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Info(args) => {
            let mut out = output::make_for_info(&args);
            let code = commands::info::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Name(args) => {
            let mut out = output::make_for_name(&args);
            let code = commands::name::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::List(args) => {
            let mut out = output::make_for_list(&args);
            let code = commands::list::run(args, &mut *out);
            out.finish();
            code
        }
    };

    process::exit(exit_code);
}
