//! replmgr CLI entry point
//!
//! Parses arguments, dispatches to the CLI commands and exits non-zero with
//! the error on stderr. All logic lives in the `cli` module.

use replmgr::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
