//! # knnidx CLI
//!
//! Command-line interface for building, inspecting and querying knnidx
//! index files. Run `knnidx --help` for usage information.

mod cli;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
