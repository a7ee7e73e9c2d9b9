//! adaptar CLI
//!
//! # Usage
//!
//! ```bash
//! # Report the eight split shapes of a dataset
//! adaptar info sleep datasets/sleep
//! adaptar info home datasets/smarthome --domain-a ihs95 --domain-b ihs117
//!
//! # Assemble a model over synthetic data and print its losses
//! adaptar demo vrnn --batch 8 --time-steps 12
//! ```

use adaptar::cli::{run_command, Cli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
