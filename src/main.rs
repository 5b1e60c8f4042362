use std::process::ExitCode;

use colored::Colorize;

use workflow::AggregatedErrors;

fn main() -> ExitCode {
    match qubots_runner::run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if let Some(errors) = e.downcast_ref::<AggregatedErrors>() {
                errors.print_recap();
            }
            eprintln!("{} {e:#}", "Error:".red());
            ExitCode::FAILURE
        }
    }
}
