use std::process::ExitCode;

use colored::Colorize;

fn main() -> ExitCode {
    match rpm_mirror::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
