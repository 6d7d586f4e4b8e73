use colored::Colorize;
use std::process::ExitCode;

fn main() -> ExitCode {
    match mobileconv::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}
