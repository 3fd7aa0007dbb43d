use std::process::ExitCode;

fn main() -> ExitCode {
    steamguard_cli::run()
}
