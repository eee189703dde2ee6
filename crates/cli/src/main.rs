use std::process::ExitCode;

fn main() -> ExitCode {
    cartwatch_cli::run()
}
