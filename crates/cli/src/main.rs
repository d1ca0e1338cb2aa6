use std::process::ExitCode;

fn main() -> ExitCode {
    poflow_cli::run()
}
