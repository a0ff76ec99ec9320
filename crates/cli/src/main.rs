use std::process::ExitCode;

fn main() -> ExitCode {
    shelfsync_cli::run()
}
