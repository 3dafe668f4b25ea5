use std::process::ExitCode;

fn main() -> ExitCode {
    guardquote_cli::run()
}
