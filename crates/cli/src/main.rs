use std::process::ExitCode;

fn main() -> ExitCode {
    landcost_cli::run()
}
