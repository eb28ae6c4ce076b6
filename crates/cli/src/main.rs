use std::process::ExitCode;

fn main() -> ExitCode {
    treejar_cli::run()
}
