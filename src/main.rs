use clap::Parser;
use pitrader::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
