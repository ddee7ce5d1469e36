// Entrypoint for the `gist` command.
// - Parses flags (usage errors exit with code 2 via clap).
// - Builds the settings once and hands them to the library pipeline.
// - Reports any failure on stderr as `gist: <error>` and exits with 1.

use gist_cli::cli::{exit_code, run, Cli, Settings};
use std::io;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr so stdout only ever carries the gist URL.
    // RUST_LOG=debug shows what is being sent.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse_args();
    let settings = Settings::from_env(&cli);

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    let result = run(&cli, &settings, stdin.lock(), &mut stdout);
    let code = exit_code(&result, &mut io::stderr());
    if code != 0 {
        process::exit(code);
    }
}
