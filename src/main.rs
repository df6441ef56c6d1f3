use clap::Parser;
use dense_retriever::{Cli, run_with};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run_with(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
