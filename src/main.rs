use clap::Parser;
use devsweep::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "devsweep=warn",
        1 => "devsweep=info",
        _ => "devsweep=debug",
    };
    let filter = EnvFilter::try_from_env("DEVSWEEP_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = cli.run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
