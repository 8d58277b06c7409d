use clap::Parser;
use tracing_subscriber::EnvFilter;

use valuer::api::{AppState, run_http_server};
use valuer::cli::{Cli, Command, execute};
use valuer::config::EngineConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match EngineConfig::from_env().and_then(|config| cli.apply(config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Command::Serve { .. } = cli.command {
        let port = config.port;
        let state = match AppState::new(config) {
            Ok(state) => state,
            Err(e) => {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        };
        if let Err(e) = run_http_server(state, port).await {
            eprintln!("Server error: {e}");
            std::process::exit(1);
        }
        return;
    }

    match execute(&cli.command, &config).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
