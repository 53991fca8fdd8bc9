use std::{path::PathBuf, process, sync::Arc};

use clap::Parser;

use git_depot::server::{AppState, app};

/// Changing the listen address is not part of the server contract.
const LISTEN_ADDR: &str = "127.0.0.1:12345";

#[derive(Parser)]
#[command(name = "git-depot")]
#[command(about = "Multi-tenant Git smart HTTP server", long_about = None)]
struct Cli {
    /// Root directory for on-disk repositories
    #[arg(long)]
    data_dir: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if cli.data_dir.is_empty() {
        eprintln!("--data-dir must not be empty");
        process::exit(1);
    }
    let data_dir = PathBuf::from(&cli.data_dir);
    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        eprintln!("cannot create data dir {}: {err}", data_dir.display());
        process::exit(1);
    }

    let state = Arc::new(AppState::on_disk(data_dir));
    let router = app(state);

    let listener = match tokio::net::TcpListener::bind(LISTEN_ADDR).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("cannot bind {LISTEN_ADDR}: {err}");
            process::exit(1);
        }
    };
    tracing::info!("git http server: http://{LISTEN_ADDR}");

    if let Err(err) = axum::serve(listener, router).await {
        tracing::error!("server terminated: {err}");
        process::exit(1);
    }
}
