mod cli;
mod client;
mod export;
mod import;
mod serve;

use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive("msgvault_cli=info".parse().unwrap())
                .from_env_lossy(),
        )
        .init();

    if let Err(err) = cli::run().await {
        error!("[error]: {err}");
        err.chain().skip(1).for_each(|cause| error!("because: {}", cause));
        std::process::exit(1);
    }
}
