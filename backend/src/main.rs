use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("backend=debug,reqwest=info")),
        )
        .init();

    worker::run().await
}
