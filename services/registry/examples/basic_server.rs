//! In-memory chart registry
//!
//! Run with: cargo run -p chart-registry --example basic_server

use chart_registry::RegistryBuilder;
use storage::MemoryStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let storage = MemoryStorage::with_buckets(&["registry"]);

    let addr = "127.0.0.1:5000";
    let app = RegistryBuilder::new()
        .storage(storage.into())
        .bucket("registry")
        .base_url(format!("http://{addr}"))
        .with_stored_images()
        .build();

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Chart registry listening on http://{}", addr);
    tracing::info!("Try: helm repo add local http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
