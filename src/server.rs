use std::net::SocketAddr;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Binds the preferred port, falling back to any free one.
async fn reserve_port(port: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await {
        Ok(listener) => Ok(listener),
        Err(err) => {
            warn!("port {port} unavailable ({err}), picking another one");
            TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await
        }
    }
}

/// Serves the output directory over HTTP until the task is dropped.
pub async fn serve(dir: Utf8PathBuf, port: u16) -> Result<(), anyhow::Error> {
    let listener = reserve_port(port).await?;
    let port = listener.local_addr()?.port();

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "serving {dir}");

    let router = Router::new().fallback_service(ServeDir::new(dir));

    axum::serve(listener, router).await?;

    Ok(())
}
