mod api;
mod archive;
mod config;
mod error;
mod exam;
mod media;

use tracing_subscriber::EnvFilter;
use warp::Filter;

use config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let routes = api::exam_routes::exam_routes(&config);

    let address = config.bind_address();
    tracing::info!(host = %config.server.host, port = config.server.port, "Starting exam server");

    warp::serve(routes).run(address).await;
}
