#![warn(clippy::all, rust_2018_idioms)]

use std::error::Error;
use std::sync::Arc;

use vanmitra::maps_api::overpass::OverpassClient;
use vanmitra::{server, AtlasService, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = Config::from_env()?;
    let upstream = OverpassClient::new(
        config.overpass_url.clone(),
        config.overpass_timeout,
        config.backoff,
    )?;
    log::info!("using Overpass endpoint {}", upstream.endpoint());

    let bind_addr = config.bind_addr;
    let service = Arc::new(AtlasService::new(config, Arc::new(upstream)));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log::info!("VanMitra atlas listening on {}", listener.local_addr()?);
    axum::serve(listener, server::router(service)).await?;
    Ok(())
}
