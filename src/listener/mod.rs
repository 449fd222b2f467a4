//! Accepts command WebSocket connections from the network.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::runtime::Runtime;

use crate::catalog::Catalog;
use crate::config::Server;
use crate::envelope::{HandlerRegistry, ServerHandler};

pub mod web;

/// Serve the catalog and the command WebSocket until the server dies.
pub fn serve(
    config: &Server,
    catalog: &Catalog,
    registry: HandlerRegistry<Arc<dyn ServerHandler>>,
) -> io::Result<()> {
    let addr: SocketAddr = config
        .web_addr
        .parse()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let state = web::State::new(registry, catalog)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let app = web::app(Arc::new(state), &config.command_path);

    info!("[web] Starting WebSocket server at ws://{}{}", addr, config.command_path);
    let runtime = Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        web::run(listener, app).await
    })
}
