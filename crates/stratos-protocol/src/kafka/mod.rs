//! Kafka wire-protocol listener.
//!
//! Accepts TCP connections and hands each to [`connection::handle_connection`],
//! which frames, decodes and dispatches requests through [`dispatch::dispatch`]
//! against the shared [`context::Context`].

pub mod api_keys;
pub mod codec;
pub mod connection;
pub mod context;
pub mod dispatch;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use stratos_common::config::KafkaListenerConfig;
use stratos_common::error::Result;

pub use context::Context;

/// Binds the configured listener and spawns [`connection::handle_connection`]
/// per accepted socket, running until the process is shut down.
pub async fn run(config: &KafkaListenerConfig, ctx: Arc<Context>) -> Result<()> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "kafka listener bound");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept kafka connection");
                continue;
            }
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = connection::handle_connection(socket, peer, ctx).await {
                error!(%peer, error = %e, "kafka connection ended with error");
            }
        });
    }
}
