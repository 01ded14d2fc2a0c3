//! dialogue-server: a single-port HTTP/1.1-subset server
//!
//! Each accepted connection runs a serial request/response dialogue:
//! `GET /<operation>?k=v&... HTTP/1.1` requests are parsed and handed to a
//! user action whose output becomes the response body.
//!
//! Features:
//! - Sequential, process-per-connection, thread-per-connection and
//!   thread-pool concurrency models
//! - Serial keep-alive driven by the `Connection` header
//! - Graceful shutdown on SIGINT, SIGQUIT and SIGTERM
//! - Configuration via CLI arguments or TOML file

mod actions;
mod config;
mod dialogue;
mod error;
mod logging;
mod protocol;
mod runtime;
mod shutdown;

use actions::Echo;
use config::Config;
use dialogue::HttpDialogue;
use runtime::Acceptor;
use std::sync::Arc;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::init(&config.log_level, config.log_dir.as_deref(), "dialogue-server")?;

    info!(
        ip = config.ip.as_deref().unwrap_or("0.0.0.0"),
        port = config.port,
        mode = %config.mode,
        recv_buffer_size = config.recv_buffer_size,
        max_params = config.max_params,
        "Starting dialogue-server"
    );

    let workers = config
        .workers
        .unwrap_or_else(|| runtime::PoolConfig::default().workers);
    let acceptor = Acceptor::create(config.port, config.ip.as_deref(), config.mode)?
        .with_pool(workers, config.queue_depth);
    shutdown::install_stop_signals(&acceptor.shutdown_handle())?;

    let dialogue = HttpDialogue::new(Echo)
        .with_recv_buffer_size(config.recv_buffer_size)
        .with_max_params(config.max_params);

    info!(addr = %acceptor.local_addr(), mode = %acceptor.mode(), "Serving echo");
    acceptor.run(Arc::new(dialogue))?;

    info!("Server stopped");
    Ok(())
}
