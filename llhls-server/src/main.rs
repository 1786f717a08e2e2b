use anyhow::{Context, Result};
use clap::Parser;
use llhls_server::{logging::init_logging, Config, Server};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "llhls-server")]
#[command(about = "Low-latency HLS live server", long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON)
    #[arg(short, long, env = "LLHLS_CONFIG")]
    config: Option<String>,

    /// HTTP listen host, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// HTTP listen port, overrides the config file
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.http_port = port;
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!("LL-HLS server starting...");
    info!(
        max_segments = config.muxer.max_segments,
        segment_min_duration_ms = config.muxer.segment_min_duration_ms,
        fragment_policy = ?config.muxer.fragment_policy,
        "Muxer configuration"
    );

    let server = Server::new(config)?;
    for source in server.pending_streams() {
        info!(source = %source, "Stream configured, waiting for an ingest producer");
    }
    let shutdown_token = server.shutdown_token();
    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => {
                    error!("Server error: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Server task failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            shutdown_token.cancel();
            server_task.await??;
        }
    }

    info!("LL-HLS server shut down");
    Ok(())
}
