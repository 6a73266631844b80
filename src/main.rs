//! Channels: event-based WebSocket server
//!
//! Accepts RFC 6455 clients and routes `{"event", "data"}` text messages to
//! named handlers, which reply to the sender or broadcast to every client.
//!
//! Usage:
//!   channels                                     # Default port 8765
//!   channels --port 9000                         # Custom port
//!   channels --auth-token mysecret               # Require `auth` before other events
//!   channels --validate-json --verbose           # Reject non-event payloads, debug logs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use channels_server::EventRouter;
use channels_server::builtin::{LogEvents, RequireAuth, ValidateJson};
use channels_server::events::register_defaults;
use channels_transport::{ClientRegistry, TransportConfig, TransportServer};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "channels", about = "Channels: event-based WebSocket server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8765")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Maximum concurrent connections (unlimited if not set)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Size of each socket read in bytes
    #[arg(long, default_value = "4096")]
    read_buffer_size: usize,

    /// Require clients to send `auth` with this token before other events
    #[arg(long)]
    auth_token: Option<String>,

    /// Reply `error` to payloads that are not `{"event": ..., "data": ...}`
    #[arg(long)]
    validate_json: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn build_router(cli: &Cli) -> EventRouter {
    let mut router = EventRouter::new(Arc::new(ClientRegistry::new()));

    router.use_middleware(LogEvents);
    if cli.validate_json {
        router.use_middleware(ValidateJson);
    }
    if cli.auth_token.is_some() {
        router.use_middleware(RequireAuth);
    }

    register_defaults(&mut router, cli.auth_token.clone());
    router
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let router = build_router(&cli);

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                      Channels Server                         ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Port:        {}", cli.port);
    println!("  Binding:     {}", cli.hostname);
    println!("  Events:      {}", router.events().join(", "));
    println!("  Middleware:  {}", router.middleware_names().join(", "));
    match cli.max_connections {
        Some(max) => println!("  Max conns:   {max}"),
        None => println!("  Max conns:   unlimited"),
    }
    println!();

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        read_buffer_size: cli.read_buffer_size,
        max_connections: cli.max_connections,
        ..TransportConfig::default()
    };

    let mut transport = TransportServer::start(transport_config, Arc::new(router))
        .await
        .context("Failed to start transport")?;

    println!("  Server running at ws://{}:{}", cli.hostname, transport.port());
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("  Shutting down...");
    transport.stop().await;
    println!("  Server stopped.");

    Ok(())
}
