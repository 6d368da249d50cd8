//! Lineport command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Accept clients on port 7000 and broadcast stdin lines to all of them
//! lineport serve --port 7000
//!
//! # Connect, retrying up to 5 times, with encrypted lines
//! lineport connect --port 7000 --host example.org --retries 5 --key secret
//! ```
//!
//! Received messages go to stdout; everything else is logged.

use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use lineport_net::{
    ConnectionEvent, ConnectionState, Endpoint, EndpointConfig, FnListener, LOCALHOST,
    PortRegistry, ServerConfig, config::DEFAULT_BIND_HOST,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Notify,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the peer to acknowledge a close on exit.
const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Point-to-point TCP line messaging
#[derive(Parser, Debug)]
#[command(name = "lineport")]
#[command(about = "Point-to-point TCP line messaging")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients and broadcast stdin lines to every one of them
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: i64,

        /// Interface to bind
        #[arg(long, default_value = DEFAULT_BIND_HOST)]
        bind: String,

        /// Passphrase for line encryption
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Connect to a server and send stdin lines to it
    Connect {
        /// Server port
        #[arg(short, long)]
        port: i64,

        /// Server host
        #[arg(long, default_value = LOCALHOST)]
        host: String,

        /// Extra connection attempts after the first failure
        #[arg(short, long, default_value_t = 0)]
        retries: u32,

        /// Passphrase for line encryption
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    match args.command {
        Command::Serve { port, bind, key } => serve(port, bind, key.as_deref()).await,
        Command::Connect { port, host, retries, key } => {
            connect(port, &host, retries, key.as_deref()).await
        },
    }
}

async fn serve(
    port: i64,
    bind: String,
    key: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig { bind_host: bind, endpoint: endpoint_config(key), ..Default::default() };
    let registry = PortRegistry::with_config(config);
    let server = registry.get_server(port)?;

    server.subscribe(Arc::new(FnListener::new(|endpoint: &Endpoint, event: &ConnectionEvent| {
        match event {
            ConnectionEvent::MessageReceived(text) => print_line(&format!("{}: {text}", endpoint.name())),
            ConnectionEvent::Failed(message) => tracing::warn!("{message}"),
            ConnectionEvent::Connected | ConnectionEvent::Ended => {},
        }
    })));

    server.init_server().await?;
    if let Some(addr) = server.local_addr() {
        tracing::info!("Lineport server listening on {addr}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let delivered = server.broadcast(&line).await;
                    tracing::debug!(delivered, "broadcast");
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("shutting down");
    registry.finalize_all().await;
    Ok(())
}

async fn connect(
    port: i64,
    host: &str,
    retries: u32,
    key: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = Endpoint::new(port, endpoint_config(key))?;
    let done = Arc::new(Notify::new());

    let finished = Arc::clone(&done);
    endpoint.subscribe(Arc::new(FnListener::new(move |endpoint: &Endpoint, event: &ConnectionEvent| {
        match event {
            ConnectionEvent::MessageReceived(text) => print_line(text),
            ConnectionEvent::Connected => {
                tracing::info!(peer = ?endpoint.peer_addr(), "connected as {}", endpoint.name());
            },
            ConnectionEvent::Ended => {
                tracing::info!("connection closed");
                finished.notify_one();
            },
            ConnectionEvent::Failed(message) => {
                tracing::warn!("{message}");
                if endpoint.state() == ConnectionState::Failed {
                    finished.notify_one();
                }
            },
        }
    })));

    endpoint.connect(Some(host), retries)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(err) = endpoint.send(&line).await {
                        tracing::warn!("not sent: {err}");
                    }
                },
                None => break,
            },
            () = done.notified() => return Ok(()),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let was_connected = endpoint.is_connected();
    endpoint.finalize().await;
    if was_connected && tokio::time::timeout(CLOSE_WAIT, done.notified()).await.is_err() {
        tracing::debug!("peer did not acknowledge close, aborting");
        endpoint.abort();
    }
    Ok(())
}

fn endpoint_config(key: Option<&str>) -> EndpointConfig {
    match key {
        Some(passphrase) => EndpointConfig::default().with_passphrase(passphrase),
        None => EndpointConfig::default(),
    }
}

fn print_line(text: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(err) = writeln!(stdout, "{text}") {
        tracing::warn!("stdout write failed: {err}");
    }
}
