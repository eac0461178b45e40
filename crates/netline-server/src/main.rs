//! netline proxy server binary.
//!
//! # Usage
//!
//! ```bash
//! netline-server --bind 0.0.0.0 --port 7878 --certificate deadbeef
//! ```

use std::net::TcpListener;
use std::time::Duration;

use clap::Parser;
use netline_core::{AddressFamily, Environment, SystemEnvironment};
use netline_server::ProxyServer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// netline authenticated proxy server
#[derive(Parser, Debug)]
#[command(name = "netline-server")]
#[command(about = "netline messaging protocol proxy server")]
#[command(version)]
struct Args {
    /// Address to bind to.
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 7878)]
    port: u16,

    /// Worker pool size driving session ticks.
    #[arg(long, default_value_t = 4)]
    pool_size: usize,

    /// Per-session tick cadence, in milliseconds.
    #[arg(long, default_value_t = 50)]
    tick_delay_ms: u64,

    /// Protocol version advertised in the challenge handshake.
    #[arg(long, default_value_t = 1)]
    version: u32,

    /// Certificate bytes clients must echo back, as hex. Empty accepts any
    /// client (every certificate check passes).
    #[arg(long, default_value = "")]
    certificate: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn decode_hex(s: &str) -> Result<Vec<u8>, std::io::Error> {
    if s.len() % 2 != 0 {
        return Err(std::io::Error::other("certificate hex must have an even number of digits"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(std::io::Error::other))
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let certificate = decode_hex(&args.certificate)?;

    tracing::info!(bind = %args.bind, port = args.port, "netline proxy server starting");

    let env = SystemEnvironment;
    let server: std::sync::Arc<ProxyServer<TcpListener, SystemEnvironment>> = ProxyServer::new(
        args.bind,
        args.port,
        args.pool_size,
        Duration::from_millis(args.tick_delay_ms),
        args.version,
        certificate,
        env,
    );

    server.start(AddressFamily::Ipv4)?;
    tracing::info!("listening, {} session(s) active", server.get_num_sessions());

    loop {
        env.sleep(Duration::from_secs(1));
        tracing::debug!(sessions = server.get_num_sessions(), "tick");
    }
}
