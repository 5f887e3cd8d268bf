#![warn(clippy::all)]

use clap::Parser;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use std::io::{self, Write};
use std::process;

use nflog_relay::{parse_record_line, RelayClient, DEFAULT_CLIENT_PATH, DEFAULT_SOCKET_PATH};

/// Diagnostic consumer: attach to a running nflog-relay and print the records it sends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay socket path
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    server: String,

    /// Local socket path to bind
    #[arg(short, long, default_value = DEFAULT_CLIENT_PATH)]
    client: String,

    /// Exit after this many records
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Print one `key: value` line per field instead of the raw record
    #[arg(short, long)]
    fields: bool,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("NFLOG_RELAY_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(level.into()));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .compact()
        .init();

    let client = match RelayClient::connect(&args.client, &args.server) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not attach to {}: {}", args.server, e);
            process::exit(1);
        }
    };
    info!("Attached to {} from {}", args.server, args.client);

    let mut received = 0u64;
    let mut code = 0;
    while args.count.map_or(true, |count| received < count) {
        let line = match client.recv_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Receive failed: {}", e);
                code = 1;
                break;
            }
        };
        received += 1;
        debug!("record {} ({} bytes)", received, line.len());
        let mut out = io::stdout().lock();
        let res = if args.fields {
            parse_record_line(&line)
                .iter()
                .try_for_each(|(k, v)| writeln!(out, "{k}: {v}"))
                .and_then(|_| writeln!(out))
        } else {
            writeln!(out, "{line}")
        };
        if res.is_err() {
            // stdout closed
            break;
        }
    }
    info!("nflog-sink: {} records received", received);
    drop(client);
    process::exit(code);
}
