#![warn(clippy::all)]

#[macro_use]
extern crate log;

extern crate clap;
use clap::{crate_version, Parser};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use flate2::read::GzDecoder;

use libnflog_live::{NflogOptions, NflogSource};
use libnflog_tools::{Config, FrameSource, PcapReplaySource};
use nflog_relay::{Relay, RelayError, RelayOptions};

const EXIT_CONFIG: i32 = 1;
const EXIT_RELAY_SOCKET: i32 = 15;
const EXIT_REPLAY_INPUT: i32 = 16;
const EXIT_CAPTURE: i32 = 17;

/// NFLOG packet sensor: relays logged packet metadata to one local consumer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// NFLOG group to listen on (default: 7)
    #[arg(short, long)]
    group: Option<u16>,

    /// Relay socket path (default: /tmp/aud/nflog_emit.sock)
    #[arg(short, long)]
    socket: Option<String>,

    /// Replay a pcap file recorded on an NFLOG interface instead of listening live
    #[arg(short, long, value_name = "PCAP")]
    replay: Option<String>,

    /// Do not print records on stdout
    #[arg(short, long)]
    quiet: bool,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("NFLOG_RELAY_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(level.into()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .compact();
    match config.get("log_file") {
        Some(log_file) => {
            let path = Path::new(log_file);
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            let name = path.file_name().unwrap_or(OsStr::new("nflog-relay.log"));
            let file_appender = RollingFileAppender::new(Rotation::NEVER, dir, name);
            builder.with_writer(file_appender).with_ansi(false).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
}

/// Remove the relay socket on SIGINT/SIGTERM
fn install_signal_handler(socket_path: PathBuf) {
    let res = ctrlc::set_handler(move || {
        info!("Interrupted, removing {}", socket_path.display());
        if let Err(e) = std::fs::remove_file(&socket_path) {
            debug!("could not remove {}: {}", socket_path.display(), e);
        }
        process::exit(0);
    });
    if let Err(e) = res {
        warn!("Could not install signal handler: {e}");
    }
}

fn open_replay(filename: &str, config: &Config) -> Result<PcapReplaySource, libnflog_tools::Error> {
    let file = File::open(Path::new(filename))?;
    if filename.ends_with(".gz") {
        PcapReplaySource::new(GzDecoder::new(file), config)
    } else {
        PcapReplaySource::new(file, config)
    }
}

fn relay_exit_code(e: &RelayError, replay: bool) -> i32 {
    match e {
        RelayError::Bind { .. } => EXIT_RELAY_SOCKET,
        _ if replay => EXIT_REPLAY_INPUT,
        _ => EXIT_CAPTURE,
    }
}

fn run(relay: &mut Relay, source: &mut dyn FrameSource, replay: bool) -> i32 {
    match relay.run(source) {
        Ok(stats) => {
            info!(
                "nflog-relay: done ({} sessions, {} records sent, {} decode errors, {} dropped)",
                stats.sessions, stats.records_sent, stats.decode_errors, stats.frames_dropped
            );
            0
        }
        Err(e) => {
            error!("{e}");
            relay_exit_code(&e, replay)
        }
    }
}

fn main() {
    let args = Args::parse();

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        if let Err(e) = load_config(&mut config, filename) {
            eprintln!("nflog-relay: could not load configuration {filename}: {e}");
            process::exit(EXIT_CONFIG);
        }
    }
    // override config options from command-line arguments
    if let Some(group) = args.group {
        config.set("nflog.group", i64::from(group));
    }
    if let Some(socket) = args.socket.as_ref() {
        config.set("relay.socket_path", socket.as_str());
    }
    if args.quiet {
        config.set("relay.echo", false);
    }

    init_logging(&config, args.verbose);
    info!("nflog-relay {}", crate_version!());

    let options = RelayOptions::from_config(&config);
    install_signal_handler(options.socket_path.clone());
    let mut relay = Relay::new(options);

    let code = match args.replay.as_ref() {
        Some(filename) => match open_replay(filename, &config) {
            Ok(mut source) => {
                info!("Replaying {filename}");
                run(&mut relay, &mut source, true)
            }
            Err(e) => {
                error!("Could not open replay input {filename}: {e}");
                EXIT_REPLAY_INPUT
            }
        },
        None => {
            let nflog_options = match NflogOptions::from_config(&config) {
                Ok(o) => o,
                Err(e) => {
                    error!("{e}");
                    process::exit(EXIT_CONFIG);
                }
            };
            match NflogSource::open(&nflog_options) {
                Ok(mut source) => run(&mut relay, &mut source, false),
                Err(e) => {
                    error!("{e}");
                    if e.io_error().kind() == io::ErrorKind::PermissionDenied {
                        warn!("Hint: listening on an NFLOG group requires CAP_NET_ADMIN");
                    }
                    e.exit_code()
                }
            }
        }
    };
    process::exit(code);
}
