use std::fs;
use std::io;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use libnflog_tools::{Config, Error, FrameSource};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::CaptureAdapter;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/aud/nflog_emit.sock";

/// Largest handshake datagram read; the content is discarded
const HANDSHAKE_BUFFER_LEN: usize = 512;

/// Pause before rebinding after a failed handshake
pub const HANDSHAKE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    WaitingForPeer,
    Attached,
    Broken,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("cannot bind relay socket {}: {source}", .path.display())]
    Bind { path: PathBuf, source: io::Error },
    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error("send to consumer failed: {0}")]
    Send(#[source] io::Error),
    #[error("no consumer attached (session {0:?})")]
    NotAttached(SessionState),
    #[error("cannot {operation} in session state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("frame source: {0}")]
    Source(#[from] Error),
}

/// Remove a socket file left by a previous run
pub(crate) fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed stale socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// One consumer connection: bound socket, single peer, and its state.
///
/// A session goes `Unbound -> WaitingForPeer -> Attached` and ends `Broken`. A broken
/// session is never reused: the relay drops it and starts a new one.
#[derive(Debug)]
pub struct RelaySession {
    path: PathBuf,
    socket: Option<UnixDatagram>,
    peer: Option<SocketAddr>,
    state: SessionState,
}

impl RelaySession {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        RelaySession {
            path: path.into(),
            socket: None,
            peer: None,
            state: SessionState::Unbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn peer(&self) -> Option<&SocketAddr> {
        self.peer.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.state == SessionState::Attached
    }

    /// Bind a fresh datagram socket at the session path, replacing any stale file
    pub fn bind(&mut self) -> Result<(), RelayError> {
        if self.state != SessionState::Unbound {
            return Err(RelayError::InvalidState {
                operation: "bind",
                state: self.state,
            });
        }
        let bind_error = |source| RelayError::Bind {
            path: self.path.clone(),
            source,
        };
        remove_stale_socket(&self.path).map_err(bind_error)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(bind_error)?;
            }
        }
        let socket = UnixDatagram::bind(&self.path).map_err(bind_error)?;
        debug!("relay socket bound to {}", self.path.display());
        self.socket = Some(socket);
        self.state = SessionState::WaitingForPeer;
        Ok(())
    }

    /// Block until a consumer sends its handshake, then connect back to it.
    ///
    /// Senders without a bound address are ignored. Any I/O failure breaks the session.
    pub fn wait_for_peer(&mut self) -> Result<(), RelayError> {
        let socket = match (self.state, &self.socket) {
            (SessionState::WaitingForPeer, Some(socket)) => socket,
            (state, _) => {
                return Err(RelayError::InvalidState {
                    operation: "wait for peer",
                    state,
                })
            }
        };
        match handshake(socket) {
            Ok(peer) => {
                self.peer = Some(peer);
                self.state = SessionState::Attached;
                Ok(())
            }
            Err(e) => {
                self.tear_down();
                Err(RelayError::Handshake(e))
            }
        }
    }

    /// Send one record as one datagram. A failure breaks the session.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), RelayError> {
        let socket = match (self.state, &self.socket) {
            (SessionState::Attached, Some(socket)) => socket,
            (state, _) => return Err(RelayError::NotAttached(state)),
        };
        let result = socket.send(bytes);
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.tear_down();
                Err(RelayError::Send(e))
            }
        }
    }

    fn tear_down(&mut self) {
        self.socket = None;
        self.peer = None;
        self.state = SessionState::Broken;
    }
}

fn handshake(socket: &UnixDatagram) -> io::Result<SocketAddr> {
    let mut buf = [0u8; HANDSHAKE_BUFFER_LEN];
    loop {
        let (n, addr) = socket.recv_from(&mut buf)?;
        match addr.as_pathname() {
            Some(path) => {
                debug!("handshake: {} bytes from {}", n, path.display());
                socket.connect(path)?;
                return Ok(addr);
            }
            None => warn!("ignoring handshake from an unnamed socket"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    pub socket_path: PathBuf,
    /// Print every record on stdout
    pub echo: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            echo: true,
        }
    }
}

impl RelayOptions {
    pub fn from_config(config: &Config) -> Self {
        let defaults = RelayOptions::default();
        RelayOptions {
            socket_path: config
                .get("relay.socket_path")
                .map(PathBuf::from)
                .unwrap_or(defaults.socket_path),
            echo: config.get_bool("relay.echo").unwrap_or(defaults.echo),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Consumers that completed the handshake
    pub sessions: u64,
    pub records_sent: u64,
    /// Frames that could not be decoded
    pub decode_errors: u64,
    /// Decoded frames lost because the consumer went away
    pub frames_dropped: u64,
}

/// Outer loop: one session at a time, replaced whenever the consumer goes away
pub struct Relay {
    options: RelayOptions,
    stats: RelayStats,
}

impl Relay {
    pub fn new(options: RelayOptions) -> Self {
        Relay {
            options,
            stats: RelayStats::default(),
        }
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Relay frames from `source` until it is exhausted. A live source never is.
    ///
    /// Only a bind failure or a frame source failure ends the loop with an error.
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<RelayStats, RelayError> {
        let result = self.run_sessions(source);
        if let Err(e) = remove_stale_socket(&self.options.socket_path) {
            warn!("could not remove {}: {}", self.options.socket_path.display(), e);
        }
        result
    }

    fn run_sessions(&mut self, source: &mut dyn FrameSource) -> Result<RelayStats, RelayError> {
        let mut stdout = io::stdout();
        loop {
            let mut session = RelaySession::new(&self.options.socket_path);
            session.bind()?;
            info!(
                "waiting for a consumer on {}",
                self.options.socket_path.display()
            );
            if let Err(e) = session.wait_for_peer() {
                warn!("{}, retrying in {:?}", e, HANDSHAKE_RETRY_DELAY);
                thread::sleep(HANDSHAKE_RETRY_DELAY);
                continue;
            }
            self.stats.sessions += 1;
            info!("consumer attached: {:?}", session.peer());

            while session.is_attached() {
                let mut adapter = CaptureAdapter::new(&mut session, &mut self.stats);
                if self.options.echo {
                    adapter = adapter.with_echo(&mut stdout);
                }
                if source.dispatch(&mut adapter)?.is_none() {
                    info!(
                        "frame source exhausted: {} records sent, {} decode errors, {} dropped",
                        self.stats.records_sent, self.stats.decode_errors, self.stats.frames_dropped
                    );
                    return Ok(self.stats);
                }
            }
            info!("consumer lost, waiting for a new one");
        }
    }
}
