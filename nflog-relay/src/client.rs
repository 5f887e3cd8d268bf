//! Consumer side of the relay channel

use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::relay::remove_stale_socket;

pub const DEFAULT_CLIENT_PATH: &str = "/tmp/aud/nflog_sink.sock";

/// Datagram sent to the relay to become its consumer
pub const HANDSHAKE: &[u8] = b"hello";

/// Receive buffer size; records are always shorter
pub const MAX_RECORD_LEN: usize = 512;

pub struct RelayClient {
    socket: UnixDatagram,
    path: PathBuf,
}

impl RelayClient {
    /// Bind `client_path` and send the handshake to the relay listening on `server_path`
    pub fn connect<P: AsRef<Path>, Q: AsRef<Path>>(
        client_path: P,
        server_path: Q,
    ) -> io::Result<RelayClient> {
        let path = client_path.as_ref().to_path_buf();
        remove_stale_socket(&path)?;
        let socket = UnixDatagram::bind(&path)?;
        let client = RelayClient { socket, path };
        client.socket.connect(server_path.as_ref())?;
        client.socket.send(HANDSHAKE)?;
        debug!(
            "handshake sent from {} to {}",
            client.path.display(),
            server_path.as_ref().display()
        );
        Ok(client)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    /// Block until the next record arrives
    pub fn recv_line(&self) -> io::Result<String> {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let n = self.socket.recv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Err(e) = remove_stale_socket(&self.path) {
            warn!("could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// Split a record line into its `key=value` fields, in order.
///
/// Fields without `=` are skipped. An empty value (`flags=`) is kept.
pub fn parse_record_line(line: &str) -> IndexMap<String, String> {
    line.split_whitespace()
        .filter_map(|field| field.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}
