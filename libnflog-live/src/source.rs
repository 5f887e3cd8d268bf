use std::io;

use libnflog_tools::nflog::frame_from_nflog_record;
use libnflog_tools::{now_us, Config, Error, FrameHandler, FrameSource};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::interface::interface_name;
use crate::netlink::*;

pub const DEFAULT_GROUP: u16 = 7;
pub const DEFAULT_COPY_RANGE: u32 = 0x40;
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65536;

const AF_UNSPEC: u8 = libc::AF_UNSPEC as u8;
const AF_INET: u8 = libc::AF_INET as u8;

/// Failure of one of the steps preparing the logging subsystem
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("error during nflog_open(): {0}")]
    OpenHandle(#[source] io::Error),
    #[error("error during nflog_unbind_pf(): {0}")]
    UnbindFamily(#[source] io::Error),
    #[error("error during nflog_bind_pf(): {0}")]
    BindFamily(#[source] io::Error),
    #[error("error during nflog_bind_group({group}): {source}")]
    BindGroup { group: u16, source: io::Error },
    #[error("can't set packet copy mode: {0}")]
    SetMode(#[source] io::Error),
}

impl SetupError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::OpenHandle(_) => 10,
            SetupError::UnbindFamily(_) => 11,
            SetupError::BindFamily(_) => 12,
            SetupError::BindGroup { .. } => 13,
            SetupError::SetMode(_) => 14,
        }
    }

    /// The system error behind the failed step
    pub fn io_error(&self) -> &io::Error {
        match self {
            SetupError::OpenHandle(e)
            | SetupError::UnbindFamily(e)
            | SetupError::BindFamily(e)
            | SetupError::SetMode(e) => e,
            SetupError::BindGroup { source, .. } => source,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NflogOptions {
    pub group: u16,
    pub copy_range: u32,
    pub recv_buffer_size: usize,
}

impl Default for NflogOptions {
    fn default() -> Self {
        NflogOptions {
            group: DEFAULT_GROUP,
            copy_range: DEFAULT_COPY_RANGE,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

impl NflogOptions {
    /// Read the `nflog.*` keys, falling back to defaults for missing keys
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let mut options = NflogOptions::default();
        if let Some(group) = config.get_usize("nflog.group") {
            options.group = u16::try_from(group)
                .map_err(|_| Error::Config(format!("nflog.group out of range: {group}")))?;
        }
        if let Some(range) = config.get_usize("nflog.copy_range") {
            options.copy_range = u32::try_from(range)
                .map_err(|_| Error::Config(format!("nflog.copy_range out of range: {range}")))?;
        }
        if let Some(size) = config.get_usize("nflog.recv_buffer_size") {
            if size == 0 {
                return Err(Error::Config("nflog.recv_buffer_size must not be 0".to_owned()));
            }
            options.recv_buffer_size = size;
        }
        Ok(options)
    }
}

/// Frame source reading packets logged by the kernel on one NFLOG group
pub struct NflogSource {
    socket: NetlinkSocket,
    group: u16,
    buffer: Vec<u8>,
}

impl NflogSource {
    /// Open the netlink handle and configure the group. Each step maps to its own error.
    pub fn open(options: &NflogOptions) -> Result<Self, SetupError> {
        debug!("opening nflog handle");
        let mut socket = NetlinkSocket::open().map_err(SetupError::OpenHandle)?;
        if let Err(e) = socket.set_recv_buffer_size(options.recv_buffer_size) {
            warn!("could not set receive buffer size: {}", e);
        }

        debug!("unbinding existing nf_log handler for AF_INET (if any)");
        socket
            .request(ConfigRequest::command(AF_INET, 0, ConfigCommand::PfUnbind))
            .map_err(SetupError::UnbindFamily)?;

        debug!("binding nfnetlink_log to AF_INET");
        socket
            .request(ConfigRequest::command(AF_INET, 0, ConfigCommand::PfBind))
            .map_err(SetupError::BindFamily)?;

        debug!("binding this socket to group {}", options.group);
        socket
            .request(ConfigRequest::command(
                AF_UNSPEC,
                options.group,
                ConfigCommand::Bind,
            ))
            .map_err(|source| SetupError::BindGroup {
                group: options.group,
                source,
            })?;

        debug!("setting copy_packet mode (range {})", options.copy_range);
        socket
            .request(ConfigRequest::copy_mode(
                AF_UNSPEC,
                options.group,
                CopyMode::Packet,
                options.copy_range,
            ))
            .map_err(SetupError::SetMode)?;

        info!("listening on nflog group {}", options.group);
        Ok(NflogSource {
            socket,
            group: options.group,
            buffer: Vec::with_capacity(options.recv_buffer_size),
        })
    }

    pub fn group(&self) -> u16 {
        self.group
    }
}

/// Pass every packet message of one received datagram to `handler`.
///
/// `now` is the receive time, used for packets without a kernel timestamp.
pub(crate) fn dispatch_messages(
    data: &[u8],
    now: u64,
    handler: &mut dyn FrameHandler,
) -> Result<usize, Error> {
    let mut delivered = 0;
    for msg in Messages::new(data) {
        match msg.message_type() {
            NFULNL_MSG_PACKET => {
                let body = msg.payload();
                let Some(frame) = frame_from_nflog_record(body, now) else {
                    warn!("packet message too short ({} bytes)", body.len());
                    continue;
                };
                trace!(
                    "frame: prefix {:?} indev {:?} outdev {:?} payload {} bytes",
                    frame.prefix,
                    frame.indev.and_then(interface_name),
                    frame.outdev.and_then(interface_name),
                    frame.payload.map_or(0, <[u8]>::len)
                );
                handler.handle_frame(&frame)?;
                delivered += 1;
            }
            NLMSG_ERROR => {
                if let Some(Err(e)) = ack_result(msg) {
                    warn!("netlink error message: {}", e);
                }
            }
            NLMSG_OVERRUN => warn!("netlink overrun"),
            NLMSG_NOOP | NLMSG_DONE => (),
            kind => debug!("ignoring netlink message type 0x{:x}", kind),
        }
    }
    Ok(delivered)
}

impl FrameSource for NflogSource {
    fn dispatch(&mut self, handler: &mut dyn FrameHandler) -> Result<Option<usize>, Error> {
        let n = match self.socket.recv(&mut self.buffer) {
            Ok(n) => n,
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                warn!("kernel log queue overrun, packets were lost");
                return Ok(Some(0));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Some(0)),
            Err(e) => return Err(Error::Io(e)),
        };
        trace!("received {} bytes", n);
        let delivered = dispatch_messages(&self.buffer[..n], now_us(), handler)?;
        Ok(Some(delivered))
    }
}

impl Drop for NflogSource {
    fn drop(&mut self) {
        debug!("unbinding from group {}", self.group);
        if let Err(e) = self.socket.notify(ConfigRequest::command(
            AF_UNSPEC,
            self.group,
            ConfigCommand::Unbind,
        )) {
            warn!("could not unbind group {}: {}", self.group, e);
        }
    }
}
