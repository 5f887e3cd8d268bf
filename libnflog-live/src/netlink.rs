//! nfnetlink_log over a `NETLINK_NETFILTER` socket
//!
//! Configuration requests are inner messages of `netlink-packet-core`, their attributes
//! are `netlink-packet-utils` NLAs, and the socket is a `netlink-sys` socket.

use std::io;

use netlink_packet_core::{
    NetlinkBuffer, NetlinkDeserializable, NetlinkHeader, NetlinkMessage, NetlinkPayload,
    NetlinkSerializable, NLM_F_ACK, NLM_F_REQUEST,
};
use netlink_packet_utils::nla::{Nla, NlasIterator};
use netlink_packet_utils::traits::Emitable;
use netlink_sys::{protocols::NETLINK_NETFILTER, Socket, SocketAddr};
use thiserror::Error;
use tracing::{debug, trace};

pub use netlink_packet_core::{NLMSG_DONE, NLMSG_ERROR, NLMSG_NOOP, NLMSG_OVERRUN};

const NFNL_SUBSYS_ULOG: u16 = 4;
const NFNETLINK_V0: u8 = 0;
/// `struct nfgenmsg`: family, version, resource id
const NFGENMSG_LEN: usize = 4;

/// Message type of logged packets
pub const NFULNL_MSG_PACKET: u16 = NFNL_SUBSYS_ULOG << 8;
/// Message type of configuration requests
pub const NFULNL_MSG_CONFIG: u16 = (NFNL_SUBSYS_ULOG << 8) | 1;

const NFULA_CFG_CMD: u16 = 1;
const NFULA_CFG_MODE: u16 = 2;

/// Receive buffer used while waiting for an acknowledgement
const ACK_BUFFER_LEN: usize = 8192;

/// Configuration commands (`NFULNL_CFG_CMD_*`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigCommand {
    Bind = 1,
    Unbind = 2,
    PfBind = 3,
    PfUnbind = 4,
}

impl ConfigCommand {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ConfigCommand::Bind),
            2 => Some(ConfigCommand::Unbind),
            3 => Some(ConfigCommand::PfBind),
            4 => Some(ConfigCommand::PfUnbind),
            _ => None,
        }
    }
}

/// Copy modes (`NFULNL_COPY_*`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CopyMode {
    None = 0,
    Meta = 1,
    Packet = 2,
}

impl CopyMode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CopyMode::None),
            1 => Some(CopyMode::Meta),
            2 => Some(CopyMode::Packet),
            _ => None,
        }
    }
}

/// The attribute carried by a configuration request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigAttribute {
    Command(ConfigCommand),
    /// `struct nfulnl_msg_config_mode { __be32 copy_range; __u8 copy_mode; __u8 _pad; }`
    Mode { mode: CopyMode, range: u32 },
}

impl Nla for ConfigAttribute {
    fn value_len(&self) -> usize {
        match self {
            ConfigAttribute::Command(_) => 1,
            ConfigAttribute::Mode { .. } => 6,
        }
    }

    fn kind(&self) -> u16 {
        match self {
            ConfigAttribute::Command(_) => NFULA_CFG_CMD,
            ConfigAttribute::Mode { .. } => NFULA_CFG_MODE,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match *self {
            ConfigAttribute::Command(cmd) => buffer[0] = cmd as u8,
            ConfigAttribute::Mode { mode, range } => {
                buffer[..4].copy_from_slice(&range.to_be_bytes());
                buffer[4] = mode as u8;
                buffer[5] = 0;
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigDecodeError {
    #[error("not a config message (type 0x{0:x})")]
    MessageType(u16),
    #[error("config message too short ({0} bytes)")]
    Truncated(usize),
    #[error("malformed config attribute: {0}")]
    Attribute(String),
    #[error("config message without a known attribute")]
    NoAttribute,
}

/// One configuration request of the logging subsystem (`NFULNL_MSG_CONFIG`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigRequest {
    /// Protocol family for `PfBind`/`PfUnbind`, `AF_UNSPEC` otherwise
    pub family: u8,
    /// Resource id: the NFLOG group, in network order on the wire
    pub group: u16,
    pub attribute: ConfigAttribute,
}

impl ConfigRequest {
    pub fn command(family: u8, group: u16, cmd: ConfigCommand) -> Self {
        ConfigRequest {
            family,
            group,
            attribute: ConfigAttribute::Command(cmd),
        }
    }

    pub fn copy_mode(family: u8, group: u16, mode: CopyMode, range: u32) -> Self {
        ConfigRequest {
            family,
            group,
            attribute: ConfigAttribute::Mode { mode, range },
        }
    }
}

impl NetlinkSerializable for ConfigRequest {
    fn message_type(&self) -> u16 {
        NFULNL_MSG_CONFIG
    }

    fn buffer_len(&self) -> usize {
        NFGENMSG_LEN + self.attribute.buffer_len()
    }

    fn serialize(&self, buffer: &mut [u8]) {
        buffer[0] = self.family;
        buffer[1] = NFNETLINK_V0;
        buffer[2..NFGENMSG_LEN].copy_from_slice(&self.group.to_be_bytes());
        self.attribute.emit(&mut buffer[NFGENMSG_LEN..]);
    }
}

impl NetlinkDeserializable for ConfigRequest {
    type Error = ConfigDecodeError;

    fn deserialize(header: &NetlinkHeader, payload: &[u8]) -> Result<Self, Self::Error> {
        if header.message_type != NFULNL_MSG_CONFIG {
            return Err(ConfigDecodeError::MessageType(header.message_type));
        }
        if payload.len() < NFGENMSG_LEN {
            return Err(ConfigDecodeError::Truncated(payload.len()));
        }
        let family = payload[0];
        let group = u16::from_be_bytes([payload[2], payload[3]]);
        for nla in NlasIterator::new(&payload[NFGENMSG_LEN..]) {
            let nla = nla.map_err(|e| ConfigDecodeError::Attribute(format!("{e:?}")))?;
            let value = nla.value();
            let attribute = match nla.kind() {
                NFULA_CFG_CMD => value
                    .first()
                    .and_then(|&c| ConfigCommand::from_u8(c))
                    .map(ConfigAttribute::Command),
                NFULA_CFG_MODE => match value {
                    [r0, r1, r2, r3, mode, ..] => {
                        CopyMode::from_u8(*mode).map(|mode| ConfigAttribute::Mode {
                            mode,
                            range: u32::from_be_bytes([*r0, *r1, *r2, *r3]),
                        })
                    }
                    _ => None,
                },
                _ => None,
            };
            if let Some(attribute) = attribute {
                return Ok(ConfigRequest {
                    family,
                    group,
                    attribute,
                });
            }
        }
        Err(ConfigDecodeError::NoAttribute)
    }
}

/// Encode `request` as one netlink message
pub fn encode_request(seq: u32, flags: u16, request: ConfigRequest) -> Vec<u8> {
    let mut header = NetlinkHeader::default();
    header.flags = flags;
    header.sequence_number = seq;
    let mut message = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(request));
    message.finalize();
    let mut buf = vec![0; message.buffer_len()];
    message.serialize(&mut buf[..]);
    buf
}

/// Iterator over the messages of one datagram.
///
/// Each item covers exactly one message. Iteration stops at the first truncated header.
pub struct Messages<'a> {
    data: &'a [u8],
}

impl<'a> Messages<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Messages { data }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = NetlinkBuffer<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match NetlinkBuffer::new_checked(self.data) {
            Ok(buf) => {
                let len = buf.length() as usize;
                let message = &self.data[..len];
                // NLMSG_ALIGN
                let next = ((len + 3) & !3).min(self.data.len());
                self.data = &self.data[next..];
                Some(NetlinkBuffer::new(message))
            }
            Err(e) => {
                debug!(
                    "truncated netlink message ({} bytes left): {:?}",
                    self.data.len(),
                    e
                );
                self.data = &[];
                None
            }
        }
    }
}

/// Outcome carried by an `NLMSG_ERROR` message: `Ok` for an acknowledgement.
///
/// Returns `None` for any other message.
pub fn ack_result(message: NetlinkBuffer<&[u8]>) -> Option<io::Result<()>> {
    if message.message_type() != NLMSG_ERROR {
        return None;
    }
    match NetlinkMessage::<ConfigRequest>::deserialize(message.into_inner()) {
        Ok(msg) => match msg.payload {
            NetlinkPayload::Error(e) => Some(match e.code {
                None => Ok(()),
                Some(code) => Err(io::Error::from_raw_os_error(-code.get())),
            }),
            _ => None,
        },
        Err(e) => {
            debug!("could not parse netlink error message: {:?}", e);
            None
        }
    }
}

/// A `NETLINK_NETFILTER` socket, connected to the kernel
pub struct NetlinkSocket {
    socket: Socket,
    seq: u32,
}

impl NetlinkSocket {
    pub fn open() -> io::Result<NetlinkSocket> {
        let mut socket = Socket::new(NETLINK_NETFILTER)?;
        let addr = socket.bind_auto()?;
        socket.connect(&SocketAddr::new(0, 0))?;
        debug!("netlink socket bound to port {}", addr.port_number());
        Ok(NetlinkSocket { socket, seq: 0 })
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        self.socket
            .set_rx_buf_sz(i32::try_from(size).unwrap_or(i32::MAX))
    }

    /// Receive one datagram into `buf`, replacing its content. Blocks until data is available.
    ///
    /// At most `buf.capacity()` bytes are read.
    pub fn recv(&self, buf: &mut Vec<u8>) -> io::Result<usize> {
        buf.clear();
        self.socket.recv(buf, 0)
    }

    fn send(&mut self, request: ConfigRequest, flags: u16) -> io::Result<u32> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        trace!("request {}: {:?}", seq, request);
        self.socket.send(&encode_request(seq, flags, request), 0)?;
        Ok(seq)
    }

    /// Send a configuration request and wait for the kernel acknowledgement
    pub fn request(&mut self, request: ConfigRequest) -> io::Result<()> {
        let seq = self.send(request, NLM_F_REQUEST | NLM_F_ACK)?;
        let mut buf = Vec::with_capacity(ACK_BUFFER_LEN);
        loop {
            let n = self.recv(&mut buf)?;
            for message in Messages::new(&buf[..n]) {
                if message.sequence_number() != seq {
                    trace!(
                        "ignoring message type 0x{:x} while waiting for ack {}",
                        message.message_type(),
                        seq
                    );
                    continue;
                }
                if let Some(result) = ack_result(message) {
                    return result;
                }
            }
        }
    }

    /// Send a configuration request without asking for an acknowledgement
    pub fn notify(&mut self, request: ConfigRequest) -> io::Result<()> {
        self.send(request, NLM_F_REQUEST).map(|_| ())
    }
}
