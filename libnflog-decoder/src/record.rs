use std::net::Ipv4Addr;

use pnet_base::MacAddr;

/// TCP flags carried by a record. Only SYN and ACK are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
}

/// Transport layer fields, depending on the IP protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp {
        src_port: u16,
        dst_port: u16,
        flags: TcpFlags,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
    },
    /// Any other protocol: no transport fields
    Other,
}

impl Transport {
    /// Source and destination ports, for TCP and UDP
    pub fn ports(&self) -> Option<(u16, u16)> {
        match *self {
            Transport::Tcp {
                src_port, dst_port, ..
            }
            | Transport::Udp { src_port, dst_port } => Some((src_port, dst_port)),
            Transport::Other => None,
        }
    }
}

/// Metadata extracted from one captured frame
///
/// A record is entirely determined by the frame it was decoded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketRecord {
    /// Capture time, in microseconds since the epoch
    pub timestamp_us: u64,
    pub dst_mac: Option<MacAddr>,
    pub src_mac: Option<MacAddr>,
    /// Link-layer protocol, host order (0 if unknown)
    pub hw_proto: u16,
    /// IPv4 total length
    pub ip_total_len: u16,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    /// IANA protocol number
    pub ip_proto: u8,
    pub transport: Transport,
}
