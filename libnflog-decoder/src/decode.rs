use libnflog_tools::CapturedFrame;
use pnet_base::MacAddr;
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::tcp::{self, TcpPacket};
use pnet_packet::udp::UdpPacket;
use thiserror::Error;
use tracing::trace;

use crate::record::{PacketRecord, TcpFlags, Transport};

/// Length of the two Ethernet addresses at the start of the link-layer header
const HW_ADDRS_LEN: usize = 12;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The logging subsystem delivered no payload for this frame
    #[error("no payload")]
    NoPayload,
    /// The payload ends before a header that must be read
    #[error("{layer}: truncated header (need {needed} bytes, have {available})")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },
    /// The payload does not start with an IPv4 header
    #[error("invalid IPv4 header (version {version}, ihl {ihl})")]
    BadHeader { version: u8, ihl: u8 },
}

fn link_addresses(hw_header: Option<&[u8]>) -> (Option<MacAddr>, Option<MacAddr>) {
    match hw_header {
        Some(h) if h.len() >= HW_ADDRS_LEN => (
            Some(MacAddr::new(h[0], h[1], h[2], h[3], h[4], h[5])),
            Some(MacAddr::new(h[6], h[7], h[8], h[9], h[10], h[11])),
        ),
        _ => (None, None),
    }
}

/// Decode a captured frame into a `PacketRecord`.
///
/// The payload must start with an IPv4 header. Every header read is bounds-checked:
/// a payload too short for the IPv4 header, or for the TCP/UDP header located by
/// `ihl`, is rejected with `DecodeError::Truncated` and no record is built.
pub fn decode_frame(frame: &CapturedFrame) -> Result<PacketRecord, DecodeError> {
    let payload = match frame.payload {
        Some(p) if !p.is_empty() => p,
        _ => return Err(DecodeError::NoPayload),
    };
    let (dst_mac, src_mac) = link_addresses(frame.hw_header);

    let ipv4 = Ipv4Packet::new(payload).ok_or(DecodeError::Truncated {
        layer: "IPv4",
        needed: Ipv4Packet::minimum_packet_size(),
        available: payload.len(),
    })?;
    let version = ipv4.get_version();
    let ihl = ipv4.get_header_length();
    if version != 4 || ihl < 5 {
        return Err(DecodeError::BadHeader { version, ihl });
    }
    let l4_offset = ihl as usize * 4;
    let l4_data = payload.get(l4_offset..).unwrap_or(&[]);
    trace!(
        "decode: payload len {}, ihl {}, l4 len {}",
        payload.len(),
        ihl,
        l4_data.len()
    );

    let l4_proto = ipv4.get_next_level_protocol();
    let transport = match l4_proto {
        IpNextHeaderProtocols::Tcp => {
            let segment = TcpPacket::new(l4_data).ok_or(DecodeError::Truncated {
                layer: "TCP",
                needed: l4_offset + TcpPacket::minimum_packet_size(),
                available: payload.len(),
            })?;
            let flags = segment.get_flags();
            Transport::Tcp {
                src_port: segment.get_source(),
                dst_port: segment.get_destination(),
                flags: TcpFlags {
                    syn: flags & tcp::TcpFlags::SYN != 0,
                    ack: flags & tcp::TcpFlags::ACK != 0,
                },
            }
        }
        IpNextHeaderProtocols::Udp => {
            let datagram = UdpPacket::new(l4_data).ok_or(DecodeError::Truncated {
                layer: "UDP",
                needed: l4_offset + UdpPacket::minimum_packet_size(),
                available: payload.len(),
            })?;
            Transport::Udp {
                src_port: datagram.get_source(),
                dst_port: datagram.get_destination(),
            }
        }
        _ => Transport::Other,
    };

    Ok(PacketRecord {
        timestamp_us: frame.timestamp_us,
        dst_mac,
        src_mac,
        hw_proto: frame.hw_protocol.unwrap_or(0),
        ip_total_len: ipv4.get_total_length(),
        src_ip: ipv4.get_source(),
        dst_ip: ipv4.get_destination(),
        ip_proto: l4_proto.0,
        transport,
    })
}
