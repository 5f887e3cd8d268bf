//! Relay wire format
//!
//! One record renders as a single line of space-separated `key=value` fields, always
//! in the same order:
//!
//! ```text
//! t=<us> dst_hw=<mac|N/A> src_hw=<mac|N/A> hw=0x<hhhh> len=<n> src_addr=<ip> dst_addr=<ip> proto=<n>
//! ```
//!
//! followed by ` src_port=<n> dst_port=<n>` for TCP and UDP, and ` flags=<...>` for TCP.
//! The downstream manager splits on spaces and `=`, so the text must not change.

use std::fmt;

use pnet_base::MacAddr;

use crate::record::{PacketRecord, TcpFlags, Transport};

const NOT_AVAILABLE: &str = "N/A";

struct HwAddr(Option<MacAddr>);

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(mac) => write!(f, "{mac}"),
            None => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// `syn,` then `ack`: SYN alone keeps its trailing comma
impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.syn {
            f.write_str("syn,")?;
        }
        if self.ack {
            f.write_str("ack")?;
        }
        Ok(())
    }
}

impl fmt::Display for PacketRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "t={} dst_hw={} src_hw={} hw=0x{:04x} len={} src_addr={} dst_addr={} proto={}",
            self.timestamp_us,
            HwAddr(self.dst_mac),
            HwAddr(self.src_mac),
            self.hw_proto,
            self.ip_total_len,
            self.src_ip,
            self.dst_ip,
            self.ip_proto
        )?;
        match self.transport {
            Transport::Tcp {
                src_port,
                dst_port,
                flags,
            } => write!(f, " src_port={src_port} dst_port={dst_port} flags={flags}"),
            Transport::Udp { src_port, dst_port } => {
                write!(f, " src_port={src_port} dst_port={dst_port}")
            }
            Transport::Other => Ok(()),
        }
    }
}

impl PacketRecord {
    /// Bytes sent to the consumer: the rendered line, without newline
    pub fn to_wire(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}
