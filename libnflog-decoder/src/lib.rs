//! Decoding of logged frames into packet records, and their wire rendering

mod decode;
mod format;
mod record;
#[cfg(test)]
mod testutils;

pub use decode::{decode_frame, DecodeError};
pub use record::{PacketRecord, TcpFlags, Transport};

pub use pnet_base::MacAddr;
