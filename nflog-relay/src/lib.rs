//! Single-consumer relay of NFLOG packet records over a Unix datagram socket
//!
//! The relay binds a well-known socket path and waits for one consumer to send a
//! handshake datagram. Every decoded frame is then sent to that consumer as one
//! text line (see `libnflog_decoder::PacketRecord`). When a send fails, the session
//! is dropped and the relay waits for the next consumer.

mod adapter;
mod client;
mod relay;

pub use adapter::CaptureAdapter;
pub use client::*;
pub use relay::*;
