#[macro_use]
extern crate log;

mod config;
mod error;
mod frame;
mod handler;
pub mod nflog;
mod replay;

pub use config::Config;
pub use error::*;
pub use frame::*;
pub use handler::*;
pub use replay::PcapReplaySource;

pub use pcap_parser;
