//! Live capture of packets logged by netfilter (`NFLOG` target)
//!
//! `NflogSource` talks nfnetlink_log over a `netlink-sys` `NETLINK_NETFILTER` socket.
//! Reading from it requires `CAP_NET_ADMIN`.

mod interface;
pub mod netlink;
mod source;

pub use interface::interface_name;
pub use source::*;
