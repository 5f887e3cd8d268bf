use std::time::{SystemTime, UNIX_EPOCH};

pub const MICROS_PER_SEC: u64 = 1_000_000;

/// One packet delivery from the logging subsystem.
///
/// All slices borrow the receive buffer of the frame source, so a frame only lives
/// for the duration of one `FrameHandler::handle_frame` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapturedFrame<'a> {
    /// Network layer data, starting at the IP header. `None` if no payload was delivered
    pub payload: Option<&'a [u8]>,
    /// Raw link-layer header, if the kernel provided one
    pub hw_header: Option<&'a [u8]>,
    /// Link-layer protocol (host order), from the NFLOG packet header
    pub hw_protocol: Option<u16>,
    /// Ingress interface index
    pub indev: Option<u32>,
    /// Egress interface index
    pub outdev: Option<u32>,
    /// Capture time, in microseconds since the epoch
    pub timestamp_us: u64,
    /// Log prefix set by the firewall rule
    pub prefix: Option<&'a str>,
}

/// Convert a (seconds, microseconds) pair to microseconds
#[inline]
pub fn timestamp_us(secs: u64, micros: u64) -> u64 {
    secs.wrapping_mul(MICROS_PER_SEC).wrapping_add(micros)
}

/// Current wall clock time, in microseconds since the epoch
pub fn now_us() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => timestamp_us(d.as_secs(), u64::from(d.subsec_micros())),
        Err(_) => 0,
    }
}
