//! NFLOG records
//!
//! The body of an nfnetlink_log packet message (`struct nfgenmsg` then type-length-value
//! attributes) and a capture record with link type `NFLOG` share one layout, so both
//! frame sources parse it here with `pcap_parser::data::parse_nflog`.

use pcap_parser::data::{parse_nflog, NfAttrType, NflogPacket};

use crate::frame::{timestamp_us, CapturedFrame};

const AF_INET: u8 = 2;

fn be_u16(v: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes(v.get(..2)?.try_into().ok()?))
}

fn be_u32(v: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(v.get(..4)?.try_into().ok()?))
}

fn be_u64(v: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(v.get(..8)?.try_into().ok()?))
}

fn prefix_str(v: &[u8]) -> Option<&str> {
    let end = v.iter().position(|&b| b == 0).unwrap_or(v.len());
    std::str::from_utf8(&v[..end]).ok()
}

/// Build a frame from a parsed NFLOG packet.
///
/// `default_ts_us` is used when the kernel did not attach a timestamp, which is the
/// common case for locally generated packets.
pub fn frame_from_nflog_packet<'a>(nf: &NflogPacket<'a>, default_ts_us: u64) -> CapturedFrame<'a> {
    let mut frame = CapturedFrame {
        timestamp_us: default_ts_us,
        ..CapturedFrame::default()
    };
    let mut hw_len = None;
    // walk the attributes directly: values keep the lifetime of the input buffer
    for tlv in &nf.data {
        let v = tlv.v;
        match tlv.t {
            // struct nfulnl_msg_packet_hdr { __be16 hw_protocol; __u8 hook; __u8 _pad; }
            t if t == NfAttrType::PacketHdr as u16 => frame.hw_protocol = be_u16(v),
            // struct nfulnl_msg_packet_timestamp { __be64 sec; __be64 usec; }
            t if t == NfAttrType::Timestamp as u16 => {
                if let (Some(sec), Some(usec)) = (be_u64(v), v.get(8..).and_then(be_u64)) {
                    frame.timestamp_us = timestamp_us(sec, usec);
                }
            }
            t if t == NfAttrType::IfIndexInDev as u16 => frame.indev = be_u32(v),
            t if t == NfAttrType::IfIndexOutDev as u16 => frame.outdev = be_u32(v),
            t if t == NfAttrType::Payload as u16 => frame.payload = Some(v),
            t if t == NfAttrType::Prefix as u16 => frame.prefix = prefix_str(v),
            t if t == NfAttrType::HwHeader as u16 => frame.hw_header = Some(v),
            t if t == NfAttrType::HwLen as u16 => hw_len = be_u16(v),
            _ => (),
        }
    }
    if let (Some(hdr), Some(len)) = (frame.hw_header, hw_len) {
        frame.hw_header = Some(&hdr[..(len as usize).min(hdr.len())]);
    }
    frame
}

/// Build a frame from an NFLOG header followed by its attributes: one capture record
/// with link type `NFLOG`, or the body of one live packet message.
///
/// Returns `None` if the data is too short to hold the NFLOG header. Parsing stops at
/// the first malformed attribute; the attributes before it are kept.
pub fn frame_from_nflog_record(data: &[u8], default_ts_us: u64) -> Option<CapturedFrame<'_>> {
    match parse_nflog(data) {
        Ok((rem, nf)) => {
            if nf.header.af != AF_INET {
                debug!("NFLOG record with address family {}", nf.header.af);
            }
            if !rem.is_empty() {
                warn!(
                    "NFLOG record: {} trailing bytes after {} attributes",
                    rem.len(),
                    nf.data.len()
                );
            }
            Some(frame_from_nflog_packet(&nf, default_ts_us))
        }
        Err(e) => {
            debug!("could not parse NFLOG record ({} bytes): {:?}", data.len(), e);
            None
        }
    }
}
