//! Frame builders for tests

use libnflog_tools::CapturedFrame;

pub const TS: u64 = 1_700_000_000_123_456;

pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;

pub const ETH_HEADER: [u8; 14] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
];

pub fn frame<'a>(payload: &'a [u8], hw_header: Option<&'a [u8]>) -> CapturedFrame<'a> {
    CapturedFrame {
        payload: Some(payload),
        hw_header,
        hw_protocol: Some(0x0800),
        indev: Some(2),
        outdev: None,
        timestamp_us: TS,
        prefix: None,
    }
}

pub fn ipv4_header(proto: u8, src: [u8; 4], dst: [u8; 4], l4: &[u8]) -> Vec<u8> {
    let total_len = (20 + l4.len()) as u16;
    let mut v = vec![0x45, 0x00];
    v.extend_from_slice(&total_len.to_be_bytes());
    v.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, proto, 0x00, 0x00]);
    v.extend_from_slice(&src);
    v.extend_from_slice(&dst);
    v.extend_from_slice(l4);
    v
}

pub fn ipv4_tcp(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, flags: u8) -> Vec<u8> {
    let mut tcp = Vec::new();
    tcp.extend_from_slice(&sport.to_be_bytes());
    tcp.extend_from_slice(&dport.to_be_bytes());
    tcp.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0, 0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
    ipv4_header(6, src, dst, &tcp)
}

pub fn ipv4_udp(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
    let mut udp = Vec::new();
    udp.extend_from_slice(&sport.to_be_bytes());
    udp.extend_from_slice(&dport.to_be_bytes());
    udp.extend_from_slice(&[0, 8, 0, 0]);
    ipv4_header(17, src, dst, &udp)
}
