use std::io::Read;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};

use crate::config::Config;
use crate::error::Error;
use crate::frame::timestamp_us;
use crate::handler::{FrameHandler, FrameSource};
use crate::nflog::frame_from_nflog_record;

/// Frame source reading a capture file recorded on an NFLOG group
///
/// The input must be a legacy pcap file with link type `NFLOG` (239), as written by
/// `tcpdump -i nflog:<group> -w <file>`. Records using another link type and pcap-ng
/// blocks are skipped.
pub struct PcapReplaySource {
    reader: Box<dyn PcapReaderIterator + Send>,
    link_type: Option<Linktype>,
    nanosecond_precision: bool,
    block_index: usize,
    last_incomplete_index: usize,
}

impl PcapReplaySource {
    pub fn new<R: Read + Send + 'static>(input: R, config: &Config) -> Result<Self, Error> {
        let capacity = config
            .get_usize("buffer_initial_capacity")
            .unwrap_or(128 * 1024);
        let reader =
            pcap_parser::create_reader(capacity, input).map_err(|e| Error::Pcap(e.to_owned_vec()))?;
        Ok(PcapReplaySource {
            reader,
            link_type: None,
            nanosecond_precision: false,
            block_index: 0,
            last_incomplete_index: 0,
        })
    }

    /// Number of pcap blocks read so far
    pub fn block_index(&self) -> usize {
        self.block_index
    }
}

impl FrameSource for PcapReplaySource {
    fn dispatch(&mut self, handler: &mut dyn FrameHandler) -> Result<Option<usize>, Error> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    self.block_index += 1;
                    let mut delivered = 0;
                    match block {
                        PcapBlockOwned::LegacyHeader(ref hdr) => {
                            if hdr.network != Linktype::NFLOG {
                                warn!(
                                    "Capture link type is {}, expected NFLOG: records will be skipped",
                                    hdr.network
                                );
                            }
                            self.link_type = Some(hdr.network);
                            self.nanosecond_precision = hdr.is_nanosecond_precision();
                        }
                        PcapBlockOwned::Legacy(ref b) => {
                            if self.link_type == Some(Linktype::NFLOG) {
                                let caplen = (b.caplen as usize).min(b.data.len());
                                let micros = if self.nanosecond_precision {
                                    b.ts_usec / 1000
                                } else {
                                    b.ts_usec
                                };
                                let ts = timestamp_us(u64::from(b.ts_sec), u64::from(micros));
                                match frame_from_nflog_record(&b.data[..caplen], ts) {
                                    Some(frame) => {
                                        handler.handle_frame(&frame)?;
                                        delivered = 1;
                                    }
                                    None => warn!(
                                        "NFLOG record too short (block_index={})",
                                        self.block_index
                                    ),
                                }
                            }
                        }
                        _ => {
                            warn!("pcap-ng block ignored (block_index={})", self.block_index);
                        }
                    }
                    self.reader.consume(offset);
                    if delivered > 0 {
                        return Ok(Some(delivered));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete { .. }) => {
                    if self.last_incomplete_index == self.block_index {
                        warn!(
                            "Could not read complete data block (block_index={})",
                            self.block_index
                        );
                        warn!("Hint: the reader buffer size may be too small, or the input file may be truncated.");
                        return Ok(None);
                    }
                    self.last_incomplete_index = self.block_index;
                    debug!("need refill");
                    self.reader.refill().map_err(|e| e.to_owned_vec())?;
                }
                Err(e) => {
                    let e = e.to_owned_vec();
                    error!("error while reading: {:?}", e);
                    return Err(Error::Pcap(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CapturedFrame;
    use crate::nflog::tests::put_attribute;
    use pcap_parser::data::NfAttrType;
    use std::io::Cursor;

    #[derive(Default)]
    struct Collector {
        frames: Vec<(u64, Option<u16>, Vec<u8>)>,
    }

    impl FrameHandler for Collector {
        fn handle_frame(&mut self, frame: &CapturedFrame) -> Result<(), Error> {
            self.frames.push((
                frame.timestamp_us,
                frame.hw_protocol,
                frame.payload.unwrap_or_default().to_vec(),
            ));
            Ok(())
        }
    }

    fn pcap_file(link_type: u32, records: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&link_type.to_le_bytes());
        for (sec, usec, data) in records {
            out.extend_from_slice(&sec.to_le_bytes());
            out.extend_from_slice(&usec.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    fn nflog_record(payload: &[u8]) -> Vec<u8> {
        let mut record = vec![2, 0, 0, 7];
        put_attribute(&mut record, NfAttrType::PacketHdr, &[0x08, 0x00, 0x03, 0x00]);
        put_attribute(&mut record, NfAttrType::Payload, payload);
        record
    }

    #[test]
    fn replay_delivers_one_frame_per_dispatch() {
        let file = pcap_file(
            239,
            &[
                (10, 1, nflog_record(&[0x45, 1])),
                (11, 2, nflog_record(&[0x45, 2])),
            ],
        );
        let mut source =
            PcapReplaySource::new(Cursor::new(file), &Config::default()).expect("pcap header");
        let mut collector = Collector::default();
        assert_eq!(source.dispatch(&mut collector).expect("first"), Some(1));
        assert_eq!(source.dispatch(&mut collector).expect("second"), Some(1));
        assert_eq!(source.dispatch(&mut collector).expect("eof"), None);
        assert_eq!(
            collector.frames,
            vec![
                (10_000_001, Some(0x0800), vec![0x45, 1]),
                (11_000_002, Some(0x0800), vec![0x45, 2]),
            ]
        );
    }

    #[test]
    fn replay_skips_other_link_types() {
        // LINKTYPE_ETHERNET
        let file = pcap_file(1, &[(10, 1, vec![0; 60])]);
        let mut source =
            PcapReplaySource::new(Cursor::new(file), &Config::default()).expect("pcap header");
        let mut collector = Collector::default();
        assert_eq!(source.dispatch(&mut collector).expect("eof"), None);
        assert!(collector.frames.is_empty());
    }

    #[test]
    fn replay_rejects_garbage() {
        let res = PcapReplaySource::new(Cursor::new(vec![0u8; 64]), &Config::default());
        assert!(matches!(res, Err(Error::Pcap(PcapError::HeaderNotRecognized))));
    }
}
