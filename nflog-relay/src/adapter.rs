use std::io::Write;

use libnflog_decoder::decode_frame;
use libnflog_tools::{CapturedFrame, Error, FrameHandler};
use tracing::{debug, trace, warn};

use crate::relay::{RelaySession, RelayStats};

/// Frame handler forwarding every decodable frame to the session's consumer
pub struct CaptureAdapter<'a> {
    session: &'a mut RelaySession,
    stats: &'a mut RelayStats,
    echo: Option<&'a mut dyn Write>,
}

impl<'a> CaptureAdapter<'a> {
    pub fn new(session: &'a mut RelaySession, stats: &'a mut RelayStats) -> Self {
        CaptureAdapter {
            session,
            stats,
            echo: None,
        }
    }

    /// Also write every record to `out`, one per line. Write errors are logged only.
    pub fn with_echo(mut self, out: &'a mut dyn Write) -> Self {
        self.echo = Some(out);
        self
    }
}

impl FrameHandler for CaptureAdapter<'_> {
    fn handle_frame(&mut self, frame: &CapturedFrame) -> Result<(), Error> {
        let record = match decode_frame(frame) {
            Ok(record) => record,
            Err(e) => {
                debug!("frame dropped: {}", e);
                self.stats.decode_errors += 1;
                return Ok(());
            }
        };
        if !self.session.is_attached() {
            trace!("no consumer, record dropped");
            self.stats.frames_dropped += 1;
            return Ok(());
        }
        let wire = record.to_wire();
        if let Some(out) = self.echo.as_mut() {
            if let Err(e) = out.write_all(&wire).and_then(|()| out.write_all(b"\n")) {
                debug!("could not echo record: {}", e);
            }
        }
        match self.session.send(&wire) {
            Ok(()) => self.stats.records_sent += 1,
            Err(e) => {
                warn!("{}", e);
                self.stats.frames_dropped += 1;
            }
        }
        Ok(())
    }
}
