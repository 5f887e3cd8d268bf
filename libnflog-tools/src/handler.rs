use crate::error::Error;
use crate::frame::CapturedFrame;

/// Common trait for consumers of logged frames
pub trait FrameHandler {
    /// Callback function for every frame delivered by the logging subsystem
    fn handle_frame(&mut self, frame: &CapturedFrame) -> Result<(), Error>;
}

/// A producer of logged frames (live netlink socket, capture file, ...)
pub trait FrameSource {
    /// Block until the next message arrives, and pass every frame it carries to `handler`.
    ///
    /// Returns the number of frames delivered, or `None` once the source is exhausted.
    /// A live source never returns `None`.
    fn dispatch(&mut self, handler: &mut dyn FrameHandler) -> Result<Option<usize>, Error>;
}
