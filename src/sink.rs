//! Render-sink contract for decoded frames.

use std::path::{Path, PathBuf};

use crate::decode::DecodedFrame;
use crate::error::VidpaceError;

/// Final consumer of decoded frames.
///
/// Runs on the playback thread, so implementations must be [`Send`].
pub trait FrameSink: Send {
    /// Take ownership of one decoded frame.
    ///
    /// # Errors
    ///
    /// A failing sink is treated like a failed decode: the frame is counted
    /// as skipped and playback continues.
    fn accept_frame(&mut self, frame: DecodedFrame) -> Result<(), VidpaceError>;
}

/// Counts frames and drops them.
#[derive(Debug, Default)]
pub struct NullSink {
    accepted: u64,
}

impl NullSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}

impl FrameSink for NullSink {
    fn accept_frame(&mut self, _frame: DecodedFrame) -> Result<(), VidpaceError> {
        self.accepted += 1;
        Ok(())
    }
}

/// Writes every `every`-th frame to `directory` as `frame_NNNNNN.png`.
#[derive(Debug)]
pub struct ImageSequenceSink {
    directory: PathBuf,
    every: u64,
    seen: u64,
    written: Vec<PathBuf>,
}

impl ImageSequenceSink {
    /// Create `directory` if needed. `every` is clamped to at least 1.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::IoError`] if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(directory: P, every: u64) -> Result<Self, VidpaceError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            every: every.max(1),
            seen: 0,
            written: Vec::new(),
        })
    }

    /// Paths written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl FrameSink for ImageSequenceSink {
    fn accept_frame(&mut self, frame: DecodedFrame) -> Result<(), VidpaceError> {
        let position = self.seen;
        self.seen += 1;
        if position % self.every != 0 {
            return Ok(());
        }

        let path = self.directory.join(format!("frame_{:06}.png", frame.index));
        frame.image.save(&path)?;
        log::debug!("Wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }
}
