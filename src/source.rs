//! Random-access byte sources.
//!
//! The demultiplexer never touches a file or socket directly. It reads
//! through [`ByteSource`], a three-operation contract (`size`, `read_at`,
//! `seek`) with one adapter per backing store:
//!
//! - [`MemorySource`]: a fully buffered blob, reads are slices.
//! - [`FileSource`]: a local file read with positioned `std::fs` reads.
//! - `HttpSource` (feature `http`): one ranged GET per read.
//!
//! Reads past the end of data, or after a failed fetch, return
//! [`ReadOutcome::End`] instead of an error so the consuming loop can stop
//! gracefully.
//!
//! [`open_source`] turns a [`SourceDescriptor`] into a boxed source and
//! switches to full in-memory buffering whenever the total size is known and
//! at or below the configured ceiling.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::configuration::PipelineOptions;
use crate::error::VidpaceError;
use crate::format::{self, ContainerFormat};

/// Default in-memory buffering ceiling (200 MiB).
pub const DEFAULT_BUFFER_CEILING: u64 = 200 * 1024 * 1024;

/// Locator for the bytes of one container file.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    /// A fully buffered blob. `name` stands in for a file name when the
    /// container format is selected, so `"clip.mp4"` opens as ISO-BMFF.
    Buffer {
        /// The container bytes.
        bytes: Vec<u8>,
        /// File name or URL the bytes came from, if any.
        name: Option<String>,
    },
    /// A local file path.
    File(PathBuf),
    /// A remote URL, fetched in byte ranges. `size` skips the size probe.
    Remote {
        /// HTTP(S) URL.
        url: String,
        /// Total size if already known.
        size: Option<u64>,
    },
}

impl SourceDescriptor {
    /// A buffer carrying the name it will be demuxed under.
    pub fn named_buffer(bytes: Vec<u8>, name: impl Into<String>) -> Self {
        SourceDescriptor::Buffer {
            bytes,
            name: Some(name.into()),
        }
    }

    /// Human-readable locator used in errors and for format selection.
    pub fn locator(&self) -> String {
        match self {
            SourceDescriptor::Buffer { name: Some(name), .. } => name.clone(),
            SourceDescriptor::Buffer { name: None, .. } => "<memory>".to_string(),
            SourceDescriptor::File(path) => path.display().to_string(),
            SourceDescriptor::Remote { url, .. } => url.clone(),
        }
    }

    /// Container grammar chosen from [`locator`](Self::locator).
    pub fn container_format(&self) -> ContainerFormat {
        format::select(&self.locator())
    }
}

impl From<Vec<u8>> for SourceDescriptor {
    fn from(bytes: Vec<u8>) -> Self {
        SourceDescriptor::Buffer { bytes, name: None }
    }
}

impl From<PathBuf> for SourceDescriptor {
    fn from(path: PathBuf) -> Self {
        SourceDescriptor::File(path)
    }
}

/// Result of a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written into the front of the buffer (`n > 0`).
    Filled(usize),
    /// No more data: end of source, or the source has failed.
    End,
}

/// Random-access byte supplier.
///
/// `size` is fixed once the source is constructed. `seek` repositions the
/// sequential cursor used by [`read_next`](ByteSource::read_next); it does
/// not affect [`read_at`](ByteSource::read_at).
pub trait ByteSource: Send {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ReadOutcome;

    /// Move the sequential cursor. Offsets past the end are clamped.
    fn seek(&mut self, offset: u64);

    /// Current position of the sequential cursor.
    fn position(&self) -> u64;

    /// Read from the cursor and advance it by the number of bytes read.
    fn read_next(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let position = self.position();
        let outcome = self.read_at(position, buf);
        if let ReadOutcome::Filled(count) = outcome {
            self.seek(position + count as u64);
        }
        outcome
    }
}

/// Number of bytes available in `[offset, size)`, capped at `wanted`.
fn span(size: u64, offset: u64, wanted: usize) -> usize {
    if offset >= size {
        return 0;
    }
    (size - offset).min(wanted as u64) as usize
}

/// A fully buffered source.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    position: u64,
}

impl MemorySource {
    /// Wrap an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ReadOutcome {
        let count = span(self.size(), offset, buf.len());
        if count == 0 {
            return ReadOutcome::End;
        }
        let start = offset as usize;
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        ReadOutcome::Filled(count)
    }

    fn seek(&mut self, offset: u64) {
        self.position = offset.min(self.size());
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// A local file read on demand.
///
/// Used only for files above the buffering ceiling.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    size: u64,
    position: u64,
    failed: bool,
}

impl FileSource {
    /// Open `path` and record its size.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::SourceUnavailable`] if the file cannot be
    /// opened or its metadata cannot be read.
    pub fn open(path: PathBuf) -> Result<Self, VidpaceError> {
        let unavailable = |error: std::io::Error| VidpaceError::SourceUnavailable {
            locator: path.display().to_string(),
            reason: error.to_string(),
        };
        let file = File::open(&path).map_err(unavailable)?;
        let size = file.metadata().map_err(unavailable)?.len();
        Ok(Self {
            file,
            path,
            size,
            position: 0,
            failed: false,
        })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ReadOutcome {
        if self.failed {
            return ReadOutcome::End;
        }
        let count = span(self.size, offset, buf.len());
        if count == 0 {
            return ReadOutcome::End;
        }

        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read(&mut buf[..count]));
        match result {
            Ok(0) => ReadOutcome::End,
            Ok(read) => ReadOutcome::Filled(read),
            Err(error) => {
                log::warn!("Read of {} at {offset} failed: {error}", self.path.display());
                self.failed = true;
                ReadOutcome::End
            }
        }
    }

    fn seek(&mut self, offset: u64) {
        self.position = offset.min(self.size);
    }

    fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(feature = "http")]
pub use crate::http::HttpSource;

/// Open the source named by `descriptor`.
///
/// Sources whose size is known and at or below
/// [`PipelineOptions::with_buffer_ceiling`] are read fully into a
/// [`MemorySource`].
///
/// # Errors
///
/// Returns [`VidpaceError::SourceUnavailable`] when the size probe or the
/// initial read fails, or when the source is empty. Sources left unbuffered
/// are read once at offset zero before they are returned.
pub fn open_source(
    descriptor: SourceDescriptor,
    options: &PipelineOptions,
) -> Result<Box<dyn ByteSource>, VidpaceError> {
    let locator = descriptor.locator();
    let ceiling = options.buffer_ceiling;

    let source: Box<dyn ByteSource> = match descriptor {
        SourceDescriptor::Buffer { bytes, .. } => Box::new(MemorySource::new(bytes)),
        SourceDescriptor::File(path) => {
            let mut file = FileSource::open(path.clone())?;
            if file.size() <= ceiling {
                log::debug!("Buffering {} ({} bytes) in memory", path.display(), file.size());
                let bytes = std::fs::read(&path).map_err(|error| {
                    VidpaceError::SourceUnavailable {
                        locator: locator.clone(),
                        reason: error.to_string(),
                    }
                })?;
                Box::new(MemorySource::new(bytes))
            } else {
                ensure_readable(&mut file, &locator)?;
                Box::new(file)
            }
        }
        #[cfg(feature = "http")]
        SourceDescriptor::Remote { url, size } => {
            let mut remote = HttpSource::open(&url, size, options.request_timeout)?;
            if remote.size() <= ceiling {
                Box::new(MemorySource::new(remote.fetch_all()?))
            } else {
                ensure_readable(&mut remote, &locator)?;
                Box::new(remote)
            }
        }
        #[cfg(not(feature = "http"))]
        SourceDescriptor::Remote { .. } => {
            return Err(VidpaceError::SourceUnavailable {
                locator,
                reason: "remote sources require the `http` feature".to_string(),
            });
        }
    };

    if source.size() == 0 {
        return Err(VidpaceError::SourceUnavailable {
            locator,
            reason: "source is empty".to_string(),
        });
    }
    Ok(source)
}

/// Read the first byte so a source that fails immediately is reported here
/// rather than as a demuxer open failure.
fn ensure_readable(source: &mut dyn ByteSource, locator: &str) -> Result<(), VidpaceError> {
    if source.size() == 0 {
        return Ok(());
    }
    let mut first = [0u8; 1];
    match source.read_at(0, &mut first) {
        ReadOutcome::Filled(_) => Ok(()),
        ReadOutcome::End => Err(VidpaceError::SourceUnavailable {
            locator: locator.to_string(),
            reason: "initial read returned no data".to_string(),
        }),
    }
}
