//! Container grammar selection.
//!
//! [`select`] is a pure function of the name or URL: it looks at the
//! extension only, never at the bytes.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// The container grammar handed to the demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// ISO base media file format (`.mp4`, `.m4v`, `.mov`).
    IsoBmff,
    /// MPEG transport stream (`.ts`, `.m2ts`, `.mts`). Also the fallback.
    TransportStream,
}

impl ContainerFormat {
    /// FFmpeg short name of the input format.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            ContainerFormat::IsoBmff => "mp4",
            ContainerFormat::TransportStream => "mpegts",
        }
    }
}

impl Display for ContainerFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ContainerFormat::IsoBmff => write!(f, "ISO-BMFF"),
            ContainerFormat::TransportStream => write!(f, "MPEG-TS"),
        }
    }
}

const EXTENSIONS: &[(&str, ContainerFormat)] = &[
    ("mp4", ContainerFormat::IsoBmff),
    ("m4v", ContainerFormat::IsoBmff),
    ("mov", ContainerFormat::IsoBmff),
    ("ts", ContainerFormat::TransportStream),
    ("m2ts", ContainerFormat::TransportStream),
    ("mts", ContainerFormat::TransportStream),
];

/// Choose a container grammar from a file name, path, or URL.
///
/// Query strings and fragments are ignored and matching is
/// case-insensitive. Unknown extensions select
/// [`ContainerFormat::TransportStream`].
///
/// # Example
///
/// ```
/// use vidpace::{ContainerFormat, format};
///
/// assert_eq!(format::select("clip.MP4"), ContainerFormat::IsoBmff);
/// assert_eq!(format::select("https://cdn/seg.ts?token=1"), ContainerFormat::TransportStream);
/// assert_eq!(format::select("unknown.bin"), ContainerFormat::TransportStream);
/// ```
pub fn select(name_or_url: &str) -> ContainerFormat {
    let without_fragment = name_or_url.split('#').next().unwrap_or_default();
    let path = without_fragment.split('?').next().unwrap_or_default();
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or_default();

    let Some((_, extension)) = file_name.rsplit_once('.') else {
        return ContainerFormat::TransportStream;
    };
    let extension = extension.to_ascii_lowercase();

    EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == extension)
        .map(|(_, format)| *format)
        .unwrap_or(ContainerFormat::TransportStream)
}
