//! NAL-unit scanning, keyframe classification, and parameter-set extraction.
//!
//! Payloads are Annex B byte streams: each NAL unit is preceded by a
//! `00 00 01` or `00 00 00 01` start code and runs until the next start code
//! or the end of the buffer.
//!
//! Two scans with different guarantees live here:
//!
//! - [`scan_for_keyframe`] looks only at a bounded prefix of the payload
//!   (default [`DEFAULT_KEYFRAME_SCAN_LIMIT`] bytes). A marker beyond the
//!   bound is missed.
//! - [`extract_parameter_sets`] always walks the whole payload.
//!
//! [`DescriptionResolver`] applies the extraction priority order for one
//! stream and caches the first [`CodecDescription`] it produces.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Default number of payload bytes examined by [`scan_for_keyframe`].
pub const DEFAULT_KEYFRAME_SCAN_LIMIT: usize = 100;

/// The two supported bitstream families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    /// H.264 / AVC. Unit type is the low 5 bits of the NAL header.
    H264,
    /// H.265 / HEVC. Unit type is bits 1 to 6 of the first header byte.
    H265,
}

impl CodecFamily {
    /// Extract the unit type from the first byte after the start code.
    pub fn unit_type(self, header: u8) -> u8 {
        match self {
            CodecFamily::H264 => header & 0x1F,
            CodecFamily::H265 => (header >> 1) & 0x3F,
        }
    }

    /// IDR picture types.
    pub fn is_idr(self, unit_type: u8) -> bool {
        match self {
            CodecFamily::H264 => unit_type == 5,
            CodecFamily::H265 => matches!(unit_type, 19 | 20),
        }
    }

    /// Parameter-set types (SPS/PPS, or VPS/SPS/PPS).
    pub fn is_parameter_set(self, unit_type: u8) -> bool {
        match self {
            CodecFamily::H264 => matches!(unit_type, 7 | 8),
            CodecFamily::H265 => matches!(unit_type, 32..=34),
        }
    }

    /// Types that mark a unit as a decoder entry point: IDR pictures and
    /// parameter sets.
    pub fn is_key_signal(self, unit_type: u8) -> bool {
        self.is_idr(unit_type) || self.is_parameter_set(unit_type)
    }

    /// Short tag used in stats and on the command line.
    pub fn tag(self) -> &'static str {
        match self {
            CodecFamily::H264 => "h264",
            CodecFamily::H265 => "h265",
        }
    }

    /// Parse a command-line style tag (`h264`, `avc`, `h265`, `hevc`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "avc1" => Some(CodecFamily::H264),
            "h265" | "hevc" | "hvc1" | "hev1" => Some(CodecFamily::H265),
            _ => None,
        }
    }
}

impl Display for CodecFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.tag())
    }
}

/// One NAL unit borrowed from a payload, start code excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Offset of the first byte after the start code.
    pub offset: usize,
    /// Unit bytes, header included.
    pub data: &'a [u8],
}

impl NalUnit<'_> {
    /// Unit type interpreted under `family`. `None` for an empty unit.
    pub fn unit_type(&self, family: CodecFamily) -> Option<u8> {
        self.data.first().map(|&header| family.unit_type(header))
    }
}

/// Locate the next start code at or after `from`.
///
/// Returns `(start_code_offset, start_code_length)`. A 4-byte code is
/// preferred when the zero run allows it.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Iterator over the NAL units of an Annex B payload.
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    next: Option<(usize, usize)>,
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (code_offset, code_length) = self.next?;
        let start = code_offset + code_length;
        self.next = find_start_code(self.data, start);
        let end = self.next.map_or(self.data.len(), |(offset, _)| offset);
        Some(NalUnit {
            offset: start,
            data: &self.data[start..end],
        })
    }
}

/// Split `payload` into NAL units. Bytes before the first start code are
/// ignored.
pub fn nal_units(payload: &[u8]) -> NalUnits<'_> {
    NalUnits {
        data: payload,
        next: find_start_code(payload, 0),
    }
}

/// Whether a bounded prefix of `payload` contains an IDR or parameter-set
/// unit.
///
/// Only start codes whose header byte lies within the first `limit` bytes
/// are considered.
pub fn scan_for_keyframe(payload: &[u8], family: CodecFamily, limit: usize) -> bool {
    let prefix = &payload[..payload.len().min(limit)];
    nal_units(prefix)
        .filter_map(|unit| unit.unit_type(family))
        .any(|unit_type| family.is_key_signal(unit_type))
}

/// Keyframe verdict for one video packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyframeClassification {
    /// `described_by_container || described_by_scan`.
    pub is_keyframe: bool,
    /// The container flagged the packet as a sync point.
    pub described_by_container: bool,
    /// The bounded bitstream scan found a key signal.
    pub described_by_scan: bool,
}

/// Combine the container flag with a bounded bitstream scan.
pub fn classify(
    payload: &[u8],
    container_keyframe: bool,
    family: CodecFamily,
    scan_limit: usize,
) -> KeyframeClassification {
    let described_by_scan = scan_for_keyframe(payload, family, scan_limit);
    KeyframeClassification {
        is_keyframe: container_keyframe || described_by_scan,
        described_by_container: container_keyframe,
        described_by_scan,
    }
}

/// Where a [`CodecDescription`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionOrigin {
    /// Parameter bytes supplied by the container, used verbatim.
    OutOfBand,
    /// Length-prefixed parameter sets found by scanning a keyframe.
    Scanned,
    /// Nothing was found. Decoder configuration is expected to fail.
    Empty,
}

/// Decoder configuration bytes for one stream.
///
/// For [`DescriptionOrigin::Scanned`] the bytes are a concatenation of
/// entries, each a 2-byte big-endian length followed by that many bytes of
/// one parameter-set NAL unit, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescription {
    bytes: Vec<u8>,
    origin: DescriptionOrigin,
}

impl CodecDescription {
    /// Wrap container-supplied bytes unchanged.
    pub fn out_of_band(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            origin: DescriptionOrigin::OutOfBand,
        }
    }

    /// The empty last-resort description.
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            origin: DescriptionOrigin::Empty,
        }
    }

    /// Raw description bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Where the description bytes came from.
    pub fn origin(&self) -> DescriptionOrigin {
        self.origin
    }

    /// No description was found.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parameter-set units of a scanned description, in order.
    ///
    /// Empty for out-of-band descriptions, whose layout is container
    /// specific.
    pub fn entries(&self) -> Vec<&[u8]> {
        if self.origin != DescriptionOrigin::Scanned {
            return Vec::new();
        }
        let mut entries = Vec::new();
        let mut rest = self.bytes.as_slice();
        while rest.len() >= 2 {
            let length = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            if rest.len() < 2 + length {
                break;
            }
            entries.push(&rest[2..2 + length]);
            rest = &rest[2 + length..];
        }
        entries
    }

    /// Scanned entries re-framed as an Annex B stream (`00 00 00 01` start
    /// codes). Out-of-band bytes are returned unchanged.
    pub fn to_annex_b(&self) -> Vec<u8> {
        match self.origin {
            DescriptionOrigin::OutOfBand => self.bytes.clone(),
            DescriptionOrigin::Empty => Vec::new(),
            DescriptionOrigin::Scanned => {
                let mut output = Vec::with_capacity(self.bytes.len() + 8);
                for entry in self.entries() {
                    output.extend_from_slice(&[0, 0, 0, 1]);
                    output.extend_from_slice(entry);
                }
                output
            }
        }
    }
}

/// Full scan of `payload` for parameter-set units.
///
/// Returns `None` when the payload has none. Units longer than
/// `u16::MAX` bytes cannot be length-prefixed and are skipped.
pub fn extract_parameter_sets(payload: &[u8], family: CodecFamily) -> Option<CodecDescription> {
    let mut bytes = Vec::new();
    for unit in nal_units(payload) {
        let Some(unit_type) = unit.unit_type(family) else {
            continue;
        };
        if !family.is_parameter_set(unit_type) {
            continue;
        }
        let Ok(length) = u16::try_from(unit.data.len()) else {
            log::warn!("Skipping {family} parameter set of {} bytes", unit.data.len());
            continue;
        };
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(unit.data);
    }

    if bytes.is_empty() {
        None
    } else {
        Some(CodecDescription {
            bytes,
            origin: DescriptionOrigin::Scanned,
        })
    }
}

/// Produces the codec description of one stream, at most once.
///
/// Priority order:
/// 1. Container out-of-band bytes, verbatim, with no scanning.
/// 2. A full scan of the first keyframe offered.
/// 3. Full scans of later keyframes until one yields parameter sets.
/// 4. [`CodecDescription::empty`] when [`finish`](Self::finish) is reached
///    without a result.
#[derive(Debug)]
pub struct DescriptionResolver {
    family: CodecFamily,
    resolved: Option<CodecDescription>,
    scan_attempts: u32,
}

impl DescriptionResolver {
    /// Start resolving for `family`. Non-empty out-of-band bytes resolve
    /// immediately and are used verbatim.
    pub fn new(family: CodecFamily, out_of_band: Option<Vec<u8>>) -> Self {
        let resolved = out_of_band
            .filter(|bytes| !bytes.is_empty())
            .map(CodecDescription::out_of_band);
        Self {
            family,
            resolved,
            scan_attempts: 0,
        }
    }

    /// Offer a keyframe payload. Ignored once a description exists.
    pub fn offer_keyframe(&mut self, payload: &[u8]) {
        if self.resolved.is_some() {
            return;
        }
        self.scan_attempts += 1;
        self.resolved = extract_parameter_sets(payload, self.family);
        if self.resolved.is_some() {
            log::debug!(
                "Extracted {} parameter sets after {} keyframe scan(s)",
                self.family,
                self.scan_attempts
            );
        }
    }

    /// A description has been found.
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Number of keyframe payloads that were actually scanned.
    pub fn scan_attempts(&self) -> u32 {
        self.scan_attempts
    }

    /// The cached description, or the empty fallback.
    pub fn finish(self) -> CodecDescription {
        match self.resolved {
            Some(description) => description,
            None => {
                log::warn!(
                    "No {} parameter sets found in {} keyframe(s); continuing with an empty description",
                    self.family,
                    self.scan_attempts
                );
                CodecDescription::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC];
    const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00];

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for (index, unit) in units.iter().enumerate() {
            if index % 2 == 0 {
                out.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                out.extend_from_slice(&[0, 0, 1]);
            }
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn splits_on_both_start_code_lengths() {
        let payload = annex_b(&[SPS, PPS, IDR]);
        let units: Vec<_> = nal_units(&payload).map(|unit| unit.data).collect();
        assert_eq!(units, vec![SPS, PPS, IDR]);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut payload = vec![0xFF, 0x12];
        payload.extend(annex_b(&[IDR]));
        let units: Vec<_> = nal_units(&payload).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].offset, 6);
    }

    #[test]
    fn h265_unit_types() {
        assert_eq!(CodecFamily::H265.unit_type(0x40), 32);
        assert_eq!(CodecFamily::H265.unit_type(0x26), 19);
        assert!(CodecFamily::H265.is_idr(20));
        assert!(CodecFamily::H265.is_parameter_set(34));
        assert!(!CodecFamily::H265.is_key_signal(1));
    }

    #[test]
    fn bounded_scan_misses_late_marker() {
        let filler = [0x41u8; 150];
        let mut payload = annex_b(&[&filler[..]]);
        payload.extend(annex_b(&[IDR]));
        assert!(!scan_for_keyframe(&payload, CodecFamily::H264, DEFAULT_KEYFRAME_SCAN_LIMIT));
        assert!(scan_for_keyframe(&payload, CodecFamily::H264, payload.len()));
    }

    #[test]
    fn extraction_encodes_big_endian_lengths() {
        let description =
            extract_parameter_sets(&annex_b(&[SPS, PPS, IDR]), CodecFamily::H264).unwrap();
        let mut expected = vec![0, SPS.len() as u8];
        expected.extend_from_slice(SPS);
        expected.extend_from_slice(&[0, PPS.len() as u8]);
        expected.extend_from_slice(PPS);
        assert_eq!(description.as_bytes(), expected.as_slice());
        assert_eq!(description.entries(), vec![SPS, PPS]);
    }

    #[test]
    fn annex_b_rendering_reframes_entries() {
        let description =
            extract_parameter_sets(&annex_b(&[SPS, PPS]), CodecFamily::H264).unwrap();
        let rendered = description.to_annex_b();
        let units: Vec<_> = nal_units(&rendered).map(|unit| unit.data).collect();
        assert_eq!(units, vec![SPS, PPS]);
    }

    #[test]
    fn resolver_falls_through_to_later_keyframes() {
        let mut resolver = DescriptionResolver::new(CodecFamily::H264, None);
        resolver.offer_keyframe(&annex_b(&[IDR]));
        assert!(!resolver.is_resolved());
        resolver.offer_keyframe(&annex_b(&[SPS, PPS, IDR]));
        resolver.offer_keyframe(&annex_b(&[SPS, IDR]));
        assert_eq!(resolver.scan_attempts(), 2);
        let description = resolver.finish();
        assert_eq!(description.origin(), DescriptionOrigin::Scanned);
        assert_eq!(description.entries().len(), 2);
    }

    #[test]
    fn resolver_uses_out_of_band_bytes_without_scanning() {
        let avcc = vec![0x01, 0x64, 0x00, 0x1F, 0xFF];
        let mut resolver = DescriptionResolver::new(CodecFamily::H264, Some(avcc.clone()));
        resolver.offer_keyframe(&annex_b(&[SPS, PPS, IDR]));
        assert_eq!(resolver.scan_attempts(), 0);
        let description = resolver.finish();
        assert_eq!(description.origin(), DescriptionOrigin::OutOfBand);
        assert_eq!(description.as_bytes(), avcc.as_slice());
    }

    #[test]
    fn resolver_without_parameter_sets_yields_empty() {
        let mut resolver = DescriptionResolver::new(CodecFamily::H265, Some(Vec::new()));
        resolver.offer_keyframe(&[0, 0, 1, 0x26, 0x01]);
        let description = resolver.finish();
        assert_eq!(description.origin(), DescriptionOrigin::Empty);
        assert!(description.is_empty());
    }
}
