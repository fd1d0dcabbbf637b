//! Bitstream classification and parameter-set extraction tests.

mod common;

use common::{IDR, PPS, SLICE, SPS, annex_b};
use vidpace::{
    CodecFamily, DescriptionOrigin, classify, extract_parameter_sets, nal_units, scan_for_keyframe,
};

const LIMIT: usize = 100;

#[test]
fn sps_pps_idr_is_a_keyframe_with_two_entries() {
    let payload = annex_b(&[SPS, PPS, IDR]);

    let verdict = classify(&payload, false, CodecFamily::H264, LIMIT);
    assert!(verdict.is_keyframe);
    assert!(verdict.described_by_scan);
    assert!(!verdict.described_by_container);

    let description = extract_parameter_sets(&payload, CodecFamily::H264).unwrap();
    assert_eq!(description.origin(), DescriptionOrigin::Scanned);
    let bytes = description.as_bytes();
    assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]) as usize, SPS.len());
    assert_eq!(&bytes[2..2 + SPS.len()], SPS);
    let rest = &bytes[2 + SPS.len()..];
    assert_eq!(u16::from_be_bytes([rest[0], rest[1]]) as usize, PPS.len());
    assert_eq!(&rest[2..], PPS);
}

#[test]
fn classification_is_idempotent() {
    let payloads = [
        annex_b(&[SPS, PPS, IDR]),
        annex_b(&[SLICE]),
        vec![0, 0, 1],
        Vec::new(),
    ];
    for payload in &payloads {
        let first = classify(payload, false, CodecFamily::H264, LIMIT);
        let second = classify(payload, false, CodecFamily::H264, LIMIT);
        assert_eq!(first, second);
    }
}

#[test]
fn container_flag_alone_marks_a_keyframe() {
    let verdict = classify(&annex_b(&[SLICE]), true, CodecFamily::H264, LIMIT);
    assert!(verdict.is_keyframe);
    assert!(verdict.described_by_container);
    assert!(!verdict.described_by_scan);
}

#[test]
fn marker_beyond_scan_bound_is_missed() {
    let long_slice: Vec<u8> = std::iter::once(0x41).chain(std::iter::repeat_n(0x5A, 200)).collect();
    let payload = annex_b(&[&long_slice[..], IDR]);

    assert!(!scan_for_keyframe(&payload, CodecFamily::H264, LIMIT));
    assert!(scan_for_keyframe(&payload, CodecFamily::H264, payload.len()));
    // Extraction is never bounded.
    let late_sets = annex_b(&[&long_slice[..], SPS, PPS]);
    assert_eq!(
        extract_parameter_sets(&late_sets, CodecFamily::H264)
            .unwrap()
            .entries(),
        vec![SPS, PPS]
    );
}

#[test]
fn h265_parameter_sets_in_order() {
    let vps: &[u8] = &[0x40, 0x01, 0x0C];
    let sps: &[u8] = &[0x42, 0x01, 0x01, 0x60];
    let pps: &[u8] = &[0x44, 0x01, 0xC1];
    let idr: &[u8] = &[0x26, 0x01, 0xAF];
    let payload = annex_b(&[vps, sps, pps, idr]);

    assert!(scan_for_keyframe(&payload, CodecFamily::H265, LIMIT));
    let description = extract_parameter_sets(&payload, CodecFamily::H265).unwrap();
    assert_eq!(description.entries(), vec![vps, sps, pps]);
}

#[test]
fn h265_trailing_picture_is_not_key() {
    let trail: &[u8] = &[0x02, 0x01, 0xD0];
    assert!(!scan_for_keyframe(&annex_b(&[trail]), CodecFamily::H265, LIMIT));
    assert!(extract_parameter_sets(&annex_b(&[trail]), CodecFamily::H265).is_none());
}

#[test]
fn three_byte_start_codes_are_recognised() {
    let mut payload = vec![0, 0, 1];
    payload.extend_from_slice(SPS);
    payload.extend_from_slice(&[0, 0, 1]);
    payload.extend_from_slice(IDR);

    let units: Vec<_> = nal_units(&payload).map(|unit| unit.data).collect();
    assert_eq!(units, vec![SPS, IDR]);
}

#[test]
fn payload_without_start_codes_has_no_units() {
    assert_eq!(nal_units(&[0x65, 0x88, 0x84]).count(), 0);
    assert!(!scan_for_keyframe(&[0x65, 0x88], CodecFamily::H264, LIMIT));
}
