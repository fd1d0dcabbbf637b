//! Error handling integration tests.
//!
//! These tests verify that the fatal conditions of a pipeline surface as the
//! matching error variant.

use std::path::PathBuf;

use vidpace::{NullSink, PipelineOptions, SourceDescriptor, VidpaceError};

#[test]
fn inspect_nonexistent_file() {
    let result = vidpace::inspect(
        SourceDescriptor::File(PathBuf::from("this_file_does_not_exist.ts")),
        &PipelineOptions::default(),
    );
    let error = result.unwrap_err();
    assert!(matches!(error, VidpaceError::SourceUnavailable { .. }));
    assert!(
        error.to_string().contains("this_file_does_not_exist.ts"),
        "Error message should name the source: {error}",
    );
}

#[test]
fn run_on_garbage_file_fails() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let invalid_file_path = temporary_directory.path().join("invalid.mp4");
    std::fs::write(&invalid_file_path, b"this is not a media file")
        .expect("Failed to write invalid file");

    let result = vidpace::run(
        SourceDescriptor::File(invalid_file_path),
        NullSink::new(),
        &PipelineOptions::default(),
    );
    assert!(
        matches!(
            result,
            Err(VidpaceError::StreamOpen { .. } | VidpaceError::NoVideoStream)
        ),
        "Expected a container error, got {:?}",
        result.err()
    );
}

#[test]
fn invalid_configuration_is_rejected_before_io() {
    let options = PipelineOptions::new().with_target_interval(std::time::Duration::ZERO);
    let result = vidpace::inspect(
        SourceDescriptor::File(PathBuf::from("this_file_does_not_exist.ts")),
        &options,
    );
    assert!(matches!(result, Err(VidpaceError::InvalidConfiguration(_))));
}

#[test]
fn only_decode_errors_are_soft() {
    assert!(!VidpaceError::DecodeError("bad slice".to_string()).is_fatal());
    assert!(VidpaceError::NoVideoStream.is_fatal());
    assert!(VidpaceError::PacketRead("eio".to_string()).is_fatal());
    assert!(
        VidpaceError::UnsupportedCodec {
            codec: "avc1.42E01E".to_string(),
            reason: "no decoder".to_string(),
        }
        .is_fatal()
    );
}

#[test]
fn error_messages() {
    assert_eq!(
        VidpaceError::NoVideoStream.to_string(),
        "No video stream found in container"
    );
    assert_eq!(
        VidpaceError::StreamOpen {
            format: "mpegts".to_string(),
            reason: "Invalid data found when processing input".to_string(),
        }
        .to_string(),
        "Failed to open mpegts container: Invalid data found when processing input"
    );
}

#[cfg(feature = "async")]
#[tokio::test]
async fn async_run_reports_unreadable_buffer() {
    vidpace::set_ffmpeg_log_level(vidpace::FfmpegLogLevel::Quiet);
    let result = vidpace::run_async(
        vidpace::SourceDescriptor::from(vec![0x13; 64]),
        vidpace::NullSink::new(),
        vidpace::PipelineOptions::new(),
    )
    .await;
    assert!(result.is_err());
}
