//! Bridge from [`ByteSource`] to FFmpeg's custom I/O.
//!
//! FFmpeg pulls container bytes through an `AVIOContext` whose read and seek
//! callbacks land here and are forwarded to the boxed source. FFmpeg's
//! `AVSEEK_SIZE` query maps to [`ByteSource::size`], and
//! [`ReadOutcome::End`] maps to `AVERROR_EOF`.

use std::ffi::{c_int, c_void};

use ffmpeg_sys_next::{AVERROR_EOF, AVIOContext};

use crate::error::VidpaceError;
use crate::source::{ByteSource, ReadOutcome};

/// Size of the buffer FFmpeg reads through.
const IO_BUFFER_SIZE: usize = 64 * 1024;

// libavformat/avio.h
const AVSEEK_SIZE: c_int = 0x10000;
const AVSEEK_FORCE: c_int = 0x20000;

// stdio whence values
const SEEK_SET: c_int = 0;
const SEEK_CUR: c_int = 1;
const SEEK_END: c_int = 2;

/// Owns an `AVIOContext` and the source it reads from.
///
/// Must outlive every format context that has it attached as `pb`.
pub(crate) struct SourceIo {
    context: *mut AVIOContext,
    source: *mut Box<dyn ByteSource>,
}

impl SourceIo {
    pub(crate) fn new(source: Box<dyn ByteSource>) -> Result<Self, VidpaceError> {
        let source = Box::into_raw(Box::new(source));

        // SAFETY: the buffer is allocated with av_malloc as avio requires and
        // ownership passes to the AVIOContext on success. On failure every
        // allocation made here is released before returning. `source` stays
        // valid until Drop, which runs after the context is freed.
        unsafe {
            let buffer = ffmpeg_sys_next::av_malloc(IO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(source));
                return Err(VidpaceError::FfmpegError(
                    "Failed to allocate I/O buffer".to_string(),
                ));
            }

            let context = ffmpeg_sys_next::avio_alloc_context(
                buffer,
                IO_BUFFER_SIZE as c_int,
                0,
                source as *mut c_void,
                Some(read_packet),
                None,
                Some(seek),
            );
            if context.is_null() {
                ffmpeg_sys_next::av_free(buffer as *mut c_void);
                drop(Box::from_raw(source));
                return Err(VidpaceError::FfmpegError(
                    "Failed to allocate I/O context".to_string(),
                ));
            }

            Ok(Self { context, source })
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut AVIOContext {
        self.context
    }

    /// Total size of the underlying source.
    pub(crate) fn size(&self) -> u64 {
        // SAFETY: `source` is valid for the lifetime of `self`.
        unsafe { (*self.source).size() }
    }
}

impl Drop for SourceIo {
    fn drop(&mut self) {
        // SAFETY: FFmpeg may have replaced the I/O buffer, so it is freed
        // through the context field rather than the original pointer.
        unsafe {
            if !self.context.is_null() {
                ffmpeg_sys_next::av_freep(&mut (*self.context).buffer as *mut *mut u8 as *mut c_void);
                ffmpeg_sys_next::avio_context_free(&mut self.context);
            }
            drop(Box::from_raw(self.source));
        }
    }
}

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if buf_size <= 0 {
        return AVERROR_EOF;
    }
    // SAFETY: `opaque` is the `Box<dyn ByteSource>` registered in
    // `SourceIo::new`, and FFmpeg hands us a writable buffer of `buf_size`.
    let (source, output) = unsafe {
        (
            &mut *(opaque as *mut Box<dyn ByteSource>),
            std::slice::from_raw_parts_mut(buf, buf_size as usize),
        )
    };
    match source.read_next(output) {
        ReadOutcome::Filled(count) => count as c_int,
        ReadOutcome::End => AVERROR_EOF,
    }
}

unsafe extern "C" fn seek(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    // SAFETY: see `read_packet`.
    let source = unsafe { &mut *(opaque as *mut Box<dyn ByteSource>) };
    let size = source.size() as i64;

    if whence & AVSEEK_SIZE != 0 {
        return size;
    }

    let target = match whence & !AVSEEK_FORCE {
        SEEK_SET => offset,
        SEEK_CUR => source.position() as i64 + offset,
        SEEK_END => size + offset,
        _ => return -1,
    };
    if target < 0 {
        return -1;
    }

    source.seek(target as u64);
    source.position() as i64
}
