//! Ranged HTTP byte source.
//!
//! Every [`read_at`](ByteSource::read_at) issues one GET with an explicit
//! `Range: bytes=start-end` header covering exactly the requested span. The
//! total size is probed once with a HEAD request; servers that omit
//! `Content-Length` on HEAD are asked for `bytes=0-0` and the size is taken
//! from the `Content-Range` total.
//!
//! A failed fetch is logged and latches the source into the end state, so
//! every later read returns [`ReadOutcome::End`]. A `200 OK` answer to a
//! range that does not start at zero counts as a failed fetch: the server
//! ignores ranges and every read would transfer the whole resource.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};

use crate::error::VidpaceError;
use crate::source::{ByteSource, ReadOutcome};

/// Inclusive byte range as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub(crate) start: u64,
    pub(crate) end: u64,
}

impl ByteRange {
    pub(crate) fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Parse the total out of a `Content-Range: bytes a-b/total` value.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// A remote file fetched in byte ranges.
#[derive(Debug)]
pub struct HttpSource {
    client: Client,
    url: String,
    size: u64,
    position: u64,
    failed: bool,
}

impl HttpSource {
    /// Connect to `url`, probing its size unless `size` is given.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::SourceUnavailable`] if the client cannot be
    /// built or the size cannot be determined.
    pub fn open(url: &str, size: Option<u64>, timeout: Duration) -> Result<Self, VidpaceError> {
        let unavailable = |reason: String| VidpaceError::SourceUnavailable {
            locator: url.to_string(),
            reason,
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| unavailable(error.to_string()))?;

        let size = match size {
            Some(size) => size,
            None => probe_size(&client, url).map_err(unavailable)?,
        };
        log::debug!("Remote source {url}: {size} bytes");

        Ok(Self {
            client,
            url: url.to_string(),
            size,
            position: 0,
            failed: false,
        })
    }

    /// Download the whole resource in a single ranged request.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::SourceUnavailable`] if the request fails or
    /// returns fewer bytes than the probed size.
    pub fn fetch_all(&self) -> Result<Vec<u8>, VidpaceError> {
        let range = ByteRange {
            start: 0,
            end: self.size.saturating_sub(1),
        };
        let bytes = self
            .fetch(range)
            .map_err(|reason| VidpaceError::SourceUnavailable {
                locator: self.url.clone(),
                reason,
            })?;
        if (bytes.len() as u64) < self.size {
            return Err(VidpaceError::SourceUnavailable {
                locator: self.url.clone(),
                reason: format!("expected {} bytes, received {}", self.size, bytes.len()),
            });
        }
        Ok(bytes)
    }

    fn fetch(&self, range: ByteRange) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, range.header_value())
            .send()
            .map_err(|error| error.to_string())?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .bytes()
                .map(|bytes| bytes.to_vec())
                .map_err(|error| error.to_string()),
            // Full body for a range from zero: keep the requested prefix.
            StatusCode::OK if range.start == 0 => {
                let bytes = response.bytes().map_err(|error| error.to_string())?;
                let end = (range.end as usize + 1).min(bytes.len());
                Ok(bytes[..end].to_vec())
            }
            StatusCode::OK => Err(format!(
                "server ignored Range {} and sent the full body",
                range.header_value()
            )),
            other => Err(format!("HTTP status {other}")),
        }
    }
}

fn header_text(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn probe_size(client: &Client, url: &str) -> Result<u64, String> {
    let head = client.head(url).send().map_err(|error| error.to_string())?;
    if head.status().is_success()
        && let Some(length) = header_text(&head, CONTENT_LENGTH).and_then(|v| v.parse().ok())
        && length > 0
    {
        return Ok(length);
    }

    let probe = ByteRange { start: 0, end: 0 };
    let response = client
        .get(url)
        .header(RANGE, probe.header_value())
        .send()
        .map_err(|error| error.to_string())?;
    if !response.status().is_success() {
        return Err(format!("size probe returned HTTP status {}", response.status()));
    }
    header_text(&response, CONTENT_RANGE)
        .and_then(|value| parse_content_range_total(&value))
        .ok_or_else(|| "server reported neither Content-Length nor Content-Range".to_string())
}

impl ByteSource for HttpSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ReadOutcome {
        if self.failed || offset >= self.size || buf.is_empty() {
            return ReadOutcome::End;
        }
        let count = (self.size - offset).min(buf.len() as u64);
        let range = ByteRange {
            start: offset,
            end: offset + count - 1,
        };

        match self.fetch(range) {
            Ok(bytes) if !bytes.is_empty() => {
                let filled = bytes.len().min(buf.len());
                buf[..filled].copy_from_slice(&bytes[..filled]);
                ReadOutcome::Filled(filled)
            }
            Ok(_) => ReadOutcome::End,
            Err(reason) => {
                log::warn!("Ranged fetch {} of {} failed: {reason}", range.header_value(), self.url);
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
