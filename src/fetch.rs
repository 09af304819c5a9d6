//! The Log Fetch Engine: reassembles a FETCH_LOG data-frame stream into a sink.

use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

use crate::error::GspError;

/// A byte sink a fetched log is written into. `offset`-addressed, not append-only,
/// because the device may re-send a region without the engine treating it as
/// corruption.
pub trait LogSink: Write + Seek + Send {}

impl<T: Write + Seek + Send> LogSink for T {}

/// End-of-stream drain window: once an empty-payload frame is seen, wait this long for
/// stray late frames before declaring the transfer complete.
pub const DRAIN_WINDOW: Duration = Duration::from_secs(1);

/// Idle timeout between data frames once streaming has started.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// The outcome of one `fetch_log` call once the initial `CommandResponse` was a
/// success and streaming began or the peer reported no such log.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The log was fetched in full (or the stream drained after a clean EOF).
    Fetched(LogFetchReport),
    /// The peer reported `404` for this log id: no more logs are expected to exist.
    NoMoreLogs,
}

/// Summary of a completed or timed-out streaming transfer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogFetchReport {
    pub log_id: u32,
    pub bytes_written: u64,
    pub duration: Duration,
}

/// Decodes one streamed data-frame payload — `offset (u32 LE) || bytes` — and applies
/// it to `sink`, returning whether the frame was the empty-payload EOF sentinel and the
/// high-water mark `offset + len(bytes)` it produced.
///
/// This is kept independent of the transport and router so the offset/seek/EOF logic
/// can be exercised without a live connection.
pub fn apply_frame(sink: &mut dyn LogSink, payload: &[u8]) -> Result<FrameApplied, GspError> {
    if payload.len() < 4 {
        return Err(GspError::ProtocolError {
            detail: format!("data frame shorter than offset header: {} bytes", payload.len()),
        });
    }
    let offset = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let bytes = &payload[4..];

    if bytes.is_empty() {
        return Ok(FrameApplied {
            is_eof: true,
            high_water_mark: u64::from(offset),
        });
    }

    sink.seek(SeekFrom::Start(u64::from(offset)))?;
    sink.write_all(bytes)?;

    Ok(FrameApplied {
        is_eof: false,
        high_water_mark: u64::from(offset) + bytes.len() as u64,
    })
}

/// Result of applying one data frame to the sink.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FrameApplied {
    pub is_eof: bool,
    pub high_water_mark: u64,
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    fn frame(offset: u32, bytes: &[u8]) -> Vec<u8> {
        let mut payload = offset.to_le_bytes().to_vec();
        payload.extend_from_slice(bytes);
        payload
    }

    #[test]
    fn writes_payload_at_offset_and_tracks_high_water_mark() {
        let mut sink = Cursor::new(Vec::new());
        let applied = apply_frame(&mut sink, &frame(0, b"test data\0")).unwrap();

        assert!(!applied.is_eof);
        assert_eq!(10, applied.high_water_mark);
        assert_eq!(b"test data\0".to_vec(), sink.into_inner());
    }

    #[test]
    fn empty_payload_frame_signals_eof_without_writing() {
        let mut sink = Cursor::new(vec![0u8; 4]);
        let applied = apply_frame(&mut sink, &frame(9, &[])).unwrap();

        assert!(applied.is_eof);
        assert_eq!(9, applied.high_water_mark);
    }

    #[test]
    fn high_water_mark_uses_offset_plus_len_not_cumulative_bytes() {
        let mut sink = Cursor::new(Vec::new());
        apply_frame(&mut sink, &frame(0, b"abcd")).unwrap();
        let applied = apply_frame(&mut sink, &frame(2, b"XY")).unwrap();

        assert_eq!(4, applied.high_water_mark);
        assert_eq!(b"abXY".to_vec(), sink.into_inner());
    }

    #[test]
    fn rewriting_an_earlier_region_does_not_truncate_later_bytes() {
        let mut sink = Cursor::new(Vec::new());
        apply_frame(&mut sink, &frame(0, b"0123456789")).unwrap();
        apply_frame(&mut sink, &frame(2, b"XY")).unwrap();

        assert_eq!(b"01XY456789".to_vec(), sink.into_inner());
    }

    #[test]
    fn rejects_frame_shorter_than_offset_header() {
        let mut sink = Cursor::new(Vec::new());
        let result = apply_frame(&mut sink, &[0x01, 0x02]);
        assert!(result.is_err());
    }
}
