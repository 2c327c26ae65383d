//! Throughput and resolution derived from periodic peer-connection samples.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Counters of one RTP stream as reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpStreamStats {
    pub kind: MediaKind,
    /// `bytesReceived` for inbound streams, `bytesSent` for outbound ones.
    pub bytes: u64,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
}

/// One entry of a stats enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsReport {
    InboundRtp(RtpStreamStats),
    OutboundRtp(RtpStreamStats),
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VideoResolution {
    pub width: u32,
    pub height: u32,
}

impl VideoResolution {
    fn of(stream: &RtpStreamStats) -> Self {
        Self {
            width: stream.frame_width.unwrap_or(0),
            height: stream.frame_height.unwrap_or(0),
        }
    }
}

/// Snapshot emitted to the UI on every sampling tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallStats {
    pub incoming_kbps: u64,
    pub outgoing_kbps: u64,
    pub incoming_video_resolution: VideoResolution,
    pub outgoing_video_resolution: VideoResolution,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_incoming_bytes: u64,
    #[serde(skip)]
    last_outgoing_bytes: u64,
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one stats enumeration into the snapshot.
    ///
    /// Only video streams are considered. Rates are left untouched on the
    /// first sample (no baseline yet) and whenever the clock did not move
    /// forward; the byte counters and resolutions are always refreshed.
    pub fn apply_sample(&mut self, reports: &[StatsReport], now: DateTime<Utc>) {
        let elapsed_ms = self
            .last_updated
            .map(|prev| (now - prev).num_milliseconds())
            .filter(|ms| *ms > 0);

        for report in reports {
            match report {
                StatsReport::InboundRtp(stream) if stream.kind == MediaKind::Video => {
                    if let Some(ms) = elapsed_ms {
                        self.incoming_kbps = kbps(self.last_incoming_bytes, stream.bytes, ms);
                    }
                    self.last_incoming_bytes = stream.bytes;
                    self.incoming_video_resolution = VideoResolution::of(stream);
                }
                StatsReport::OutboundRtp(stream) if stream.kind == MediaKind::Video => {
                    if let Some(ms) = elapsed_ms {
                        self.outgoing_kbps = kbps(self.last_outgoing_bytes, stream.bytes, ms);
                    }
                    self.last_outgoing_bytes = stream.bytes;
                    self.outgoing_video_resolution = VideoResolution::of(stream);
                }
                _ => {}
            }
        }

        self.last_updated = Some(now);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// Integer division floors; a counter that went backwards reads as 0.
fn kbps(prev_bytes: u64, bytes: u64, elapsed_ms: i64) -> u64 {
    bytes.saturating_sub(prev_bytes).saturating_mul(8) / elapsed_ms as u64
}
