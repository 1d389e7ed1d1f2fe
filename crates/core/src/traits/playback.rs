//! Playback subsystem trait and types

use crate::error::PlaybackError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Where playback currently is: segment index within the response and the
/// offset into that segment's audio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackPosition {
    pub segment_index: usize,
    pub offset_ms: u64,
}

impl PlaybackPosition {
    pub fn new(segment_index: usize, offset_ms: u64) -> Self {
        Self {
            segment_index,
            offset_ms,
        }
    }
}

/// One synthesized segment with the text it speaks.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Response this segment belongs to
    pub response_id: u64,
    /// Index of the segment within its response
    pub index: usize,
    pub text: String,
    pub samples: std::sync::Arc<[f32]>,
    pub sample_rate: u32,
    /// Start playing this far into the audio (used when resuming)
    pub start_offset_ms: u64,
}

impl AudioSegment {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Progress notifications from the playback subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The first frame of a segment went out. Carries the segment text so
    /// subscribers can reveal it in sync with the audio.
    SegmentStarted {
        response_id: u64,
        index: usize,
        text: String,
    },
    SegmentFinished { response_id: u64, index: usize },
    /// Queue ran empty
    Drained,
}

/// Audio output with a segment queue and a position cursor.
pub trait PlaybackController: Send + Sync + 'static {
    fn enqueue(&self, segment: AudioSegment) -> Result<(), PlaybackError>;

    /// Halt output at the last fully played frame and return that position.
    /// Pausing an already paused controller returns the stored position.
    fn pause(&self) -> PlaybackPosition;

    /// Continue from exactly where `pause` stopped
    fn resume(&self);

    /// Drop everything queued and go idle
    fn stop(&self);

    fn current_position(&self) -> PlaybackPosition;

    fn is_paused(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent>;
}
