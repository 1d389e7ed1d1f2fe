//! Frame-clocked playback queue
//!
//! `QueuedPlayback` advances one playback frame per clock tick. Position only
//! ever moves in whole frames, so a pause or stop truncates a segment at the
//! last fully played frame and never mid-frame.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use voice_tutor_core::{
    AudioSegment, PlaybackController, PlaybackError, PlaybackEvent, PlaybackPosition,
};

const EVENT_CAPACITY: usize = 64;

/// One frame of audio handed to the output device
#[derive(Debug, Clone)]
pub struct PlaybackOutputFrame {
    pub response_id: u64,
    pub segment_index: usize,
    pub offset_ms: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

struct Playing {
    segment: AudioSegment,
    offset_ms: u64,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<AudioSegment>,
    current: Option<Playing>,
    paused: bool,
    last_position: PlaybackPosition,
}

pub struct QueuedPlayback {
    frame_ms: u64,
    inner: Mutex<Inner>,
    events: broadcast::Sender<PlaybackEvent>,
    output: Option<mpsc::Sender<PlaybackOutputFrame>>,
}

impl QueuedPlayback {
    pub fn new(frame_ms: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            frame_ms: frame_ms.max(1),
            inner: Mutex::new(Inner::default()),
            events,
            output: None,
        }
    }

    /// Send played frames to an output device
    pub fn with_output(mut self, output: mpsc::Sender<PlaybackOutputFrame>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn frame_ms(&self) -> u64 {
        self.frame_ms
    }

    /// Segments waiting behind the current one
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.current.is_none() && inner.queue.is_empty()
    }

    /// Play one frame. Returns whether any audio went out.
    pub fn tick(&self) -> bool {
        let mut events = Vec::new();
        let mut frame_out = None;

        {
            let mut inner = self.inner.lock();
            if inner.paused {
                return false;
            }
            if inner.current.is_none() && !Self::start_next(&mut inner, self.frame_ms, &mut events) {
                return false;
            }

            let Some(playing) = inner.current.as_mut() else {
                return false;
            };

            let duration = playing.segment.duration_ms();
            let start = playing.offset_ms;
            let end = (start + self.frame_ms).min(duration);
            let response_id = playing.segment.response_id;
            let index = playing.segment.index;

            if self.output.is_some() && end > start {
                let rate = playing.segment.sample_rate as u64;
                let from = (start * rate / 1000) as usize;
                let to = ((end * rate / 1000) as usize).min(playing.segment.samples.len());
                frame_out = Some(PlaybackOutputFrame {
                    response_id,
                    segment_index: index,
                    offset_ms: start,
                    samples: playing.segment.samples[from.min(to)..to].to_vec(),
                    sample_rate: playing.segment.sample_rate,
                });
            }

            playing.offset_ms = end;
            inner.last_position = PlaybackPosition::new(index, end);

            if end >= duration {
                inner.current = None;
                events.push(PlaybackEvent::SegmentFinished { response_id, index });
                if !Self::start_next(&mut inner, self.frame_ms, &mut events) {
                    events.push(PlaybackEvent::Drained);
                }
            }
        }

        if let (Some(frame), Some(output)) = (frame_out, self.output.as_ref()) {
            if let Err(mpsc::error::TrySendError::Full(_)) = output.try_send(frame) {
                tracing::warn!("Playback output is not keeping up, dropping frame");
            }
        }
        for event in events {
            let _ = self.events.send(event);
        }
        true
    }

    fn start_next(inner: &mut Inner, frame_ms: u64, events: &mut Vec<PlaybackEvent>) -> bool {
        let Some(segment) = inner.queue.pop_front() else {
            return false;
        };
        let aligned = segment.start_offset_ms - segment.start_offset_ms % frame_ms;
        let offset_ms = aligned.min(segment.duration_ms());

        events.push(PlaybackEvent::SegmentStarted {
            response_id: segment.response_id,
            index: segment.index,
            text: segment.text.clone(),
        });
        inner.last_position = PlaybackPosition::new(segment.index, offset_ms);
        inner.current = Some(Playing { segment, offset_ms });
        true
    }

    /// Drive `tick` from a tokio interval until cancelled
    pub fn spawn_clock(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(this.frame_ms));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        this.tick();
                    }
                }
            }
            tracing::debug!("Playback clock stopped");
        })
    }
}

impl PlaybackController for QueuedPlayback {
    fn enqueue(&self, segment: AudioSegment) -> Result<(), PlaybackError> {
        if segment.sample_rate == 0 {
            return Err(PlaybackError::InvalidSegment(format!(
                "segment {} has a zero sample rate",
                segment.index
            )));
        }
        tracing::debug!(
            response_id = segment.response_id,
            index = segment.index,
            duration_ms = segment.duration_ms(),
            start_offset_ms = segment.start_offset_ms,
            "Segment enqueued"
        );
        self.inner.lock().queue.push_back(segment);
        Ok(())
    }

    fn pause(&self) -> PlaybackPosition {
        let mut inner = self.inner.lock();
        inner.paused = true;
        let position = match &inner.current {
            Some(playing) => PlaybackPosition::new(playing.segment.index, playing.offset_ms),
            None => inner.last_position,
        };
        tracing::debug!(
            segment_index = position.segment_index,
            offset_ms = position.offset_ms,
            "Playback paused"
        );
        position
    }

    fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.paused = false;
            tracing::debug!(
                segment_index = inner.last_position.segment_index,
                offset_ms = inner.last_position.offset_ms,
                "Playback resumed"
            );
        }
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.queue.len() + usize::from(inner.current.is_some());
        inner.queue.clear();
        inner.current = None;
        inner.paused = false;
        tracing::debug!(dropped, "Playback stopped");
    }

    fn current_position(&self) -> PlaybackPosition {
        let inner = self.inner.lock();
        match &inner.current {
            Some(playing) => PlaybackPosition::new(playing.segment.index, playing.offset_ms),
            None => inner.last_position,
        }
    }

    fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: usize, duration_ms: u64) -> AudioSegment {
        AudioSegment {
            response_id: 1,
            index,
            text: format!("segment {}", index),
            samples: vec![0.1; (16 * duration_ms) as usize].into(),
            sample_rate: 16000,
            start_offset_ms: 0,
        }
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let playback = QueuedPlayback::new(20);
        playback.enqueue(segment(0, 200)).unwrap();
        for _ in 0..3 {
            assert!(playback.tick());
        }

        let paused_at = playback.pause();
        assert_eq!(paused_at, PlaybackPosition::new(0, 60));
        assert!(!playback.tick());
        assert_eq!(playback.current_position(), paused_at);

        playback.resume();
        assert_eq!(playback.current_position(), paused_at);
        assert!(playback.tick());
        assert_eq!(playback.current_position(), PlaybackPosition::new(0, 80));
    }

    #[test]
    fn test_enqueue_while_paused_keeps_position() {
        let playback = QueuedPlayback::new(20);
        playback.enqueue(segment(0, 100)).unwrap();
        playback.tick();
        let paused_at = playback.pause();
        playback.enqueue(segment(1, 100)).unwrap();
        playback.resume();
        assert_eq!(playback.current_position(), paused_at);
    }

    #[tokio::test]
    async fn test_next_segment_starts_in_same_tick() {
        let playback = QueuedPlayback::new(20);
        let mut events = playback.subscribe();
        playback.enqueue(segment(0, 40)).unwrap();
        playback.enqueue(segment(1, 40)).unwrap();

        playback.tick();
        playback.tick();

        assert!(matches!(
            events.recv().await.unwrap(),
            PlaybackEvent::SegmentStarted { index: 0, .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::SegmentFinished { response_id: 1, index: 0 }
        );
        match events.recv().await.unwrap() {
            PlaybackEvent::SegmentStarted { index, text, .. } => {
                assert_eq!(index, 1);
                assert_eq!(text, "segment 1");
            },
            other => panic!("unexpected event {:?}", other),
        }

        playback.tick();
        playback.tick();
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::SegmentFinished { response_id: 1, index: 1 }
        );
        assert_eq!(events.recv().await.unwrap(), PlaybackEvent::Drained);
        assert!(playback.is_idle());
    }

    #[test]
    fn test_resume_offset_aligned_to_frame() {
        let playback = QueuedPlayback::new(20);
        let mut seg = segment(2, 200);
        seg.start_offset_ms = 75;
        playback.enqueue(seg).unwrap();
        playback.tick();
        assert_eq!(playback.current_position(), PlaybackPosition::new(2, 80));
    }

    #[test]
    fn test_stop_clears_queue() {
        let playback = QueuedPlayback::new(20);
        playback.enqueue(segment(0, 100)).unwrap();
        playback.enqueue(segment(1, 100)).unwrap();
        playback.tick();
        playback.pause();
        playback.stop();
        assert!(playback.is_idle());
        assert!(!playback.is_paused());
        assert!(!playback.tick());
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let playback = QueuedPlayback::new(20);
        let mut seg = segment(0, 100);
        seg.sample_rate = 0;
        assert!(playback.enqueue(seg).is_err());
    }

    #[tokio::test]
    async fn test_output_frames() {
        let (tx, mut rx) = mpsc::channel(8);
        let playback = QueuedPlayback::new(20).with_output(tx);
        playback.enqueue(segment(0, 40)).unwrap();
        playback.tick();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 320);
        assert_eq!(frame.offset_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_drains_queue() {
        let playback = Arc::new(QueuedPlayback::new(20));
        let mut events = playback.subscribe();
        playback.enqueue(segment(0, 60)).unwrap();

        let cancel = CancellationToken::new();
        let clock = playback.spawn_clock(cancel.clone());

        loop {
            if events.recv().await.unwrap() == PlaybackEvent::Drained {
                break;
            }
        }
        cancel.cancel();
        clock.await.unwrap();
        assert_eq!(playback.current_position(), PlaybackPosition::new(0, 60));
    }
}
