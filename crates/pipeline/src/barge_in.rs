//! Two-stage barge-in detection
//!
//! While the AI is speaking, every VAD observation is checked against an
//! elevated threshold:
//!
//! - Stage 1: confidence stays at or above the threshold for
//!   `min_sustain_ms` of audio. The window goes `Armed -> TentativePause` and
//!   playback is paused (never stopped).
//! - Stage 2: if confidence holds through `confirm_window_ms` the window is
//!   `Confirmed` and carries the pause point. A frame below threshold first
//!   makes it a `FalsePositive` and playback resumes from the stored point.
//!
//! Only one window exists at a time. A window that dips below threshold
//! before reaching the pause is discarded without any event, so observers
//! only ever see Armed, TentativePause, then exactly one terminal event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_tutor_config::BargeInConfig;
use voice_tutor_core::{PlaybackController, PlaybackPosition, TelemetryEvent, TelemetrySink};

use crate::frame_source::VadObservation;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInMonitorConfig {
    pub threshold: f32,
    pub min_sustain_ms: u64,
    pub confirm_window_ms: u64,
}

impl Default for BargeInMonitorConfig {
    fn default() -> Self {
        Self::from(&BargeInConfig::default())
    }
}

impl From<&BargeInConfig> for BargeInMonitorConfig {
    fn from(config: &BargeInConfig) -> Self {
        Self {
            threshold: config.threshold,
            min_sustain_ms: config.min_sustain_ms,
            confirm_window_ms: config.confirm_window_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Armed,
    TentativePause,
    Confirmed,
    FalsePositive,
}

impl WindowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WindowState::Confirmed | WindowState::FalsePositive)
    }
}

/// A candidate interruption, from threshold crossing to resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct BargeInWindow {
    pub id: u64,
    pub state: WindowState,
    /// Capture timestamp of the frame that crossed the threshold
    pub triggered_at_ms: u64,
    /// Peak confidence seen in this window
    pub confidence: f32,
    pub paused_segment_index: Option<usize>,
    pub paused_playback_offset_ms: Option<u64>,
    sustained_ms: u64,
    confirm_elapsed_ms: u64,
    last_confidence: f32,
    last_seen_ms: u64,
}

impl BargeInWindow {
    fn open(confidence: f32, timestamp_ms: u64) -> Self {
        Self {
            id: NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed),
            state: WindowState::Armed,
            triggered_at_ms: timestamp_ms,
            confidence,
            paused_segment_index: None,
            paused_playback_offset_ms: None,
            sustained_ms: 0,
            confirm_elapsed_ms: 0,
            last_confidence: confidence,
            last_seen_ms: timestamp_ms,
        }
    }

    fn pause_position(&self) -> PlaybackPosition {
        PlaybackPosition::new(
            self.paused_segment_index.unwrap_or_default(),
            self.paused_playback_offset_ms.unwrap_or_default(),
        )
    }

    fn event(&self, kind: BargeInEventKind) -> BargeInEvent {
        let at_ms = match kind {
            BargeInEventKind::Armed => self.triggered_at_ms,
            _ => self.last_seen_ms,
        };
        BargeInEvent {
            window_id: self.id,
            kind,
            confidence: self.confidence,
            at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BargeInEventKind {
    Armed,
    TentativePause { position: PlaybackPosition },
    Confirmed { position: PlaybackPosition },
    /// Speech stopped before confirmation; playback resumed from the pause point
    FalsePositive,
}

impl BargeInEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BargeInEventKind::Armed => "armed",
            BargeInEventKind::TentativePause { .. } => "tentative_pause",
            BargeInEventKind::Confirmed { .. } => "confirmed",
            BargeInEventKind::FalsePositive => "false_positive",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BargeInEventKind::Confirmed { .. } | BargeInEventKind::FalsePositive
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BargeInEvent {
    pub window_id: u64,
    pub kind: BargeInEventKind,
    pub confidence: f32,
    pub at_ms: u64,
}

/// The only view of playback the barge-in path gets: it may pause, resume and
/// read the position, never touch the queue.
#[derive(Clone)]
pub struct PauseHandle {
    playback: Arc<dyn PlaybackController>,
}

impl PauseHandle {
    pub fn new(playback: Arc<dyn PlaybackController>) -> Self {
        Self { playback }
    }

    pub fn pause(&self) -> PlaybackPosition {
        self.playback.pause()
    }

    pub fn resume(&self) {
        self.playback.resume()
    }

    pub fn position(&self) -> PlaybackPosition {
        self.playback.current_position()
    }
}

/// Synchronous barge-in state machine, driven one observation at a time.
pub struct BargeInDetector {
    config: BargeInMonitorConfig,
    window: Option<BargeInWindow>,
}

impl BargeInDetector {
    pub fn new(config: BargeInMonitorConfig) -> Self {
        Self {
            config,
            window: None,
        }
    }

    /// The unresolved window, if any
    pub fn active_window(&self) -> Option<&BargeInWindow> {
        self.window.as_ref()
    }

    /// Drop the unresolved window without a terminal event. A window that
    /// already paused playback hands it back first. Returns the dropped
    /// window's id.
    pub fn abandon(&mut self, playback: &PauseHandle) -> Option<u64> {
        let window = self.window.take()?;
        if window.state == WindowState::TentativePause {
            playback.resume();
            tracing::debug!(window_id = window.id, "Unresolved barge-in abandoned, playback resumed");
        }
        Some(window.id)
    }

    /// Feed one observation covering `duration_ms` of audio.
    pub fn observe(
        &mut self,
        confidence: f32,
        timestamp_ms: u64,
        duration_ms: u64,
        playback: &PauseHandle,
    ) -> Vec<BargeInEvent> {
        let above = confidence >= self.config.threshold;
        let mut events = Vec::new();

        let Some(mut window) = self.window.take() else {
            if above {
                let mut window = BargeInWindow::open(confidence, timestamp_ms);
                window.sustained_ms = duration_ms;
                window.last_seen_ms = timestamp_ms + duration_ms;
                tracing::debug!(
                    window_id = window.id,
                    confidence,
                    timestamp_ms,
                    "Barge-in window armed"
                );
                self.advance_armed(window, playback, &mut events);
            }
            return events;
        };

        window.last_confidence = confidence;
        window.last_seen_ms = timestamp_ms + duration_ms;

        match window.state {
            WindowState::Armed if above => {
                window.confidence = window.confidence.max(confidence);
                window.sustained_ms += duration_ms;
                self.advance_armed(window, playback, &mut events);
            },
            WindowState::Armed => {
                tracing::debug!(
                    window_id = window.id,
                    sustained_ms = window.sustained_ms,
                    "Barge-in window collapsed before pause"
                );
            },
            WindowState::TentativePause if above => {
                window.confidence = window.confidence.max(confidence);
                window.confirm_elapsed_ms += duration_ms;
                if window.confirm_elapsed_ms >= self.config.confirm_window_ms {
                    events.push(Self::confirm(window));
                } else {
                    self.window = Some(window);
                }
            },
            WindowState::TentativePause => {
                events.push(Self::reject(window, playback));
            },
            WindowState::Confirmed | WindowState::FalsePositive => {},
        }

        events
    }

    /// The confirmation timer ran out without a frame resolving the window.
    pub fn expire(&mut self, playback: &PauseHandle) -> Vec<BargeInEvent> {
        match self.window.take() {
            Some(window) if window.state == WindowState::TentativePause => {
                if window.last_confidence >= self.config.threshold {
                    vec![Self::confirm(window)]
                } else {
                    vec![Self::reject(window, playback)]
                }
            },
            other => {
                self.window = other;
                Vec::new()
            },
        }
    }

    fn advance_armed(
        &mut self,
        mut window: BargeInWindow,
        playback: &PauseHandle,
        events: &mut Vec<BargeInEvent>,
    ) {
        if window.sustained_ms < self.config.min_sustain_ms {
            self.window = Some(window);
            return;
        }

        events.push(window.event(BargeInEventKind::Armed));
        let position = playback.pause();
        window.state = WindowState::TentativePause;
        window.paused_segment_index = Some(position.segment_index);
        window.paused_playback_offset_ms = Some(position.offset_ms);
        tracing::info!(
            window_id = window.id,
            segment_index = position.segment_index,
            offset_ms = position.offset_ms,
            confidence = window.confidence,
            "Barge-in tentative pause"
        );
        events.push(window.event(BargeInEventKind::TentativePause { position }));
        self.window = Some(window);
    }

    fn confirm(mut window: BargeInWindow) -> BargeInEvent {
        window.state = WindowState::Confirmed;
        let position = window.pause_position();
        tracing::info!(
            window_id = window.id,
            segment_index = position.segment_index,
            offset_ms = position.offset_ms,
            confidence = window.confidence,
            "Barge-in confirmed"
        );
        window.event(BargeInEventKind::Confirmed { position })
    }

    fn reject(mut window: BargeInWindow, playback: &PauseHandle) -> BargeInEvent {
        window.state = WindowState::FalsePositive;
        playback.resume();
        tracing::info!(
            window_id = window.id,
            confirm_elapsed_ms = window.confirm_elapsed_ms,
            "Barge-in false positive, playback resumed"
        );
        window.event(BargeInEventKind::FalsePositive)
    }
}

/// Runs a [`BargeInDetector`] against live VAD observations while the AI
/// speaks, with a tokio timer as the stage 2 deadline.
///
/// The monitor stops after a confirmed barge-in, when cancelled, or when the
/// observation stream closes. However it stops, an unresolved window is
/// dropped without a terminal event and playback it paused is resumed.
pub struct BargeInMonitor {
    detector: BargeInDetector,
    confirm_window: Duration,
    playback: PauseHandle,
    events: mpsc::Sender<BargeInEvent>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl BargeInMonitor {
    pub fn new(
        config: BargeInMonitorConfig,
        playback: PauseHandle,
        events: mpsc::Sender<BargeInEvent>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            confirm_window: Duration::from_millis(config.confirm_window_ms),
            detector: BargeInDetector::new(config),
            playback,
            events,
            telemetry,
        }
    }

    pub fn spawn(
        self,
        frames: broadcast::Receiver<VadObservation>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(frames, cancel))
    }

    pub async fn run(
        mut self,
        mut frames: broadcast::Receiver<VadObservation>,
        cancel: CancellationToken,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            let events = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Some(window_id) = self.detector.abandon(&self.playback) {
                        tracing::debug!(window_id, "Barge-in monitor cancelled with unresolved window");
                    }
                    return;
                }
                _ = wait_until(deadline) => {
                    deadline = None;
                    self.detector.expire(&self.playback)
                }
                received = frames.recv() => match received {
                    Ok(obs) => self.detector.observe(
                        obs.confidence(),
                        obs.timestamp_ms(),
                        obs.frame.duration_ms,
                        &self.playback,
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Barge-in monitor lagging behind audio");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.detector.abandon(&self.playback);
                        return;
                    }
                },
            };

            for event in events {
                let confirmed = matches!(event.kind, BargeInEventKind::Confirmed { .. });
                match &event.kind {
                    BargeInEventKind::TentativePause { .. } => {
                        deadline = Some(Instant::now() + self.confirm_window);
                    },
                    kind if kind.is_terminal() => {
                        deadline = None;
                        self.telemetry.emit(TelemetryEvent::BargeInResolved {
                            window_id: event.window_id,
                            outcome: kind.as_str(),
                            confidence: event.confidence,
                        });
                    },
                    _ => {},
                }

                if self.events.send(event).await.is_err() {
                    self.detector.abandon(&self.playback);
                    return;
                }
                if confirmed {
                    return;
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use crate::playback::QueuedPlayback;
    use voice_tutor_core::{
        AudioFrame, AudioSegment, Channels, NoopTelemetry, PlaybackError, PlaybackEvent,
        SampleRate, VadDecision,
    };

    fn audio_segment(response_id: u64, index: usize, duration_ms: u64) -> AudioSegment {
        AudioSegment {
            response_id,
            index,
            text: format!("segment {}", index),
            samples: vec![0.1; (16 * duration_ms) as usize].into(),
            sample_rate: 16000,
            start_offset_ms: 0,
        }
    }

    #[derive(Default)]
    struct CountingPlayback {
        pauses: AtomicUsize,
        resumes: AtomicUsize,
        position: Mutex<PlaybackPosition>,
    }

    impl PlaybackController for CountingPlayback {
        fn enqueue(&self, _segment: AudioSegment) -> Result<(), PlaybackError> {
            Ok(())
        }
        fn pause(&self) -> PlaybackPosition {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            *self.position.lock()
        }
        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&self) {}
        fn current_position(&self) -> PlaybackPosition {
            *self.position.lock()
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
            broadcast::channel(1).1
        }
    }

    fn playback() -> (Arc<CountingPlayback>, PauseHandle) {
        let playback = Arc::new(CountingPlayback::default());
        *playback.position.lock() = PlaybackPosition::new(2, 340);
        let handle = PauseHandle::new(playback.clone());
        (playback, handle)
    }

    fn observation(confidence: f32, timestamp_ms: u64) -> VadObservation {
        VadObservation {
            frame: AudioFrame::new(
                vec![0.0; 320],
                SampleRate::Hz16000,
                Channels::Mono,
                timestamp_ms / 20,
                timestamp_ms,
            ),
            decision: VadDecision::new(confidence >= 0.5, confidence),
        }
    }

    struct Harness {
        frames: broadcast::Sender<VadObservation>,
        events: mpsc::Receiver<BargeInEvent>,
        cancel: CancellationToken,
        playback: Arc<CountingPlayback>,
        clock_ms: u64,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start() -> Self {
            let (playback, handle) = playback();
            let (frames, frames_rx) = broadcast::channel(256);
            let (tx, events) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            let monitor = BargeInMonitor::new(
                BargeInMonitorConfig::default(),
                handle,
                tx,
                Arc::new(NoopTelemetry),
            );
            let task = monitor.spawn(frames_rx, cancel.clone());
            Self {
                frames,
                events,
                cancel,
                playback,
                clock_ms: 0,
                task,
            }
        }

        /// Push `duration_ms` worth of 20ms frames at `confidence`
        fn feed(&mut self, confidence: f32, duration_ms: u64) {
            for _ in 0..duration_ms / 20 {
                self.frames.send(observation(confidence, self.clock_ms)).unwrap();
                self.clock_ms += 20;
            }
        }

        async fn next_event(&mut self) -> Option<BargeInEvent> {
            tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .ok()
                .flatten()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_never_emits() {
        let mut h = Harness::start();
        for confidence in [0.3, 0.4, 0.3] {
            h.feed(confidence, 200);
        }
        assert!(h.next_event().await.is_none());
        assert_eq!(h.playback.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(h.playback.resumes.load(Ordering::SeqCst), 0);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_speech_confirms() {
        let mut h = Harness::start();
        for confidence in [0.8, 0.85, 0.9] {
            h.feed(confidence, 200);
        }

        let armed = h.next_event().await.unwrap();
        assert_eq!(armed.kind, BargeInEventKind::Armed);

        let paused = h.next_event().await.unwrap();
        assert_eq!(paused.window_id, armed.window_id);
        assert_eq!(
            paused.kind,
            BargeInEventKind::TentativePause { position: PlaybackPosition::new(2, 340) }
        );

        let confirmed = h.next_event().await.unwrap();
        assert_eq!(confirmed.window_id, armed.window_id);
        assert_eq!(
            confirmed.kind,
            BargeInEventKind::Confirmed { position: PlaybackPosition::new(2, 340) }
        );

        assert_eq!(h.playback.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(h.playback.resumes.load(Ordering::SeqCst), 0);

        // Monitor stops after confirmation
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_burst_is_false_positive() {
        let mut h = Harness::start();
        h.feed(0.8, 100);
        h.feed(0.2, 500);

        assert_eq!(h.next_event().await.unwrap().kind, BargeInEventKind::Armed);
        assert!(matches!(
            h.next_event().await.unwrap().kind,
            BargeInEventKind::TentativePause { .. }
        ));
        assert_eq!(h.next_event().await.unwrap().kind, BargeInEventKind::FalsePositive);
        assert!(h.next_event().await.is_none());

        assert_eq!(h.playback.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(h.playback.resumes.load(Ordering::SeqCst), 1);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_window_and_releases_pause() {
        let mut h = Harness::start();
        h.feed(0.9, 100);

        assert_eq!(h.next_event().await.unwrap().kind, BargeInEventKind::Armed);
        assert!(matches!(
            h.next_event().await.unwrap().kind,
            BargeInEventKind::TentativePause { .. }
        ));

        h.cancel.cancel();
        h.task.await.unwrap();
        assert!(h.events.recv().await.is_none());
        assert_eq!(h.playback.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(h.playback.resumes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_releases_pause() {
        let mut h = Harness::start();
        h.events.close();
        h.feed(0.9, 100);
        h.task.await.unwrap();
        assert_eq!(h.playback.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(h.playback.resumes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_drain_leaves_playback_usable() {
        let playback = Arc::new(QueuedPlayback::new(20));
        playback.enqueue(audio_segment(1, 0, 40)).unwrap();
        while playback.tick() {}
        assert!(playback.is_idle());

        let (frames, frames_rx) = broadcast::channel(64);
        let (tx, mut events) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = BargeInMonitor::new(
            BargeInMonitorConfig::default(),
            PauseHandle::new(playback.clone()),
            tx,
            Arc::new(NoopTelemetry),
        )
        .spawn(frames_rx, cancel.clone());

        // The reply lands just after the last segment drained
        for i in 0..4 {
            frames.send(observation(0.9, 40 + i * 20)).unwrap();
        }
        assert_eq!(events.recv().await.unwrap().kind, BargeInEventKind::Armed);
        assert_eq!(
            events.recv().await.unwrap().kind,
            BargeInEventKind::TentativePause { position: PlaybackPosition::new(0, 40) }
        );
        assert!(playback.is_paused());

        cancel.cancel();
        task.await.unwrap();
        assert!(!playback.is_paused());

        playback.enqueue(audio_segment(2, 0, 40)).unwrap();
        assert!(playback.tick());
    }

    #[test]
    fn test_blip_below_sustain_is_silent() {
        let (counting, handle) = playback();
        let mut detector = BargeInDetector::new(BargeInMonitorConfig::default());

        assert!(detector.observe(0.9, 0, 20, &handle).is_empty());
        assert_eq!(
            detector.active_window().map(|w| w.state),
            Some(WindowState::Armed)
        );

        assert!(detector.observe(0.1, 20, 20, &handle).is_empty());
        assert!(detector.active_window().is_none());
        assert_eq!(counting.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(counting.resumes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_armed_reported_with_pause() {
        let (_counting, handle) = playback();
        let mut detector = BargeInDetector::new(BargeInMonitorConfig::default());
        assert!(detector.observe(0.9, 100, 20, &handle).is_empty());
        assert!(detector.observe(0.9, 120, 20, &handle).is_empty());

        let events = detector.observe(0.9, 140, 20, &handle);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, BargeInEventKind::Armed);
        assert_eq!(events[0].at_ms, 100);
        assert!(matches!(events[1].kind, BargeInEventKind::TentativePause { .. }));
        assert_eq!(events[0].window_id, events[1].window_id);
    }

    #[test]
    fn test_confirms_on_frame_time() {
        let (counting, handle) = playback();
        let mut detector = BargeInDetector::new(BargeInMonitorConfig::default());
        let mut kinds = Vec::new();
        let mut ts = 0;
        // 60ms to pause, then 600ms of confirmation
        for _ in 0..33 {
            kinds.extend(detector.observe(0.75, ts, 20, &handle).into_iter().map(|e| e.kind));
            ts += 20;
        }
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[2], BargeInEventKind::Confirmed { .. }));
        assert_eq!(counting.pauses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (_counting, handle) = playback();
        let mut detector = BargeInDetector::new(BargeInMonitorConfig::default());
        detector.observe(0.7, 0, 20, &handle);
        assert!(detector.active_window().is_some());
        detector.observe(0.69, 20, 20, &handle);
        assert!(detector.active_window().is_none());
    }

    #[test]
    fn test_expire_without_pause_is_noop() {
        let (_counting, handle) = playback();
        let mut detector = BargeInDetector::new(BargeInMonitorConfig::default());
        detector.observe(0.9, 0, 20, &handle);
        assert!(detector.expire(&handle).is_empty());
        assert_eq!(detector.active_window().map(|w| w.state), Some(WindowState::Armed));
    }

    #[test]
    fn test_single_window_and_event_order() {
        let (counting, handle) = playback();
        let mut detector = BargeInDetector::new(BargeInMonitorConfig::default());

        // Mix of bursts, dips and silence
        let pattern = [
            0.9, 0.9, 0.1, 0.8, 0.8, 0.8, 0.8, 0.2, 0.3, 0.95, 0.4, 0.72, 0.75, 0.8, 0.1, 0.0,
        ];
        let mut open: Option<(u64, BargeInEventKind)> = None;
        let mut ts = 0;
        for confidence in pattern.iter().cycle().take(160) {
            for event in detector.observe(*confidence, ts, 20, &handle) {
                open = match (open.take(), event.kind) {
                    (None, BargeInEventKind::Armed) => Some((event.window_id, BargeInEventKind::Armed)),
                    (Some((id, BargeInEventKind::Armed)), kind @ BargeInEventKind::TentativePause { .. }) => {
                        assert_eq!(id, event.window_id);
                        Some((id, kind))
                    },
                    (Some((id, BargeInEventKind::TentativePause { .. })), kind) if kind.is_terminal() => {
                        assert_eq!(id, event.window_id);
                        None
                    },
                    (state, kind) => panic!("out of order: {:?} then {:?}", state, kind),
                };
            }
            assert!(detector
                .active_window()
                .map(|w| !w.state.is_terminal())
                .unwrap_or(true));
            ts += 20;
        }

        let pauses = counting.pauses.load(Ordering::SeqCst);
        let resumes = counting.resumes.load(Ordering::SeqCst);
        assert!(pauses > 0);
        assert_eq!(pauses, resumes);
    }
}
