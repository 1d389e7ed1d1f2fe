//! Session orchestration
//!
//! One session is one spawned loop owning the turn state, the playback queue
//! and every task that feeds it:
//!
//! ```text
//! submit_frame -> FrameSource --+--> session loop (turn gating, pre-roll)
//!                               +--> BargeInMonitor (AISpeaking only)
//!
//! session loop --> STT / LLM tasks --> ProviderResolver
//!              --> segment pump --> ResponseStream (TTS) --> PlaybackController
//! ```
//!
//! Results come back to the loop over channels, so state only ever changes
//! inside the loop. Work started for a turn carries the epoch it was started
//! in; results from an abandoned epoch are dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voice_tutor_config::{DegradedMessages, Settings};
use voice_tutor_core::{
    concat_samples, AudioFrame, CapabilityError, CapabilityKind, PlaybackController,
    PlaybackEvent, PlaybackPosition, TelemetryEvent, TelemetrySink, Turn, VadDecision,
    VoiceActivityDetector,
};
use voice_tutor_pipeline::{
    BargeInEvent, BargeInEventKind, BargeInMonitor, BargeInMonitorConfig, EnergyVad,
    EnergyVadConfig, FrameSource, PauseHandle, PlaybackOutputFrame, QueuedPlayback,
    VadObservation,
};
use voice_tutor_providers::{ProviderResolver, Resolved, SessionConditions};

use crate::response::{ResponseGenerator, ResponseStream};
use crate::resume_policy::{ResumeDecision, ResumePolicy};
use crate::state::{transition, SessionState, TurnEvent};
use crate::telemetry::TracingTelemetry;
use crate::AgentError;

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 16;
const WORK_CAPACITY: usize = 32;
const BARGE_IN_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub silence_timeout_ms: u64,
    /// Baseline VAD confidence that opens a user turn
    pub speech_threshold: f32,
    /// Silence after an answered interjection that resumes the interrupted response
    pub resume_after_silence_ms: u64,
    pub max_context_turns: usize,
    pub system_prompt: String,
    pub degraded: DegradedMessages,
    pub barge_in_enabled: bool,
    pub barge_in: BargeInMonitorConfig,
    pub preroll_ms: u64,
    pub resume_policy: ResumePolicy,
    pub cost_budget: Option<f64>,
}

impl From<&Settings> for OrchestratorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            silence_timeout_ms: settings.session.silence_timeout_ms,
            speech_threshold: settings.session.speech_threshold,
            resume_after_silence_ms: settings.session.resume_after_silence_ms,
            max_context_turns: settings.session.max_context_turns,
            system_prompt: settings.session.system_prompt.clone(),
            degraded: settings.session.degraded_messages.clone(),
            barge_in_enabled: settings.barge_in.enabled,
            barge_in: BargeInMonitorConfig::from(&settings.barge_in),
            preroll_ms: settings.barge_in.preroll_ms,
            resume_policy: ResumePolicy::from_config(&settings.resume_policy),
            cost_budget: settings.providers.cost_budget,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// What a session reports to its observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
        trigger: TurnEvent,
    },
    Transcript {
        turn_id: u64,
        text: String,
    },
    /// Published when the segment's audio starts playing, never earlier
    SegmentText {
        response_id: u64,
        index: usize,
        text: String,
    },
    BargeIn(BargeInEvent),
    /// An interrupted response continues from its pause point
    Resumed {
        position: PlaybackPosition,
    },
    /// A capability ran out of candidates; `message` stands in for the answer
    Degraded {
        kind: CapabilityKind,
        message: String,
        error: String,
    },
    TurnClosed(Turn),
}

#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Speak prepared text without an LLM call
    Present(String),
    Reset,
}

/// Builds sessions from shared providers and per-session audio I/O
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    resolver: Arc<ProviderResolver>,
    vad: Arc<dyn VoiceActivityDetector>,
    playback: Arc<dyn PlaybackController>,
    telemetry: Arc<dyn TelemetrySink>,
    /// Playback queue the session clocks itself
    clock: Option<Arc<QueuedPlayback>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        resolver: Arc<ProviderResolver>,
        vad: Arc<dyn VoiceActivityDetector>,
        playback: Arc<dyn PlaybackController>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            resolver,
            vad,
            playback,
            telemetry,
            clock: None,
        }
    }

    /// A session with the built-in audio path: energy VAD and a playback
    /// queue ticking every `playback.frame_ms`, writing played frames to
    /// `output`. The clock runs for as long as the session does.
    pub fn from_settings(
        settings: &Settings,
        resolver: Arc<ProviderResolver>,
        output: mpsc::Sender<PlaybackOutputFrame>,
    ) -> Self {
        let vad = EnergyVad::new(EnergyVadConfig {
            speech_threshold: settings.session.speech_threshold,
            ..EnergyVadConfig::default()
        });
        let playback = Arc::new(QueuedPlayback::new(settings.playback.frame_ms).with_output(output));
        let mut orchestrator = Self::new(
            OrchestratorConfig::from(settings),
            resolver,
            Arc::new(vad),
            playback.clone(),
            Arc::new(TracingTelemetry::new()),
        );
        orchestrator.clock = Some(playback);
        orchestrator
    }

    /// Spawn the session loop
    pub fn start(self) -> SessionHandle {
        let frame_source = Arc::new(FrameSource::new(self.vad));
        let frames = frame_source.subscribe();
        let playback_events = self.playback.subscribe();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (work_tx, work_rx) = mpsc::channel(WORK_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let cancel = CancellationToken::new();
        let barge_ins = Arc::new(AtomicU64::new(0));

        if let Some(playback) = &self.clock {
            playback.spawn_clock(cancel.child_token());
        }

        let conditions = Arc::new(SessionConditions::new(self.config.cost_budget));
        let generator = Arc::new(ResponseGenerator::new(
            Arc::clone(&self.resolver),
            Arc::clone(&conditions),
            self.config.system_prompt.clone(),
            self.config.max_context_turns,
        ));

        let session = SessionLoop {
            config: self.config,
            state: SessionState::Idle,
            state_tx,
            events: event_tx.clone(),
            telemetry: self.telemetry,
            resolver: self.resolver,
            conditions: Arc::clone(&conditions),
            generator,
            playback: self.playback,
            frame_source: Arc::clone(&frame_source),
            work_tx,
            cancel: cancel.clone(),
            recent: VecDeque::new(),
            capture: Vec::new(),
            last_speech_end_ms: 0,
            timer: None,
            epoch: 0,
            next_turn_id: 0,
            next_run_id: 0,
            turn: None,
            history: VecDeque::new(),
            work_task: None,
            pump: None,
            monitor: None,
            interrupted: None,
            barge_in_segment: None,
            barge_ins: Arc::clone(&barge_ins),
        };

        let task = tokio::spawn(session.run(frames, playback_events, command_rx, work_rx));

        SessionHandle {
            frame_source,
            commands: command_tx,
            events: event_tx,
            state: state_rx,
            conditions,
            barge_ins,
            cancel,
            task,
        }
    }
}

/// The caller's side of a running session
pub struct SessionHandle {
    frame_source: Arc<FrameSource>,
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    conditions: Arc<SessionConditions>,
    barge_ins: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Feed one captured audio frame
    pub fn submit_frame(&self, frame: AudioFrame) -> Result<VadDecision, AgentError> {
        Ok(self.frame_source.submit_frame(frame)?)
    }

    /// Speak prepared text (e.g. lecture material). Ignored unless idle.
    pub async fn present(&self, text: impl Into<String>) -> Result<(), AgentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AgentError::EmptyPresentation);
        }
        self.send(SessionCommand::Present(text)).await
    }

    /// Abandon whatever is in flight and return to idle
    pub async fn reset(&self) -> Result<(), AgentError> {
        self.send(SessionCommand::Reset).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), AgentError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AgentError::SessionClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Live routing conditions (thermal, network, budget) for this session
    pub fn conditions(&self) -> &Arc<SessionConditions> {
        &self.conditions
    }

    /// Confirmed barge-ins so far
    pub fn barge_in_count(&self) -> u64 {
        self.barge_ins.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Session task ended abnormally");
        }
    }
}

enum Work {
    Transcribed {
        epoch: u64,
        result: Result<Resolved<String>, CapabilityError>,
    },
    Generated {
        epoch: u64,
        result: Result<(ResponseStream, u64), CapabilityError>,
    },
    Pump {
        run_id: u64,
        event: PumpEvent,
    },
}

enum PumpEvent {
    Enqueued { index: usize, tts_ms: u64 },
    /// Every segment has been handed to playback
    Done,
    Failed { kind: CapabilityKind, error: String },
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Silence,
    Resume,
}

struct TurnInProgress {
    turn: Turn,
    /// End of user speech; latencies are measured from here
    speech_end: Option<Instant>,
}

struct PumpRun {
    run_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<ResponseStream>,
    enqueued: usize,
    finished: usize,
    done: bool,
}

struct MonitorRun {
    cancel: CancellationToken,
    events: mpsc::Receiver<BargeInEvent>,
}

/// A response cut short by a confirmed barge-in, kept for resumption
struct InterruptedResponse {
    stream: ResponseStream,
    position: PlaybackPosition,
    /// The interjection that interrupted it has been answered
    answered: bool,
}

struct SessionLoop {
    config: OrchestratorConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    telemetry: Arc<dyn TelemetrySink>,
    resolver: Arc<ProviderResolver>,
    conditions: Arc<SessionConditions>,
    generator: Arc<ResponseGenerator>,
    playback: Arc<dyn PlaybackController>,
    frame_source: Arc<FrameSource>,
    work_tx: mpsc::Sender<Work>,
    cancel: CancellationToken,

    /// Recent frames, bounded by the pre-roll length
    recent: VecDeque<VadObservation>,
    capture: Vec<AudioFrame>,
    last_speech_end_ms: u64,
    timer: Option<(Instant, Timer)>,

    epoch: u64,
    next_turn_id: u64,
    next_run_id: u64,
    turn: Option<TurnInProgress>,
    history: VecDeque<Turn>,
    work_task: Option<JoinHandle<()>>,
    pump: Option<PumpRun>,
    monitor: Option<MonitorRun>,
    interrupted: Option<InterruptedResponse>,
    /// Text that was playing when the user last barged in, until their
    /// utterance is answered
    barge_in_segment: Option<String>,
    barge_ins: Arc<AtomicU64>,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut frames: broadcast::Receiver<VadObservation>,
        mut playback_events: broadcast::Receiver<PlaybackEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut work: mpsc::Receiver<Work>,
    ) {
        tracing::info!("Session started");
        let cancel = self.cancel.clone();

        loop {
            let deadline = self.timer.map(|(at, _)| at);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone
                    None => break,
                },
                Some(event) = next_barge_in(&mut self.monitor) => self.handle_barge_in(event).await,
                Some(item) = work.recv() => self.handle_work(item),
                received = playback_events.recv() => match received {
                    Ok(event) => self.handle_playback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session lagging behind playback events");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                received = frames.recv() => match received {
                    Ok(observation) => self.handle_frame(observation),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session lagging behind audio frames");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = wait_until(deadline) => self.handle_timer(),
            }
        }

        self.teardown().await;
        tracing::info!("Session ended");
    }

    // ---------------------------------------------------------------------
    // State and events
    // ---------------------------------------------------------------------

    fn apply(&mut self, event: TurnEvent) {
        let from = self.state;
        let to = transition(from, event);
        if from == to {
            tracing::trace!(state = from.as_str(), trigger = event.as_str(), "Event left state unchanged");
            return;
        }

        self.state = to;
        self.state_tx.send_replace(to);
        tracing::debug!(
            from = from.as_str(),
            to = to.as_str(),
            trigger = event.as_str(),
            "Session state changed"
        );
        self.telemetry.emit(TelemetryEvent::StateTransition {
            from: from.as_str(),
            to: to.as_str(),
            trigger: event.as_str(),
        });

        // The monitor must be listening before anyone learns we are speaking
        if to == SessionState::AISpeaking {
            self.start_monitor();
        } else if from == SessionState::AISpeaking {
            self.stop_monitor();
            // Only a confirmed barge-in keeps the speaker held
            if event != TurnEvent::BargeInConfirmed && self.playback.is_paused() {
                tracing::debug!(trigger = event.as_str(), "Releasing pause left by an open barge-in window");
                self.playback.resume();
            }
        }

        self.emit(SessionEvent::StateChanged {
            from,
            to,
            trigger: event,
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // ---------------------------------------------------------------------
    // Audio intake
    // ---------------------------------------------------------------------

    fn handle_frame(&mut self, observation: VadObservation) {
        let speech = observation.confidence() >= self.config.speech_threshold;
        let frame = observation.frame.clone();
        self.remember(observation);

        match self.state {
            SessionState::Idle if speech => {
                self.begin_capture();
                self.apply(TurnEvent::SpeechDetected);
            },
            SessionState::UserSpeaking => {
                self.capture.push(frame.clone());
                if speech {
                    self.last_speech_end_ms = frame.end_ms();
                    self.arm(Timer::Silence);
                } else if frame.end_ms().saturating_sub(self.last_speech_end_ms)
                    >= self.config.silence_timeout_ms
                {
                    self.end_utterance();
                }
            },
            _ => {},
        }
    }

    fn remember(&mut self, observation: VadObservation) {
        let newest_end = observation.frame.end_ms();
        self.recent.push_back(observation);
        while self.recent.len() > 1 {
            let stale = self
                .recent
                .front()
                .is_some_and(|oldest| newest_end.saturating_sub(oldest.frame.timestamp_ms) > self.config.preroll_ms);
            if !stale {
                break;
            }
            self.recent.pop_front();
        }
    }

    /// Start an utterance seeded with the pre-roll, so speech that triggered
    /// the turn (or the barge-in) is not lost
    fn begin_capture(&mut self) {
        self.capture = self.recent.iter().map(|o| o.frame.clone()).collect();
        self.last_speech_end_ms = self
            .recent
            .iter()
            .rev()
            .find(|o| o.confidence() >= self.config.speech_threshold)
            .or_else(|| self.recent.back())
            .map(|o| o.frame.end_ms())
            .unwrap_or(0);
        self.arm(Timer::Silence);
    }

    fn end_utterance(&mut self) {
        self.timer = None;
        let frames = std::mem::take(&mut self.capture);
        let sample_rate = frames
            .first()
            .map(|f| f.sample_rate.as_u32())
            .unwrap_or(16_000);
        let samples = concat_samples(&frames);

        self.open_turn(true);
        if let Some(progress) = self.turn.as_mut() {
            progress.turn.barge_in = self.barge_in_segment.is_some();
        }
        self.apply(TurnEvent::SilenceTimeout);
        tracing::debug!(
            frames = frames.len(),
            samples = samples.len(),
            "Utterance captured"
        );

        let resolver = Arc::clone(&self.resolver);
        let conditions = Arc::clone(&self.conditions);
        let tx = self.work_tx.clone();
        let epoch = self.epoch;
        self.work_task = Some(tokio::spawn(async move {
            let result = resolver.transcribe(samples, sample_rate, &conditions).await;
            let _ = tx.send(Work::Transcribed { epoch, result }).await;
        }));
    }

    // ---------------------------------------------------------------------
    // Timers and commands
    // ---------------------------------------------------------------------

    fn arm(&mut self, timer: Timer) {
        let after = match timer {
            Timer::Silence => self.config.silence_timeout_ms,
            Timer::Resume => self.config.resume_after_silence_ms,
        };
        self.timer = Some((Instant::now() + Duration::from_millis(after), timer));
    }

    fn handle_timer(&mut self) {
        match (self.timer.take(), self.state) {
            (Some((_, Timer::Silence)), SessionState::UserSpeaking) => self.end_utterance(),
            (Some((_, Timer::Resume)), SessionState::Idle) => {
                tracing::debug!("Silence after interjection, resuming");
                self.resume_interrupted(None);
            },
            _ => {},
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Present(text) => {
                if self.state != SessionState::Idle {
                    tracing::warn!(state = self.state.as_str(), "Ignoring presentation while busy");
                    return;
                }
                if self.interrupted.take().is_some() {
                    tracing::debug!("New presentation replaces the interrupted response");
                }
                self.timer = None;
                self.open_turn(false);
                self.apply(TurnEvent::PresentRequested);
                let stream = self.generator.present(&text);
                self.start_pump(stream);
            },
            SessionCommand::Reset => self.reset().await,
        }
    }

    async fn reset(&mut self) {
        self.abandon_work();
        self.stop_monitor();
        let _ = self.stop_pump().await;
        self.playback.stop();
        self.interrupted = None;
        self.barge_in_segment = None;
        self.timer = None;
        self.capture.clear();
        if let Some(progress) = self.turn.as_mut() {
            progress.turn.interrupted = true;
        }
        self.close_turn();
        self.apply(TurnEvent::Reset);
    }

    fn abandon_work(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.work_task.take() {
            task.abort();
        }
    }

    // ---------------------------------------------------------------------
    // Turns
    // ---------------------------------------------------------------------

    fn open_turn(&mut self, after_speech: bool) {
        self.close_turn();
        self.next_turn_id += 1;
        self.turn = Some(TurnInProgress {
            turn: Turn::new(self.next_turn_id),
            speech_end: after_speech.then(Instant::now),
        });
    }

    /// Close the open turn. Turns with nothing said by either side vanish.
    fn close_turn(&mut self) {
        let Some(progress) = self.turn.take() else {
            return;
        };
        let turn = progress.turn;
        if turn.user_utterance.is_none() && turn.ai_response.is_none() {
            return;
        }

        tracing::info!(turn_id = turn.id, interrupted = turn.interrupted, "Turn closed");
        self.telemetry.emit(TelemetryEvent::TurnCompleted {
            turn_id: turn.id,
            interrupted: turn.interrupted,
            latency: turn.latency,
        });
        self.emit(SessionEvent::TurnClosed(turn.clone()));
        self.history.push_back(turn);
        while self.history.len() > self.config.max_context_turns {
            self.history.pop_front();
        }
    }

    /// End the turn with the configured stand-in answer. The answer is
    /// spoken when synthesis still has a usable provider, otherwise it only
    /// goes out as an event.
    fn degrade(&mut self, kind: CapabilityKind, error: String) {
        let message = self.config.degraded.for_kind(kind).to_string();
        tracing::error!(kind = %kind, error = %error, "Answering with degraded response");
        self.emit(SessionEvent::Degraded {
            kind,
            message: message.clone(),
            error,
        });

        let speakable = kind != CapabilityKind::Tts
            && self.state == SessionState::Idle
            && self.turn.is_some()
            && self.resolver.any_eligible(CapabilityKind::Tts);
        if speakable {
            self.apply(TurnEvent::PresentRequested);
            let stream = self.generator.present(&message);
            self.start_pump(stream);
            return;
        }

        if let Some(progress) = self.turn.as_mut() {
            progress.turn.ai_response = Some(message);
        }
        self.close_turn();
        self.settle_idle();
    }

    /// Back in idle with an interrupted response pending: it resumes after
    /// a stretch of silence unless the user speaks first
    fn settle_idle(&mut self) {
        if self.state != SessionState::Idle {
            return;
        }
        if let Some(pending) = self.interrupted.as_mut() {
            pending.answered = true;
            self.arm(Timer::Resume);
        }
    }

    // ---------------------------------------------------------------------
    // Provider results
    // ---------------------------------------------------------------------

    fn handle_work(&mut self, work: Work) {
        match work {
            Work::Transcribed { epoch, result } if epoch == self.epoch => self.on_transcribed(result),
            Work::Generated { epoch, result } if epoch == self.epoch => self.on_generated(result),
            Work::Pump { run_id, event } if self.pump.as_ref().map(|p| p.run_id) == Some(run_id) => {
                self.on_pump(event)
            },
            _ => tracing::debug!("Dropping result of abandoned work"),
        }
    }

    fn on_transcribed(&mut self, result: Result<Resolved<String>, CapabilityError>) {
        if self.state != SessionState::Processing {
            return;
        }
        self.work_task = None;

        let resolved = match result {
            Ok(resolved) => resolved,
            Err(error) => {
                self.apply(TurnEvent::TranscriptionFailed);
                self.degrade(CapabilityKind::Stt, error.to_string());
                return;
            },
        };

        let text = resolved.value.trim().to_string();
        tracing::debug!(provider = %resolved.provider_id, chars = text.len(), "Transcript ready");

        if text.is_empty() {
            // Nothing was said: no turn
            self.turn = None;
            self.barge_in_segment = None;
            if self.interrupted.is_some() {
                self.resume_interrupted(None);
            } else {
                self.apply(TurnEvent::EmptyTranscript);
            }
            return;
        }

        let Some(progress) = self.turn.as_mut() else {
            return;
        };
        progress.turn.latency.stt_ms = Some(resolved.elapsed_ms);
        progress.turn.user_utterance = Some(text.clone());
        let turn_id = progress.turn.id;
        self.emit(SessionEvent::Transcript {
            turn_id,
            text: text.clone(),
        });

        let decision = match &self.interrupted {
            Some(pending) if pending.answered => self.config.resume_policy.decide(&text),
            _ => ResumeDecision::Interject,
        };
        let interrupted_segment = self.barge_in_segment.take();
        match decision {
            ResumeDecision::Resume => self.resume_interrupted(Some(text)),
            ResumeDecision::Interject => {
                if let Some(pending) = self.interrupted.as_mut() {
                    pending.answered = false;
                }
                self.apply(TurnEvent::TranscriptReady);
                self.spawn_generation(text, interrupted_segment);
            },
        }
    }

    fn spawn_generation(&mut self, transcript: String, interrupted_segment: Option<String>) {
        let context: Vec<Turn> = self.history.iter().cloned().collect();
        let generator = Arc::clone(&self.generator);
        let tx = self.work_tx.clone();
        let epoch = self.epoch;
        self.work_task = Some(tokio::spawn(async move {
            let result = generator
                .generate_response(&transcript, &context, interrupted_segment.as_deref())
                .await;
            let _ = tx.send(Work::Generated { epoch, result }).await;
        }));
    }

    fn on_generated(&mut self, result: Result<(ResponseStream, u64), CapabilityError>) {
        if self.state != SessionState::AIThinking {
            return;
        }
        self.work_task = None;
        match result {
            Ok((stream, llm_ms)) => {
                if let Some(progress) = self.turn.as_mut() {
                    progress.turn.latency.llm_ms = Some(llm_ms);
                }
                self.start_pump(stream);
            },
            Err(error) => {
                self.apply(TurnEvent::GenerationFailed);
                self.degrade(CapabilityKind::Llm, error.to_string());
            },
        }
    }

    // ---------------------------------------------------------------------
    // Playback
    // ---------------------------------------------------------------------

    fn start_pump(&mut self, stream: ResponseStream) {
        self.next_run_id += 1;
        let run_id = self.next_run_id;
        let cancel = self.cancel.child_token();
        tracing::debug!(run_id, response_id = stream.id(), segments = stream.len(), "Starting playback pump");

        let handle = tokio::spawn(pump(
            stream,
            run_id,
            Arc::clone(&self.playback),
            self.playback.subscribe(),
            self.work_tx.clone(),
            cancel.clone(),
        ));
        self.pump = Some(PumpRun {
            run_id,
            cancel,
            handle,
            enqueued: 0,
            finished: 0,
            done: false,
        });
    }

    /// Cancel the pump and take back its stream
    async fn stop_pump(&mut self) -> Option<ResponseStream> {
        let run = self.pump.take()?;
        run.cancel.cancel();
        match run.handle.await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, "Playback pump ended abnormally");
                None
            },
        }
    }

    fn on_pump(&mut self, event: PumpEvent) {
        match event {
            PumpEvent::Enqueued { index, tts_ms } => {
                let first = match self.pump.as_mut() {
                    Some(run) => {
                        run.enqueued += 1;
                        run.enqueued == 1
                    },
                    None => return,
                };
                tracing::trace!(index, tts_ms, "Segment queued for playback");
                if first {
                    if let Some(progress) = self.turn.as_mut() {
                        progress.turn.latency.tts_first_segment_ms.get_or_insert(tts_ms);
                    }
                }
                if self.state == SessionState::AIThinking {
                    self.apply(TurnEvent::ResponseReady);
                }
            },
            PumpEvent::Done => {
                let nothing_queued = match self.pump.as_mut() {
                    Some(run) => {
                        run.done = true;
                        run.enqueued == 0
                    },
                    None => return,
                };
                if nothing_queued && self.state == SessionState::AIThinking {
                    self.pump = None;
                    self.apply(TurnEvent::GenerationFailed);
                    self.close_turn();
                    self.settle_idle();
                    return;
                }
                self.check_complete();
            },
            PumpEvent::Failed { kind, error } => {
                let nothing_queued = match self.pump.as_mut() {
                    Some(run) => {
                        run.done = true;
                        run.enqueued == 0
                    },
                    None => return,
                };
                if nothing_queued && self.state == SessionState::AIThinking {
                    self.pump = None;
                    self.apply(TurnEvent::GenerationFailed);
                    self.degrade(kind, error);
                    return;
                }
                // Part of the answer is already queued; let it play out
                tracing::warn!(error = %error, "Response cut short by synthesis failure");
                self.emit(SessionEvent::Degraded {
                    kind,
                    message: self.config.degraded.for_kind(kind).to_string(),
                    error,
                });
                self.check_complete();
            },
        }
    }

    fn handle_playback(&mut self, event: PlaybackEvent) {
        let current = self.pump.as_ref().map(|p| p.run_id);
        match event {
            PlaybackEvent::SegmentStarted {
                response_id,
                index,
                text,
            } if Some(response_id) == current => {
                if let Some(progress) = self.turn.as_mut() {
                    progress.turn.push_ai_text(&text);
                    if let Some(end) = progress.speech_end {
                        progress
                            .turn
                            .latency
                            .end_to_end_ms
                            .get_or_insert(end.elapsed().as_millis() as u64);
                    }
                }
                self.emit(SessionEvent::SegmentText {
                    response_id,
                    index,
                    text,
                });
            },
            PlaybackEvent::SegmentFinished { response_id, .. } if Some(response_id) == current => {
                if let Some(run) = self.pump.as_mut() {
                    run.finished += 1;
                }
                self.check_complete();
            },
            _ => {},
        }
    }

    fn check_complete(&mut self) {
        let complete = matches!(&self.pump, Some(run) if run.done && run.finished >= run.enqueued);
        if !complete || self.state != SessionState::AISpeaking {
            return;
        }
        self.pump = None;
        self.apply(TurnEvent::PlaybackComplete);
        self.close_turn();
        self.settle_idle();
    }

    // ---------------------------------------------------------------------
    // Barge-in
    // ---------------------------------------------------------------------

    fn start_monitor(&mut self) {
        if !self.config.barge_in_enabled {
            return;
        }
        self.stop_monitor();
        let (tx, rx) = mpsc::channel(BARGE_IN_CAPACITY);
        let cancel = self.cancel.child_token();
        BargeInMonitor::new(
            self.config.barge_in.clone(),
            PauseHandle::new(Arc::clone(&self.playback)),
            tx,
            Arc::clone(&self.telemetry),
        )
        .spawn(self.frame_source.subscribe(), cancel.clone());
        self.monitor = Some(MonitorRun { cancel, events: rx });
    }

    fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.cancel.cancel();
        }
    }

    async fn handle_barge_in(&mut self, event: BargeInEvent) {
        if self.state != SessionState::AISpeaking {
            return;
        }
        tracing::debug!(
            window_id = event.window_id,
            kind = event.kind.as_str(),
            confidence = event.confidence,
            "Barge-in event"
        );
        let confirmed = match &event.kind {
            BargeInEventKind::Confirmed { position } => Some(*position),
            _ => None,
        };
        self.emit(SessionEvent::BargeIn(event));
        if let Some(position) = confirmed {
            self.interrupt(position).await;
        }
    }

    /// Confirmed barge-in: cut the response at the pause point and listen
    async fn interrupt(&mut self, position: PlaybackPosition) {
        self.stop_monitor();
        let stream = self.stop_pump().await;
        self.playback.stop();
        self.abandon_work();

        if let Some(progress) = self.turn.as_mut() {
            progress.turn.interrupted = true;
        }
        self.close_turn();

        let count = self.barge_ins.fetch_add(1, Ordering::Relaxed) + 1;
        self.barge_in_segment = stream
            .as_ref()
            .and_then(|s| s.text(position.segment_index))
            .map(str::to_string);
        tracing::debug!(barge_ins = count, "Barge-in confirmed");

        match self.interrupted.as_mut() {
            Some(pending) => {
                // Barged into an interjection answer: drop its remainder,
                // keep the original resume point
                pending.answered = false;
            },
            None => {
                if let Some(stream) = stream {
                    tracing::info!(
                        segment_index = position.segment_index,
                        offset_ms = position.offset_ms,
                        "Response interrupted"
                    );
                    self.interrupted = Some(InterruptedResponse {
                        stream,
                        position,
                        answered: false,
                    });
                }
            },
        }

        self.begin_capture();
        self.apply(TurnEvent::BargeInConfirmed);
    }

    fn resume_interrupted(&mut self, cue: Option<String>) {
        let Some(InterruptedResponse {
            mut stream,
            position,
            ..
        }) = self.interrupted.take()
        else {
            return;
        };
        stream.rewind_to(position);
        self.timer = None;

        if self.turn.is_none() {
            self.open_turn(false);
        }
        if let (Some(progress), Some(cue)) = (self.turn.as_mut(), cue) {
            progress.turn.user_utterance = Some(cue);
        }

        tracing::info!(
            segment_index = position.segment_index,
            offset_ms = position.offset_ms,
            "Resuming interrupted response"
        );
        self.emit(SessionEvent::Resumed { position });
        self.start_pump(stream);
        self.apply(TurnEvent::ResumeInterrupted);
    }

    async fn teardown(&mut self) {
        self.abandon_work();
        self.stop_monitor();
        let _ = self.stop_pump().await;
        self.playback.stop();
        self.close_turn();
        // Stops the playback clock when the session owns one
        self.cancel.cancel();
    }
}

async fn next_barge_in(monitor: &mut Option<MonitorRun>) -> Option<BargeInEvent> {
    match monitor {
        Some(run) => run.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Feed a response to playback one segment at a time.
///
/// At most one segment waits in the queue behind the one playing, so a
/// barge-in wastes little synthesis. Cancellation is checked at segment
/// boundaries and while synthesizing; the stream is handed back either way.
async fn pump(
    mut stream: ResponseStream,
    run_id: u64,
    playback: Arc<dyn PlaybackController>,
    mut playback_events: broadcast::Receiver<PlaybackEvent>,
    tx: mpsc::Sender<Work>,
    cancel: CancellationToken,
) -> ResponseStream {
    let mut previous: Option<usize> = None;

    loop {
        if let Some(index) = previous {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = segment_started(&mut playback_events, run_id, index) => {},
            }
        }

        let started = Instant::now();
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next_segment(run_id) => next,
        };

        let event = match next {
            None => PumpEvent::Done,
            Some(Ok(segment)) => {
                let index = segment.index;
                match playback.enqueue(segment) {
                    Ok(()) => {
                        previous = Some(index);
                        PumpEvent::Enqueued {
                            index,
                            tts_ms: started.elapsed().as_millis() as u64,
                        }
                    },
                    Err(e) => PumpEvent::Failed {
                        kind: CapabilityKind::Tts,
                        error: e.to_string(),
                    },
                }
            },
            Some(Err(e)) => PumpEvent::Failed {
                kind: e.kind(),
                error: e.to_string(),
            },
        };

        let last = !matches!(event, PumpEvent::Enqueued { .. });
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(Work::Pump { run_id, event }) => sent.is_ok(),
        };
        if !sent || last {
            break;
        }
    }
    stream
}

async fn segment_started(
    events: &mut broadcast::Receiver<PlaybackEvent>,
    response_id: u64,
    index: usize,
) {
    loop {
        match events.recv().await {
            Ok(PlaybackEvent::SegmentStarted {
                response_id: r,
                index: i,
                ..
            }) if r == response_id && i == index => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) | Err(broadcast::error::RecvError::Closed) => {
                return
            },
        }
    }
}
