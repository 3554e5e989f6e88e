//! Per-session actor.
//!
//! The actor task is the only code that touches a session's buffer,
//! affirmation pool, or position. Boundary calls arrive as commands with a
//! oneshot reply; generation results arrive as commands too.
//!
//! At most one music generation request is outstanding per session. Voice
//! synthesis runs once at start, independently of music.

use super::registry::SessionContext;
use super::types::{
    AffirmationId, PositionUpdate, SessionId, SessionOptions, SessionSnapshot, SessionState,
    TrackDescriptor,
};
use crate::affirmations::AffirmationScheduler;
use crate::buffer::SegmentBuffer;
use crate::cleanup::CleanupReport;
use crate::events::{SessionEvent, StopReason};
use crate::generation::{GeneratedAffirmation, GeneratedSegment, MusicRequest, PartialBatch};
use cas::{ContentHash, ContentStore};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub(crate) enum SessionCommand {
    UpdatePosition {
        position: f64,
        reply: oneshot::Sender<PositionUpdate>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    SegmentHandle {
        index: u64,
        reply: oneshot::Sender<Option<ContentHash>>,
    },
    AffirmationHandle {
        id: AffirmationId,
        reply: oneshot::Sender<Option<ContentHash>>,
    },
    Stop {
        reason: StopReason,
        reply: oneshot::Sender<CleanupReport>,
    },
    InitialBatchDone(anyhow::Result<Vec<GeneratedSegment>>),
    SegmentDone(anyhow::Result<GeneratedSegment>),
    AffirmationsDone(Vec<GeneratedAffirmation>),
}

impl SessionCommand {
    /// Stored objects a generation result carries. Used when the result can
    /// no longer be delivered.
    fn orphaned_handles(&self) -> Vec<ContentHash> {
        match self {
            SessionCommand::InitialBatchDone(Ok(segments)) => {
                segments.iter().map(|s| s.handle.clone()).collect()
            }
            SessionCommand::InitialBatchDone(Err(e)) => e
                .downcast_ref::<PartialBatch>()
                .map(|p| p.stored.clone())
                .unwrap_or_default(),
            SessionCommand::SegmentDone(Ok(segment)) => vec![segment.handle.clone()],
            SessionCommand::AffirmationsDone(clips) => {
                clips.iter().map(|c| c.handle.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Hand a generation result to the actor, or release what it stored if the
/// session is gone.
async fn deliver(
    tx: mpsc::Sender<SessionCommand>,
    cancel: &CancellationToken,
    store: &dyn ContentStore,
    command: SessionCommand,
) {
    let undeliverable = if cancel.is_cancelled() {
        Some(command)
    } else {
        tx.send(command).await.err().map(|e| e.0)
    };

    if let Some(command) = undeliverable {
        let handles = command.orphaned_handles();
        if !handles.is_empty() {
            let report = crate::cleanup::release_all(store, &handles);
            tracing::info!(
                released = report.released,
                failures = report.failures.len(),
                "Discarded generation result for stopped session"
            );
        }
    }
}

/// Run an adapter call, turning a panic into an ordinary failure so the
/// result still reaches the actor.
async fn guarded<T>(call: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "generator panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

pub(crate) struct SessionActor {
    id: SessionId,
    owner_id: String,
    track: TrackDescriptor,
    options: SessionOptions,
    state: SessionState,
    started_at: DateTime<Utc>,
    current_position: f64,
    buffer: SegmentBuffer,
    affirmations: AffirmationScheduler,
    in_flight: bool,
    ctx: SessionContext,
    rx: mpsc::Receiver<SessionCommand>,
    tx: mpsc::WeakSender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        owner_id: String,
        track: TrackDescriptor,
        options: SessionOptions,
        started_at: DateTime<Utc>,
        ctx: SessionContext,
        rx: mpsc::Receiver<SessionCommand>,
        tx: mpsc::WeakSender<SessionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            buffer: SegmentBuffer::new(options.buffer_size),
            affirmations: AffirmationScheduler::new(options.affirmation_interval),
            id,
            owner_id,
            track,
            options,
            state: SessionState::Active,
            started_at,
            current_position: 0.0,
            in_flight: false,
            ctx,
            rx,
            tx,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let span = tracing::info_span!("session", session.id = %self.id);
        async move {
            tracing::debug!("Session actor started");
            self.request_initial_batch();
            self.request_affirmations();

            while let Some(command) = self.rx.recv().await {
                if let SessionCommand::Stop { reason, reply } = command {
                    let report = self.shutdown(reason);
                    let _ = reply.send(report);
                    return;
                }
                self.handle(command);
            }

            // Every handle dropped without an explicit stop.
            self.shutdown(StopReason::Shutdown);
        }
        .instrument(span)
        .await
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::UpdatePosition { position, reply } => {
                let update = self.update_position(position);
                let _ = reply.send(update);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::SegmentHandle { index, reply } => {
                let _ = reply.send(self.buffer.handle(index).cloned());
            }
            SessionCommand::AffirmationHandle { id, reply } => {
                let _ = reply.send(self.affirmations.get(&id).map(|a| a.handle.clone()));
            }
            SessionCommand::InitialBatchDone(result) => self.on_initial_batch(result),
            SessionCommand::SegmentDone(result) => self.on_segment(result),
            SessionCommand::AffirmationsDone(clips) => self.on_affirmations(clips),
            SessionCommand::Stop { .. } => {}
        }
    }

    fn update_position(&mut self, position: f64) -> PositionUpdate {
        self.current_position = position;
        let current_segment_index = self.buffer.locate(position);

        let mut generation_requested = false;
        if !self.in_flight {
            if self.buffer.is_empty() {
                tracing::info!(position, "Buffer empty, retrying initial batch");
                generation_requested = self.request_initial_batch();
            } else if self.buffer.needs_growth(position, self.options.look_ahead) {
                generation_requested = self.request_segment();
            }
        }

        let affirmation = self
            .affirmations
            .observe(&self.id, position)
            .map(|a| (a.id.clone(), a.handle.clone(), a.text.clone()));
        let affirmation = affirmation.map(|(affirmation_id, handle, text)| {
            tracing::info!(affirmation.id = %affirmation_id, position, "Playing affirmation");
            self.ctx.events.publish(SessionEvent::PlayAffirmation {
                session_id: self.id.clone(),
                affirmation_id: affirmation_id.clone(),
                handle,
                text,
            });
            affirmation_id
        });

        PositionUpdate {
            position,
            current_segment_index,
            affirmation,
            generation_requested,
        }
    }

    fn music_request(&self) -> MusicRequest {
        MusicRequest::new(self.track.track_type.clone(), self.track.mood_tags.clone())
    }

    fn request_initial_batch(&mut self) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        self.in_flight = true;

        let music = self.ctx.generators.music.clone();
        let store = self.ctx.store.clone();
        let cancel = self.cancel.clone();
        let request = self.music_request();
        let total = self.track.duration_secs;
        let count = self.options.buffer_size;

        self.ctx.tracker.spawn(
            async move {
                if cancel.is_cancelled() {
                    return;
                }
                let result = guarded(music.generate_initial_batch(&request, total, count)).await;
                deliver(tx, &cancel, store.as_ref(), SessionCommand::InitialBatchDone(result))
                    .await;
            }
            .instrument(tracing::info_span!("initial_batch", count, total_duration = total)),
        );
        true
    }

    fn request_segment(&mut self) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        self.in_flight = true;

        let music = self.ctx.generators.music.clone();
        let store = self.ctx.store.clone();
        let cancel = self.cancel.clone();
        let request = self.music_request();
        let duration = self.options.segment_duration;
        tracing::debug!(
            position = self.current_position,
            segment.index = self.buffer.current_index(),
            "Requesting next segment"
        );

        self.ctx.tracker.spawn(
            async move {
                if cancel.is_cancelled() {
                    return;
                }
                let result = guarded(music.generate_segment(&request, duration)).await;
                deliver(tx, &cancel, store.as_ref(), SessionCommand::SegmentDone(result)).await;
            }
            .instrument(tracing::info_span!("next_segment", duration)),
        );
        true
    }

    fn request_affirmations(&mut self) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };

        let voice = self.ctx.generators.voice.clone();
        let store = self.ctx.store.clone();
        let cancel = self.cancel.clone();
        let texts = self.track.affirmations.clone();
        let options = self.track.voice.clone();

        self.ctx.tracker.spawn(
            async move {
                if cancel.is_cancelled() {
                    return;
                }
                let clips = guarded(voice.synthesize_batch(&texts, &options).map(Ok))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(error = %e, "Affirmation synthesis aborted");
                        Vec::new()
                    });
                deliver(tx, &cancel, store.as_ref(), SessionCommand::AffirmationsDone(clips))
                    .await;
            }
            .instrument(tracing::info_span!("affirmations")),
        );
    }

    fn on_initial_batch(&mut self, result: anyhow::Result<Vec<GeneratedSegment>>) {
        self.in_flight = false;
        let segments = match result {
            Ok(segments) => segments,
            Err(e) => {
                if let Some(partial) = e.downcast_ref::<PartialBatch>() {
                    self.release_quietly(&partial.stored);
                }
                self.generation_failed(format!("initial batch: {:#}", e));
                return;
            }
        };

        if let Some(bad) = segments.iter().find(|s| !valid_duration(s.duration)) {
            let cause = format!("initial batch returned a segment of {} seconds", bad.duration);
            let handles: Vec<_> = segments.iter().map(|s| s.handle.clone()).collect();
            self.release_quietly(&handles);
            self.generation_failed(cause);
            return;
        }

        let count = segments.len();
        for segment in segments {
            self.buffer.push(&self.id, segment);
        }
        self.buffer.locate(self.current_position);
        self.evict();

        tracing::info!(count, "Initial buffer ready");
        self.ctx.events.publish(SessionEvent::SegmentsReady {
            session_id: self.id.clone(),
            count,
        });
    }

    fn on_segment(&mut self, result: anyhow::Result<GeneratedSegment>) {
        self.in_flight = false;
        let generated = match result {
            Ok(generated) => generated,
            Err(e) => {
                self.generation_failed(format!("segment: {:#}", e));
                return;
            }
        };

        if !valid_duration(generated.duration) {
            let cause = format!("segment returned with {} seconds", generated.duration);
            self.release_quietly(std::slice::from_ref(&generated.handle));
            self.generation_failed(cause);
            return;
        }

        // A backward seek while this was in flight can leave the buffer full.
        self.buffer.locate(self.current_position);
        if !self.buffer.has_room() {
            tracing::debug!(
                position = self.current_position,
                ahead = self.buffer.ahead_count(),
                "Buffer already full, discarding segment"
            );
            self.release_quietly(std::slice::from_ref(&generated.handle));
            return;
        }

        let segment = self.buffer.push(&self.id, generated);
        let event = SessionEvent::NewSegmentReady {
            session_id: self.id.clone(),
            index: segment.index,
            segment_id: segment.id.clone(),
            handle: segment.handle.clone(),
        };
        tracing::info!(
            segment.index = segment.index,
            segment.start = segment.start_offset,
            segment.duration = segment.duration,
            "Segment appended"
        );

        self.buffer.locate(self.current_position);
        self.evict();
        self.ctx.events.publish(event);
    }

    fn on_affirmations(&mut self, clips: Vec<GeneratedAffirmation>) {
        let count = self.affirmations.load(&self.id, clips);
        if count == 0 && !self.track.affirmations.is_empty() {
            tracing::warn!(
                requested = self.track.affirmations.len(),
                "No affirmations could be synthesized"
            );
        } else {
            tracing::info!(count, "Affirmation pool ready");
        }
        self.ctx.events.publish(SessionEvent::AffirmationsReady {
            session_id: self.id.clone(),
            count,
        });
    }

    fn evict(&mut self) {
        let evicted = self.buffer.evict();
        if evicted.is_empty() {
            return;
        }
        let handles: Vec<_> = evicted.iter().map(|s| s.handle.clone()).collect();
        tracing::debug!(
            evicted = evicted.len(),
            oldest = evicted[0].index,
            "Evicting played segments"
        );
        self.release_quietly(&handles);
    }

    fn release_quietly(&self, handles: &[ContentHash]) {
        let report = crate::cleanup::release_all(self.ctx.store.as_ref(), handles);
        if !report.is_clean() {
            tracing::warn!(
                failures = report.failures.len(),
                "Some stored audio could not be released"
            );
        }
    }

    fn generation_failed(&self, cause: String) {
        tracing::error!(cause = %cause, "Generation failed, keeping existing buffer");
        self.ctx.events.generation_error(&self.id, cause);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            track_id: self.track.id.clone(),
            state: self.state,
            started_at: self.started_at,
            current_position: self.current_position,
            total_duration: self.track.duration_secs,
            affirmation_interval: self.options.affirmation_interval,
            last_affirmation_time: self.affirmations.last_fired(),
            buffer_size: self.options.buffer_size,
            current_segment_index: self.buffer.current_index(),
            generation_in_flight: self.in_flight,
            segments: self.buffer.segments().cloned().collect(),
            affirmations: self.affirmations.pool().to_vec(),
        }
    }

    /// Stop accepting work, release everything this session owns, and
    /// announce the stop.
    fn shutdown(&mut self, reason: StopReason) -> CleanupReport {
        self.state = SessionState::Stopped;
        self.cancel.cancel();
        self.rx.close();

        let mut report = CleanupReport::default();
        let store = self.ctx.store.clone();

        // Results that landed before the mailbox closed.
        while let Ok(command) = self.rx.try_recv() {
            for handle in command.orphaned_handles() {
                report.release(store.as_ref(), &handle);
            }
        }

        for segment in self.buffer.drain() {
            report.release(store.as_ref(), &segment.handle);
        }
        for affirmation in self.affirmations.drain() {
            report.release(store.as_ref(), &affirmation.handle);
        }

        tracing::info!(
            reason = ?reason,
            released = report.released,
            already_missing = report.already_missing,
            failures = report.failures.len(),
            "Session stopped"
        );
        self.ctx.events.session_stopped(&self.id, reason);
        report
    }
}

fn valid_duration(duration: f64) -> bool {
    duration.is_finite() && duration > 0.0
}
