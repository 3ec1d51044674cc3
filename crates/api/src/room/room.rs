//! The Room actor.
//!
//! A room is a single-writer task: membership, assembler buffers, and
//! broadcasts are mutated only here, driven by commands from the per-room
//! inbox. Pipeline work is spawned out and reports back through the same
//! inbox, so no lock is ever held across an inference call.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use babblefish_config::Settings;
use babblefish_pipeline::{Pipeline, PipelineError, PipelineResult};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::protocol::{ErrorCode, ParticipantInfo, ServerMessage};
use crate::room::participant::{Participant, SpeakerState, UtteranceAssembler};
use crate::ws::send_queue::OutboundQueue;

/// Join submitted by a connection, already validated by the transport layer.
pub struct JoinRequest {
    pub name: String,
    pub language: String,
    pub queue: OutboundQueue,
}

#[derive(Debug)]
pub struct JoinAccepted {
    pub room_id: String,
    pub participant_id: String,
    /// The other members at the time of join.
    pub others: Vec<ParticipantInfo>,
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Room is full (max {0} participants)")]
    RoomFull(usize),
    #[error("internal room error")]
    Internal,
}

/// Commands consumed by the room task.
pub enum RoomCommand {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<JoinAccepted, JoinError>>,
    },
    Audio {
        participant_id: String,
        data: String,
    },
    UtteranceEnd {
        participant_id: String,
    },
    Leave {
        participant_id: String,
    },
    /// A pipeline job finished for this speaker.
    PipelineDone {
        participant_id: String,
        outcome: Result<PipelineResult, PipelineError>,
    },
    Shutdown,
}

/// Membership mirror the manager reads without asking the room task.
pub struct RoomShared {
    pub participant_count: AtomicUsize,
    pub empty_since: Mutex<Option<Instant>>,
}

#[derive(Clone)]
pub struct RoomHandle {
    pub tx: mpsc::Sender<RoomCommand>,
    pub shared: Arc<RoomShared>,
}

impl RoomHandle {
    /// How long the room has been empty, if it is.
    pub fn empty_for(&self) -> Option<Duration> {
        self.shared
            .empty_since
            .lock()
            .ok()
            .and_then(|guard| guard.map(|t| t.elapsed()))
    }

    pub fn participant_count(&self) -> usize {
        self.shared.participant_count.load(Ordering::Relaxed)
    }
}

pub struct Room {
    room_id: String,
    participants: HashMap<String, Participant>,
    next_participant_seq: u32,
    inbox: mpsc::Receiver<RoomCommand>,
    self_tx: mpsc::Sender<RoomCommand>,
    pipeline: Arc<Pipeline>,
    settings: Arc<Settings>,
    shared: Arc<RoomShared>,
    rooms: Arc<DashMap<String, RoomHandle>>,
    empty_since: Option<Instant>,
}

impl Room {
    /// Spawns the room task and returns its handle. The caller owns the
    /// `rooms` table entry; the task removes itself on exit.
    pub fn spawn(
        room_id: String,
        pipeline: Arc<Pipeline>,
        settings: Arc<Settings>,
        rooms: Arc<DashMap<String, RoomHandle>>,
    ) -> RoomHandle {
        let (tx, inbox) = mpsc::channel(settings.rooms.room_inbox_capacity);
        let shared = Arc::new(RoomShared {
            participant_count: AtomicUsize::new(0),
            empty_since: Mutex::new(Some(Instant::now())),
        });
        let handle = RoomHandle {
            tx: tx.clone(),
            shared: shared.clone(),
        };

        let room = Room {
            room_id,
            participants: HashMap::new(),
            next_participant_seq: 0,
            inbox,
            self_tx: tx,
            pipeline,
            settings,
            shared,
            rooms,
            empty_since: Some(Instant::now()),
        };
        tokio::spawn(room.run());
        handle
    }

    async fn run(mut self) {
        info!(room_id = %self.room_id, "room created");
        let grace = Duration::from_secs(self.settings.rooms.room_timeout_seconds);

        loop {
            let expiry = self.empty_since.map(|since| since + grace);
            tokio::select! {
                // Commands win over a simultaneous grace expiry: a join that
                // is already queued must revive the room.
                biased;
                cmd = self.inbox.recv() => match cmd {
                    Some(RoomCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
                _ = sleep_until_opt(expiry) => {
                    info!(room_id = %self.room_id, "empty-room grace expired");
                    break;
                }
            }
        }

        // Eviction may already have removed the entry; only drop our own.
        self.rooms
            .remove_if(&self.room_id, |_, handle| handle.tx.same_channel(&self.self_tx));
        for (_, participant) in self.participants.drain() {
            participant.queue.close();
        }
        info!(room_id = %self.room_id, "room closed");
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { request, reply } => {
                let _ = reply.send(self.handle_join(request));
            }
            RoomCommand::Audio {
                participant_id,
                data,
            } => self.handle_audio(&participant_id, &data),
            RoomCommand::UtteranceEnd { participant_id } => {
                self.handle_utterance_end(&participant_id)
            }
            RoomCommand::Leave { participant_id } => self.remove_participant(&participant_id),
            RoomCommand::PipelineDone {
                participant_id,
                outcome,
            } => self.handle_pipeline_done(&participant_id, outcome),
            RoomCommand::Shutdown => unreachable!("handled in run loop"),
        }
    }

    fn handle_join(&mut self, request: JoinRequest) -> Result<JoinAccepted, JoinError> {
        let max = self.settings.rooms.max_participants_per_room;
        if self.participants.len() >= max {
            return Err(JoinError::RoomFull(max));
        }

        let assembler =
            UtteranceAssembler::new(self.settings.pipeline.utterance_hard_cap_seconds).map_err(
                |e| {
                    warn!(error = %e, "failed to create opus decoder for joining participant");
                    JoinError::Internal
                },
            )?;

        self.next_participant_seq += 1;
        let id = format!("P_{:02}", self.next_participant_seq);

        let participant = Participant {
            id: id.clone(),
            name: request.name,
            language: request.language,
            queue: request.queue,
            joined_at: Instant::now(),
            state: SpeakerState::Idle,
            assembler,
        };

        let others: Vec<ParticipantInfo> =
            self.participants.values().map(Participant::info).collect();

        let joined_msg = ServerMessage::ParticipantJoined {
            participant: participant.info(),
        };

        info!(
            room_id = %self.room_id,
            participant_id = %id,
            name = %participant.name,
            language = %participant.language,
            "participant joined"
        );

        self.participants.insert(id.clone(), participant);
        self.empty_since = None;
        self.sync_shared();

        self.broadcast(&joined_msg, Some(&id));

        Ok(JoinAccepted {
            room_id: self.room_id.clone(),
            participant_id: id,
            others,
        })
    }

    fn handle_audio(&mut self, participant_id: &str, data: &str) {
        let threshold = self.settings.pipeline.max_consecutive_decode_errors;
        let Some(participant) = self.participants.get_mut(participant_id) else {
            warn!(room_id = %self.room_id, participant_id, "audio from unknown participant");
            return;
        };

        match participant.assembler.append_packet(data) {
            Ok(()) => {
                if participant.state == SpeakerState::Idle {
                    participant.state = SpeakerState::Speaking;
                }
            }
            Err(e) => {
                let run = participant.assembler.consecutive_decode_errors();
                debug!(
                    participant_id,
                    error = %e,
                    run,
                    "dropped undecodable audio packet"
                );
                if run >= threshold {
                    warn!(
                        room_id = %self.room_id,
                        participant_id,
                        run,
                        "aborting utterance after consecutive decode failures"
                    );
                    participant.assembler.abort();
                    if participant.state == SpeakerState::Speaking {
                        participant.state = SpeakerState::Idle;
                    }
                    let msg = ServerMessage::error(ErrorCode::PipelineError, "CorruptedStream");
                    self.send_to(participant_id, msg);
                }
            }
        }
    }

    fn handle_utterance_end(&mut self, participant_id: &str) {
        // Snapshot before borrowing the speaker mutably: distinct languages
        // of everyone present right now. Later joins and leaves do not
        // retroactively change the job.
        let targets: BTreeSet<String> = self
            .participants
            .values()
            .map(|p| p.language.clone())
            .collect();

        let Some(participant) = self.participants.get_mut(participant_id) else {
            warn!(room_id = %self.room_id, participant_id, "utterance_end from unknown participant");
            return;
        };

        // Preconditions: currently speaking with buffered audio. Anything
        // else is a silent no-op.
        if participant.state != SpeakerState::Speaking || participant.assembler.is_empty() {
            debug!(participant_id, "utterance_end without active utterance, ignoring");
            return;
        }

        let pcm = participant.assembler.take();
        let declared = participant.language.clone();
        participant.state = SpeakerState::Processing;

        debug!(
            room_id = %self.room_id,
            participant_id,
            seconds = pcm.len() as f64 / babblefish_pipeline::PIPELINE_SAMPLE_RATE as f64,
            targets = targets.len(),
            "queueing utterance for pipeline"
        );

        let pipeline = self.pipeline.clone();
        let tx = self.self_tx.clone();
        let speaker = participant_id.to_string();
        tokio::spawn(async move {
            let outcome = pipeline
                .transcribe_and_translate(pcm, &declared, &targets)
                .await;
            // Room may be gone by now; the result is simply discarded.
            let _ = tx
                .send(RoomCommand::PipelineDone {
                    participant_id: speaker,
                    outcome,
                })
                .await;
        });
    }

    fn handle_pipeline_done(
        &mut self,
        participant_id: &str,
        outcome: Result<PipelineResult, PipelineError>,
    ) {
        let Some(participant) = self.participants.get_mut(participant_id) else {
            debug!(
                room_id = %self.room_id,
                participant_id,
                "discarding pipeline result for departed participant"
            );
            return;
        };

        // Audio may have kept buffering while the job ran; resume speaking
        // if so.
        participant.state = if participant.assembler.is_empty() {
            SpeakerState::Idle
        } else {
            SpeakerState::Speaking
        };
        let speaker_name = participant.name.clone();

        match outcome {
            Ok(result) if result.is_empty() => {
                debug!(participant_id, "empty transcription, nothing to broadcast");
            }
            Ok(result) => {
                let msg = ServerMessage::Translation {
                    speaker_id: participant_id.to_string(),
                    speaker_name,
                    source_lang: result.source_lang,
                    source_text: result.source_text,
                    translations: result.translations,
                    timestamp: epoch_secs(),
                };
                self.broadcast(&msg, Some(participant_id));
            }
            Err(e) => {
                warn!(
                    room_id = %self.room_id,
                    participant_id,
                    error = %e,
                    "pipeline failed for utterance"
                );
                let msg = ServerMessage::error(ErrorCode::PipelineError, e.to_string());
                self.send_to(participant_id, msg);
            }
        }
    }

    /// Removes a participant, notifying the rest. Safe to call for ids that
    /// already left. The send queue is left open: after a voluntary leave
    /// the connection drops back to pre-join and may join again.
    fn remove_participant(&mut self, participant_id: &str) {
        let Some(participant) = self.participants.remove(participant_id) else {
            return;
        };
        info!(
            room_id = %self.room_id,
            participant_id,
            name = %participant.name,
            "participant left"
        );

        if self.participants.is_empty() {
            self.empty_since = Some(Instant::now());
        }
        self.sync_shared();

        let msg = ServerMessage::ParticipantLeft {
            participant_id: participant_id.to_string(),
        };
        self.broadcast(&msg, None);
    }

    /// Forcibly disconnects a participant whose queue cannot take a
    /// critical message: the closed queue ends the connection's tasks.
    fn force_disconnect(&mut self, participant_id: &str) {
        if let Some(participant) = self.participants.get(participant_id) {
            participant.queue.close();
        }
        self.remove_participant(participant_id);
    }

    /// Fans a message out to every member except `exclude`. Members whose
    /// queue rejects a critical message are disconnected.
    fn broadcast(&mut self, msg: &ServerMessage, exclude: Option<&str>) {
        let mut evict: Vec<String> = Vec::new();
        for (id, participant) in &self.participants {
            if exclude == Some(id.as_str()) {
                continue;
            }
            if participant.queue.push(msg.clone()).is_err() {
                warn!(
                    room_id = %self.room_id,
                    participant_id = %id,
                    "send queue rejected critical message, disconnecting"
                );
                evict.push(id.clone());
            }
        }
        for id in evict {
            self.force_disconnect(&id);
        }
    }

    fn send_to(&mut self, participant_id: &str, msg: ServerMessage) {
        let Some(participant) = self.participants.get(participant_id) else {
            return;
        };
        if participant.queue.push(msg).is_err() {
            warn!(
                room_id = %self.room_id,
                participant_id,
                "send queue rejected critical message, disconnecting"
            );
            self.force_disconnect(participant_id);
        }
    }

    fn sync_shared(&self) {
        self.shared
            .participant_count
            .store(self.participants.len(), Ordering::Relaxed);
        if let Ok(mut guard) = self.shared.empty_since.lock() {
            *guard = self.empty_since;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audiopus::coder::Encoder;
    use audiopus::{Application, Channels, SampleRate};
    use babblefish_pipeline::{AsrEngine, AsrRequest, AsrResult, LanguageRegistry, TranslationEngine};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    struct ScriptedAsr {
        text: &'static str,
        language: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl AsrEngine for ScriptedAsr {
        async fn transcribe(&self, _request: AsrRequest) -> anyhow::Result<AsrResult> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AsrResult {
                text: self.text.to_string(),
                language: Some(self.language.to_string()),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTranslator {
        fail_all: bool,
    }

    #[async_trait]
    impl TranslationEngine for EchoTranslator {
        async fn translate(
            &self,
            text: &str,
            _source: &str,
            target: &str,
        ) -> anyhow::Result<String> {
            if self.fail_all {
                anyhow::bail!("translator down");
            }
            Ok(format!("{text} [{target}]"))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct Harness {
        handle: RoomHandle,
        rooms: Arc<DashMap<String, RoomHandle>>,
    }

    fn settings(max_participants: usize, room_timeout_seconds: u64) -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.rooms.max_participants_per_room = max_participants;
        settings.rooms.room_timeout_seconds = room_timeout_seconds;
        Arc::new(settings)
    }

    fn spawn_room(
        settings: Arc<Settings>,
        asr_text: &'static str,
        asr_lang: &'static str,
        asr_delay: Duration,
        fail_translations: bool,
    ) -> Harness {
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(ScriptedAsr {
                text: asr_text,
                language: asr_lang,
                delay: asr_delay,
            }),
            Some(Arc::new(EchoTranslator {
                fail_all: fail_translations,
            })),
            Arc::new(LanguageRegistry::new()),
            1,
            None,
        ));
        let rooms = Arc::new(DashMap::new());
        let handle = Room::spawn("ABCDEF".to_string(), pipeline, settings, rooms.clone());
        rooms.insert("ABCDEF".to_string(), handle.clone());
        Harness { handle, rooms }
    }

    async fn join(
        handle: &RoomHandle,
        name: &str,
        language: &str,
    ) -> (Result<JoinAccepted, JoinError>, OutboundQueue) {
        let queue = OutboundQueue::new(16);
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(RoomCommand::Join {
                request: JoinRequest {
                    name: name.to_string(),
                    language: language.to_string(),
                    queue: queue.clone(),
                },
                reply,
            })
            .await
            .expect("room alive");
        (rx.await.expect("join reply"), queue)
    }

    async fn recv(queue: &OutboundQueue) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), queue.pop())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed")
    }

    async fn assert_silent(queue: &OutboundQueue) {
        let got = tokio::time::timeout(Duration::from_millis(100), queue.pop()).await;
        assert!(got.is_err(), "expected silence, got {:?}", got);
    }

    fn opus_frame_b64() -> String {
        let encoder = Encoder::new(SampleRate::Hz16000, Channels::Mono, Application::Voip)
            .expect("encoder");
        let mut out = vec![0u8; 4000];
        let written = encoder.encode(&[0i16; 320], &mut out).expect("encode");
        out.truncate(written);
        BASE64.encode(&out)
    }

    async fn speak(handle: &RoomHandle, participant_id: &str) {
        handle
            .tx
            .send(RoomCommand::Audio {
                participant_id: participant_id.to_string(),
                data: opus_frame_b64(),
            })
            .await
            .unwrap();
        handle
            .tx
            .send(RoomCommand::UtteranceEnd {
                participant_id: participant_id.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_at_capacity_is_rejected_without_side_effects() {
        let h = spawn_room(settings(2, 3600), "hi", "en", Duration::ZERO, false);

        let (alice, alice_q) = join(&h.handle, "Alice", "en").await;
        let alice = alice.unwrap();
        assert_eq!(alice.participant_id, "P_01");
        assert!(alice.others.is_empty());

        let (bob, _bob_q) = join(&h.handle, "Bob", "es").await;
        assert_eq!(bob.unwrap().others.len(), 1);
        // Alice hears about Bob.
        assert!(matches!(
            recv(&alice_q).await,
            ServerMessage::ParticipantJoined { .. }
        ));

        let (carol, _carol_q) = join(&h.handle, "Carol", "fr").await;
        match carol {
            Err(JoinError::RoomFull(max)) => assert_eq!(max, 2),
            other => panic!("expected RoomFull, got {other:?}"),
        }
        assert_eq!(h.handle.participant_count(), 2);
        // No participant_joined leaked for the rejected join.
        assert_silent(&alice_q).await;
    }

    #[tokio::test]
    async fn utterance_end_without_audio_is_a_noop() {
        let h = spawn_room(settings(10, 3600), "hi", "en", Duration::ZERO, false);
        let (alice, alice_q) = join(&h.handle, "Alice", "en").await;
        let alice = alice.unwrap();

        h.handle
            .tx
            .send(RoomCommand::UtteranceEnd {
                participant_id: alice.participant_id,
            })
            .await
            .unwrap();

        assert_silent(&alice_q).await;
    }

    #[tokio::test]
    async fn translation_reaches_everyone_but_the_speaker() {
        let h = spawn_room(
            settings(10, 3600),
            "Hello everyone",
            "en",
            Duration::ZERO,
            false,
        );
        let (alice, alice_q) = join(&h.handle, "Alice", "es").await;
        let _alice = alice.unwrap();
        let (bob, bob_q) = join(&h.handle, "Bob", "en").await;
        let bob = bob.unwrap();
        // Drain Alice's roster update about Bob.
        assert!(matches!(
            recv(&alice_q).await,
            ServerMessage::ParticipantJoined { .. }
        ));

        speak(&h.handle, &bob.participant_id).await;

        match recv(&alice_q).await {
            ServerMessage::Translation {
                speaker_id,
                speaker_name,
                source_lang,
                source_text,
                translations,
                ..
            } => {
                assert_eq!(speaker_id, bob.participant_id);
                assert_eq!(speaker_name, "Bob");
                assert_eq!(source_lang, "en");
                assert_eq!(source_text, "Hello everyone");
                // Identity entry plus Alice's language.
                assert_eq!(translations["en"], "Hello everyone");
                assert_eq!(translations["es"], "Hello everyone [spa_Latn]");
            }
            other => panic!("expected translation, got {other:?}"),
        }
        // The speaker never receives their own result.
        assert_silent(&bob_q).await;
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let h = spawn_room(settings(10, 3600), "hi", "en", Duration::ZERO, false);
        let (alice, alice_q) = join(&h.handle, "Alice", "en").await;
        let _alice = alice.unwrap();
        let (bob, _bob_q) = join(&h.handle, "Bob", "es").await;
        let bob = bob.unwrap();
        assert!(matches!(
            recv(&alice_q).await,
            ServerMessage::ParticipantJoined { .. }
        ));

        for _ in 0..2 {
            h.handle
                .tx
                .send(RoomCommand::Leave {
                    participant_id: bob.participant_id.clone(),
                })
                .await
                .unwrap();
        }

        assert!(matches!(
            recv(&alice_q).await,
            ServerMessage::ParticipantLeft { .. }
        ));
        assert_silent(&alice_q).await;
        assert_eq!(h.handle.participant_count(), 1);
    }

    #[tokio::test]
    async fn target_snapshot_survives_a_leave_during_processing() {
        let h = spawn_room(
            settings(10, 3600),
            "good morning",
            "en",
            Duration::from_millis(100),
            false,
        );
        let (alice, _alice_q) = join(&h.handle, "Alice", "en").await;
        let alice = alice.unwrap();
        let (bob, bob_q) = join(&h.handle, "Bob", "es").await;
        let bob = bob.unwrap();
        let (carol, _carol_q) = join(&h.handle, "Carol", "ja").await;
        let carol = carol.unwrap();
        assert!(matches!(
            recv(&bob_q).await,
            ServerMessage::ParticipantJoined { .. }
        ));

        speak(&h.handle, &alice.participant_id).await;
        // Carol leaves while the job is in flight; the snapshot keeps "ja".
        h.handle
            .tx
            .send(RoomCommand::Leave {
                participant_id: carol.participant_id,
            })
            .await
            .unwrap();

        assert!(matches!(
            recv(&bob_q).await,
            ServerMessage::ParticipantLeft { .. }
        ));
        match recv(&bob_q).await {
            ServerMessage::Translation { translations, .. } => {
                assert!(translations.contains_key("ja"));
                assert!(translations.contains_key("es"));
            }
            other => panic!("expected translation, got {other:?}"),
        }
        let _ = bob;
    }

    #[tokio::test]
    async fn result_for_departed_speaker_is_discarded() {
        let h = spawn_room(
            settings(10, 3600),
            "gone already",
            "en",
            Duration::from_millis(100),
            false,
        );
        let (alice, _alice_q) = join(&h.handle, "Alice", "en").await;
        let alice = alice.unwrap();
        let (bob, bob_q) = join(&h.handle, "Bob", "es").await;
        let _bob = bob.unwrap();

        speak(&h.handle, &alice.participant_id).await;
        h.handle
            .tx
            .send(RoomCommand::Leave {
                participant_id: alice.participant_id,
            })
            .await
            .unwrap();

        assert!(matches!(
            recv(&bob_q).await,
            ServerMessage::ParticipantLeft { .. }
        ));
        // The in-flight result is dropped, not broadcast.
        assert_silent(&bob_q).await;
        // Room is still usable.
        let (dave, _dave_q) = join(&h.handle, "Dave", "fr").await;
        assert!(dave.is_ok());
    }

    #[tokio::test]
    async fn decode_failure_run_aborts_the_utterance() {
        let h = spawn_room(settings(10, 3600), "hi", "en", Duration::ZERO, false);
        let (alice, alice_q) = join(&h.handle, "Alice", "en").await;
        let alice = alice.unwrap();

        for _ in 0..5 {
            h.handle
                .tx
                .send(RoomCommand::Audio {
                    participant_id: alice.participant_id.clone(),
                    data: "not base64 at all".to_string(),
                })
                .await
                .unwrap();
        }

        match recv(&alice_q).await {
            ServerMessage::Error { code, message } => {
                assert_eq!(code, ErrorCode::PipelineError);
                assert_eq!(message, "CorruptedStream");
            }
            other => panic!("expected error, got {other:?}"),
        }

        // The aborted utterance is gone: utterance_end finds nothing.
        h.handle
            .tx
            .send(RoomCommand::UtteranceEnd {
                participant_id: alice.participant_id,
            })
            .await
            .unwrap();
        assert_silent(&alice_q).await;
    }

    #[tokio::test]
    async fn pipeline_failure_reaches_only_the_speaker() {
        let h = spawn_room(settings(10, 3600), "hola", "es", Duration::ZERO, true);
        let (alice, alice_q) = join(&h.handle, "Alice", "es").await;
        let alice = alice.unwrap();
        let (bob, bob_q) = join(&h.handle, "Bob", "en").await;
        let _bob = bob.unwrap();
        assert!(matches!(
            recv(&alice_q).await,
            ServerMessage::ParticipantJoined { .. }
        ));

        speak(&h.handle, &alice.participant_id).await;

        match recv(&alice_q).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::PipelineError),
            other => panic!("expected pipeline error, got {other:?}"),
        }
        assert_silent(&bob_q).await;
    }

    #[tokio::test]
    async fn participant_ids_are_never_reused() {
        let h = spawn_room(settings(10, 3600), "hi", "en", Duration::ZERO, false);
        let (alice, _alice_q) = join(&h.handle, "Alice", "en").await;
        let alice = alice.unwrap();
        assert_eq!(alice.participant_id, "P_01");

        h.handle
            .tx
            .send(RoomCommand::Leave {
                participant_id: alice.participant_id,
            })
            .await
            .unwrap();

        let (bob, _bob_q) = join(&h.handle, "Bob", "en").await;
        assert_eq!(bob.unwrap().participant_id, "P_02");
    }

    #[tokio::test]
    async fn empty_room_expires_after_grace() {
        let h = spawn_room(settings(10, 0), "hi", "en", Duration::ZERO, false);
        // Never joined; the zero-second grace fires immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.rooms.is_empty());
        // The inbox is gone too.
        assert!(h
            .handle
            .tx
            .send(RoomCommand::Leave {
                participant_id: "P_01".to_string(),
            })
            .await
            .is_err());
    }
}
