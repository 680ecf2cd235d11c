use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use warp::ws::Message;

use super::broadcast;
use super::negotiator::{ConnectDisposition, Producer, Transport};
use super::room::{generate_participant_id, Participant, Role, Room, RoomRegistry};
use super::session::{ExamSession, TickOutcome};
use super::signaling::{ClientMessage, ServerMessage};
use crate::archive::{SubmissionRecord, SubmissionSink};
use crate::error::{ExamError, Result};
use crate::media::{DtlsParameters, MediaEngine, MediaKind, RtpParameters, TransportDirection};

/// Per-connection signaling state. One of these exists for the lifetime of a
/// WebSocket; the participant id is assigned at accept time.
pub struct SignalingContext {
    pub participant_id: String,
    pub room: Option<String>,
    pub sender: mpsc::UnboundedSender<Message>,
}

impl SignalingContext {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            participant_id: generate_participant_id(),
            room: None,
            sender,
        }
    }

    /// Direct reply to this connection. A failed send means the socket is
    /// gone; the read loop will run disconnect cleanup.
    pub fn send(&self, message: &ServerMessage) {
        if let Some(frame) = message.to_ws() {
            let _ = self.sender.send(frame);
        }
    }
}

/// The coordination core: routes inbound messages to room-scoped handlers,
/// drives transport negotiation against the media engine, and owns exam
/// session lifecycles.
///
/// Every mutation of a room happens inside that room's mutex. Engine calls
/// suspend with the lock released and re-validate on resume, so a slow
/// negotiation never blocks the rest of the room and never commits state for
/// a participant who disconnected mid-flight.
pub struct ExamServer {
    engine: Arc<dyn MediaEngine>,
    sink: Arc<dyn SubmissionSink>,
    registry: Arc<RoomRegistry>,
    max_participants: usize,
}

impl ExamServer {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        sink: Arc<dyn SubmissionSink>,
        max_participants: usize,
    ) -> Self {
        Self {
            engine,
            sink,
            registry: Arc::new(RoomRegistry::new()),
            max_participants,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.registry.room_count().await
    }

    /// Route one inbound message. State errors become `error{code,message}`
    /// replies on the sending connection; the connection stays open.
    pub async fn handle_message(&self, ctx: &mut SignalingContext, message: ClientMessage) {
        let result = match message {
            ClientMessage::JoinRoom {
                room,
                username,
                role,
            } => self.handle_join(ctx, room, username, role).await,
            ClientMessage::CreateWebRtcTransport { sender } => {
                self.handle_create_transport(ctx, sender).await
            }
            ClientMessage::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                self.handle_connect_transport(ctx, transport_id, dtls_parameters)
                    .await
            }
            ClientMessage::Produce {
                transport_id,
                kind,
                rtp_parameters,
            } => {
                self.handle_produce(ctx, transport_id, kind, rtp_parameters)
                    .await
            }
            ClientMessage::StartExam { duration_seconds } => {
                self.handle_start_exam(ctx, duration_seconds).await
            }
            ClientMessage::RecordAnswer { question_id, value } => {
                self.handle_record_answer(ctx, question_id, value).await
            }
            ClientMessage::SubmitExam {
                exam_id,
                student_id,
                answers,
                remaining_time,
            } => {
                self.handle_submit_exam(ctx, exam_id, student_id, answers, remaining_time)
                    .await
            }
            ClientMessage::ProctorMessage {
                message,
                target_student_id,
            } => {
                self.handle_proctor_message(ctx, message, target_student_id)
                    .await
            }
        };

        if let Err(e) = result {
            tracing::warn!(
                participant_id = %ctx.participant_id,
                error = %e,
                "Rejected client message"
            );
            ctx.send(&ServerMessage::Error {
                code: e.code(),
                message: e.to_string(),
            });
        }
    }

    /// Unconditional cleanup when a connection closes.
    pub async fn handle_disconnect(&self, ctx: &SignalingContext) {
        let Some(room_code) = ctx.room.clone() else {
            tracing::debug!(
                participant_id = %ctx.participant_id,
                "Connection closed before joining a room"
            );
            return;
        };

        let Some(room) = self.registry.get(&room_code).await else {
            return;
        };

        run_cleanup(
            &self.registry,
            self.engine.as_ref(),
            &room,
            vec![ctx.participant_id.clone()],
        )
        .await;
    }

    async fn room_for(&self, ctx: &SignalingContext) -> Result<Arc<Room>> {
        let room_code = ctx
            .room
            .as_deref()
            .ok_or_else(|| ExamError::RoomNotFound("no room joined".to_string()))?;
        self.registry
            .get(room_code)
            .await
            .ok_or_else(|| ExamError::RoomNotFound(room_code.to_string()))
    }

    async fn handle_join(
        &self,
        ctx: &mut SignalingContext,
        room_code: String,
        username: String,
        role: String,
    ) -> Result<()> {
        if ctx.room.is_some() {
            return Err(ExamError::malformed("already joined a room"));
        }
        if room_code.is_empty() {
            return Err(ExamError::malformed("room code is required"));
        }
        let role = Role::parse(&role)?;

        let room = self.registry.get_or_create(&room_code).await;

        let dead = {
            let mut state = room.state.lock().await;

            if state.participants.len() >= self.max_participants {
                drop(state);
                self.registry.remove_if_idle(&room_code).await;
                return Err(ExamError::RoomFull(room_code));
            }
            if role == Role::Teacher && state.teacher().is_some() {
                drop(state);
                self.registry.remove_if_idle(&room_code).await;
                return Err(ExamError::RoleConflict(room_code));
            }

            // Roster snapshot and join notice commit atomically with the
            // insertion: the joiner sees exactly the members present now.
            let roster = state.roster_excluding(&ctx.participant_id);
            let joined = ServerMessage::UserJoined {
                id: ctx.participant_id.clone(),
                name: username.clone(),
                role,
            };
            let dead = broadcast::to_all(&state, &joined);

            state.participants.push(Participant::new(
                ctx.participant_id.clone(),
                username,
                role,
                ctx.sender.clone(),
            ));

            let exam_session = state.exam.as_ref().and_then(ExamSession::snapshot);
            ctx.send(&ServerMessage::RoomJoined {
                room_id: room_code.clone(),
                participants: roster,
                exam_session,
            });
            dead
        };

        ctx.room = Some(room_code.clone());
        tracing::info!(
            participant_id = %ctx.participant_id,
            room = %room_code,
            ?role,
            "Participant joined room"
        );

        self.cleanup_dead(&room, dead).await;
        Ok(())
    }

    async fn handle_create_transport(&self, ctx: &SignalingContext, sender: bool) -> Result<()> {
        let room = self.room_for(ctx).await?;
        {
            let state = room.state.lock().await;
            if state.participant(&ctx.participant_id).is_none() {
                return Err(ExamError::RoomNotFound(room.code.clone()));
            }
        }

        let direction = if sender {
            TransportDirection::Send
        } else {
            TransportDirection::Recv
        };

        // Engine allocation runs with the room lock released
        let options = self.engine.create_transport(direction).await?;
        let transport_id = options.id.clone();

        let mut state = room.state.lock().await;
        let Some(participant) = state.participant_mut(&ctx.participant_id) else {
            // Owner disconnected while the engine was allocating: roll back
            drop(state);
            self.engine.close_transport(transport_id.clone()).await;
            tracing::warn!(
                participant_id = %ctx.participant_id,
                transport_id = %transport_id,
                "Discarded transport for departed participant"
            );
            return Ok(());
        };

        participant
            .transports
            .insert(transport_id.clone(), Transport::new(transport_id.clone(), direction));
        drop(state);

        tracing::info!(
            participant_id = %ctx.participant_id,
            transport_id = %transport_id,
            ?direction,
            "Transport created"
        );
        ctx.send(&ServerMessage::TransportCreated(options));
        Ok(())
    }

    async fn handle_connect_transport(
        &self,
        ctx: &SignalingContext,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let room = self.room_for(ctx).await?;

        {
            let mut state = room.state.lock().await;
            let participant = state
                .participant_mut(&ctx.participant_id)
                .ok_or_else(|| ExamError::RoomNotFound(room.code.clone()))?;
            let transport = participant.transport_mut(&transport_id)?;

            if transport.begin_connect()? == ConnectDisposition::AlreadyConnected {
                // Client retry; answer success without touching the engine
                ctx.send(&ServerMessage::TransportConnected { transport_id });
                return Ok(());
            }
        }

        let result = self
            .engine
            .connect_transport(transport_id.clone(), dtls_parameters)
            .await;

        let mut state = room.state.lock().await;
        let Some(participant) = state.participant_mut(&ctx.participant_id) else {
            drop(state);
            self.engine.close_transport(transport_id).await;
            return Ok(());
        };

        match result {
            Ok(()) => {
                match participant.transports.get_mut(&transport_id) {
                    Some(transport) => transport.commit_connect(),
                    // Closed by cleanup while the engine was connecting
                    None => return Ok(()),
                }
                tracing::info!(
                    participant_id = %ctx.participant_id,
                    transport_id = %transport_id,
                    "Transport connected"
                );
                ctx.send(&ServerMessage::TransportConnected { transport_id });
                Ok(())
            }
            Err(e) => {
                // Roll back: the transport leaves the machine closed and is
                // released so nothing dangles on the participant
                if let Some(mut transport) = participant.transports.remove(&transport_id) {
                    transport.fail_connect();
                }
                drop(state);
                self.engine.close_transport(transport_id).await;
                Err(e.into())
            }
        }
    }

    async fn handle_produce(
        &self,
        ctx: &SignalingContext,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<()> {
        let room = self.room_for(ctx).await?;

        {
            let state = room.state.lock().await;
            let participant = state
                .participant(&ctx.participant_id)
                .ok_or_else(|| ExamError::RoomNotFound(room.code.clone()))?;
            participant
                .transport(&transport_id)?
                .ensure_ready_for_producer()?;
        }

        let options = self
            .engine
            .create_producer(transport_id.clone(), kind, rtp_parameters)
            .await?;

        let dead = {
            let mut state = room.state.lock().await;
            let Some(participant) = state.participant_mut(&ctx.participant_id) else {
                // Disconnect cleanup already released the transport
                return Ok(());
            };
            match participant.transport(&transport_id) {
                Ok(transport) if transport.is_connected() => {}
                _ => return Ok(()),
            }

            participant.producers.insert(
                options.id.clone(),
                Producer::new(options.id.clone(), transport_id.clone(), kind),
            );
            ctx.send(&ServerMessage::ProducerCreated {
                producer_id: options.id.clone(),
            });

            tracing::info!(
                participant_id = %ctx.participant_id,
                transport_id = %transport_id,
                producer_id = %options.id,
                ?kind,
                "Producer created"
            );

            // Only now, with the transport committed connected, does the
            // producer become visible to the rest of the room.
            broadcast::to_others(
                &state,
                &ctx.participant_id,
                &ServerMessage::NewProducer {
                    producer_id: options.id,
                    participant_id: ctx.participant_id.clone(),
                    kind,
                },
            )
        };

        self.cleanup_dead(&room, dead).await;
        Ok(())
    }

    async fn handle_start_exam(&self, ctx: &SignalingContext, duration_seconds: u64) -> Result<()> {
        if duration_seconds == 0 {
            return Err(ExamError::malformed("durationSeconds must be positive"));
        }
        let room = self.room_for(ctx).await?;

        let dead = {
            let mut state = room.state.lock().await;
            let participant = state
                .participant(&ctx.participant_id)
                .ok_or_else(|| ExamError::RoomNotFound(room.code.clone()))?;
            if participant.role != Role::Teacher {
                return Err(ExamError::InvalidRole(
                    "only the teacher may start the exam".to_string(),
                ));
            }
            if state.exam.is_some() {
                return Err(ExamError::AlreadyRunning(room.code.clone()));
            }

            let session = ExamSession::start(duration_seconds);
            tracing::info!(
                room = %room.code,
                exam_id = %session.exam_id,
                duration_seconds,
                "Exam started"
            );

            let started = ServerMessage::ExamStarted {
                exam_id: session.exam_id.clone(),
                duration_seconds,
                remaining_time: session.remaining_secs,
            };
            state.exam = Some(session);
            broadcast::to_all(&state, &started)
        };

        tokio::spawn(run_countdown(
            self.registry.clone(),
            self.engine.clone(),
            self.sink.clone(),
            room.clone(),
        ));

        self.cleanup_dead(&room, dead).await;
        Ok(())
    }

    async fn handle_record_answer(
        &self,
        ctx: &SignalingContext,
        question_id: String,
        value: String,
    ) -> Result<()> {
        let room = self.room_for(ctx).await?;
        let mut state = room.state.lock().await;

        let participant = state
            .participant(&ctx.participant_id)
            .ok_or_else(|| ExamError::RoomNotFound(room.code.clone()))?;
        if participant.role != Role::Student {
            return Err(ExamError::InvalidRole(
                "only students may record answers".to_string(),
            ));
        }

        let exam = state
            .exam
            .as_mut()
            .ok_or_else(|| ExamError::AlreadySubmitted(room.code.clone()))?;
        exam.record_answer(&ctx.participant_id, &question_id, value)?;

        ctx.send(&ServerMessage::AnswerRecorded { question_id });
        Ok(())
    }

    async fn handle_submit_exam(
        &self,
        ctx: &SignalingContext,
        exam_id: String,
        student_id: String,
        answers: HashMap<String, String>,
        remaining_time: u64,
    ) -> Result<()> {
        let room = self.room_for(ctx).await?;

        let mut archive_record: Option<SubmissionRecord> = None;
        let mut dead = Vec::new();
        {
            let mut state = room.state.lock().await;
            let participant = state
                .participant(&ctx.participant_id)
                .ok_or_else(|| ExamError::RoomNotFound(room.code.clone()))?;
            let role = participant.role;
            let student_ids: Vec<String> = state.students().map(|p| p.id.clone()).collect();

            let exam = state
                .exam
                .as_mut()
                .ok_or_else(|| ExamError::AlreadySubmitted(room.code.clone()))?;
            if exam.exam_id != exam_id {
                return Err(ExamError::malformed(format!("unknown exam id {}", exam_id)));
            }

            match role {
                Role::Teacher => {
                    // Force closure for the whole room
                    if !exam.try_close_submitted() {
                        return Err(ExamError::AlreadySubmitted(exam.exam_id.clone()));
                    }
                    let record = exam.to_record(&room.code);
                    let closed = ServerMessage::ExamSubmitted {
                        exam_id: exam.exam_id.clone(),
                        remaining_time: exam.remaining_secs,
                    };
                    tracing::info!(
                        room = %room.code,
                        exam_id = %record.exam_id,
                        "Exam closed by teacher"
                    );
                    archive_record = Some(record);
                    dead = broadcast::to_all(&state, &closed);
                }
                Role::Student => {
                    if student_id != ctx.participant_id {
                        return Err(ExamError::malformed(
                            "studentId does not match the connected participant",
                        ));
                    }
                    if !exam.is_running() {
                        // Ledger is frozen once the session is terminal
                        return Err(ExamError::AlreadySubmitted(exam.exam_id.clone()));
                    }
                    if remaining_time != exam.remaining_secs {
                        tracing::debug!(
                            claimed = remaining_time,
                            authoritative = exam.remaining_secs,
                            "Client clock drift on submit"
                        );
                    }

                    exam.merge_answers(&ctx.participant_id, answers);
                    exam.finalize_student(&ctx.participant_id)?;

                    let exam_id = exam.exam_id.clone();
                    let remaining = exam.remaining_secs;
                    let everyone_done =
                        exam.all_students_finalized(student_ids.iter().map(String::as_str));
                    let mut closed_record = None;
                    if everyone_done && exam.try_close_submitted() {
                        closed_record = Some(exam.to_record(&room.code));
                    }

                    ctx.send(&ServerMessage::SubmissionReceived {
                        exam_id: exam_id.clone(),
                        student_id: ctx.participant_id.clone(),
                    });
                    dead = broadcast::to_teacher(
                        &state,
                        &ServerMessage::StudentSubmitted {
                            student_id: ctx.participant_id.clone(),
                            remaining_time: remaining,
                        },
                    );
                    tracing::info!(
                        room = %room.code,
                        student_id = %ctx.participant_id,
                        remaining_time = remaining,
                        "Student submitted exam"
                    );

                    if let Some(record) = closed_record {
                        dead.extend(broadcast::to_all(
                            &state,
                            &ServerMessage::ExamSubmitted {
                                exam_id,
                                remaining_time: remaining,
                            },
                        ));
                        archive_record = Some(record);
                    }
                }
            }
        }

        if let Some(record) = archive_record {
            if let Err(e) = self.sink.archive(record).await {
                tracing::error!(room = %room.code, error = %e, "Failed to archive submission");
            }
        }
        self.cleanup_dead(&room, dead).await;
        Ok(())
    }

    async fn handle_proctor_message(
        &self,
        ctx: &SignalingContext,
        message: String,
        target_student_id: Option<String>,
    ) -> Result<()> {
        let room = self.room_for(ctx).await?;

        let dead = {
            let state = room.state.lock().await;
            let participant = state
                .participant(&ctx.participant_id)
                .ok_or_else(|| ExamError::RoomNotFound(room.code.clone()))?;
            if participant.role != Role::Teacher {
                return Err(ExamError::InvalidRole(
                    "only the teacher may send proctor messages".to_string(),
                ));
            }

            let outbound = ServerMessage::ProctorMessage {
                message,
                from: ctx.participant_id.clone(),
            };
            match target_student_id {
                Some(student_id) => broadcast::to_student(&state, &student_id, &outbound)
                    .ok_or_else(|| {
                        ExamError::malformed(format!("no student {} in room", student_id))
                    })?,
                None => broadcast::to_students(&state, &outbound),
            }
        };

        self.cleanup_dead(&room, dead).await;
        Ok(())
    }

    async fn cleanup_dead(&self, room: &Arc<Room>, dead: Vec<String>) {
        if dead.is_empty() {
            return;
        }
        run_cleanup(&self.registry, self.engine.as_ref(), room, dead).await;
    }
}

/// Remove participants and everything they own. Works through a worklist so
/// dead sockets discovered while broadcasting `userLeft` are cleaned up too,
/// without async recursion. Engine teardown happens outside the room lock.
async fn run_cleanup(
    registry: &RoomRegistry,
    engine: &dyn MediaEngine,
    room: &Room,
    seed: Vec<String>,
) {
    let mut pending = seed;
    while let Some(participant_id) = pending.pop() {
        let (removed, dead) = {
            let mut state = room.state.lock().await;
            match state.remove_participant(&participant_id) {
                Some(participant) => {
                    let left = ServerMessage::UserLeft {
                        user_id: participant_id.clone(),
                    };
                    let dead = broadcast::to_all(&state, &left);
                    (participant, dead)
                }
                // Already cleaned up via another path
                None => continue,
            }
        };

        tracing::info!(
            room = %room.code,
            participant_id = %removed.id,
            role = ?removed.role,
            transports = removed.transports.len(),
            "Participant removed"
        );

        for transport_id in removed.transports.keys() {
            engine.close_transport(transport_id.clone()).await;
        }
        pending.extend(dead);
    }

    registry.remove_if_idle(&room.code).await;
}

/// Countdown task for one exam session: one decrement per wall-clock second.
/// Each tick re-checks the status under the room lock, so a tick racing a
/// manual submit can never both commit; whichever observes `running` wins.
async fn run_countdown(
    registry: Arc<RoomRegistry>,
    engine: Arc<dyn MediaEngine>,
    sink: Arc<dyn SubmissionSink>,
    room: Arc<Room>,
) {
    loop {
        sleep(Duration::from_secs(1)).await;

        let (record, dead, stop) = {
            let mut state = room.state.lock().await;
            let Some(exam) = state.exam.as_mut() else {
                break;
            };
            match exam.tick() {
                TickOutcome::Ticked(_) => (None, Vec::new(), false),
                TickOutcome::Idle => (None, Vec::new(), true),
                TickOutcome::Expired => {
                    let record = exam.to_record(&room.code);
                    let dead = broadcast::to_all(
                        &state,
                        &ServerMessage::ExamExpired { remaining_time: 0 },
                    );
                    (Some(record), dead, true)
                }
            }
        };

        if let Some(record) = record {
            tracing::info!(room = %room.code, exam_id = %record.exam_id, "Exam expired");
            if let Err(e) = sink.archive(record).await {
                tracing::error!(room = %room.code, error = %e, "Failed to archive expired exam");
            }
        }
        if !dead.is_empty() {
            run_cleanup(&registry, engine.as_ref(), &room, dead).await;
        }
        if stop {
            break;
        }
    }

    registry.remove_if_idle(&room.code).await;
}
