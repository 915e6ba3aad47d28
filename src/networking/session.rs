//! Live session with the classroom server.
//!
//! `QuizSession` owns the WebSocket lifecycle: it announces the student,
//! dispatches instructor and robot frames into observable state, and carries
//! answers and joystick commands back out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::protocol::{
    encode_message, Envelope, Quiz, QuizAnswer, RobotStatus, VelocityCommand, MSG_ALLOW_JOYSTICK,
    MSG_ANSWER, MSG_ANSWER_EVALUATED, MSG_ANSWER_RECEIVED, MSG_DISABLE_JOYSTICK, MSG_MAP_UPDATE,
    MSG_QUIZ, MSG_ROBOT_CONTROL_VELOCITY, MSG_ROBOT_STATUS, MSG_SESSION_ENDED,
    MSG_STUDENT_CONNECTION, VELOCITY_TOPIC,
};
use super::{DEFAULT_CONNECT_PATH, DEFAULT_SERVER_PORT};
use crate::state::StateCell;
use crate::storage::VisitHistory;
use crate::student::StudentInfo;

/// Frames queued toward the socket before senders see backpressure.
const OUTBOUND_QUEUE: usize = 64;

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport open. Holds the reason the last one went away.
    Disconnected { reason: String },

    /// A transport is being opened.
    Connecting { detail: String },

    /// The transport is open and the identity frame has been sent.
    Connected,

    /// The transport failed. A fresh `connect` leaves this state.
    Error { detail: String },
}

impl ConnectionState {
    /// True only for `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True when a new `connect` call would be accepted.
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected { .. } | ConnectionState::Error { .. }
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected { reason } => write!(f, "Disconnected: {}", reason),
            ConnectionState::Connecting { detail } => write!(f, "Connecting to {}", detail),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error { detail } => write!(f, "Error: {}", detail),
        }
    }
}

/// Session tuning and trust settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Port the server listens on.
    pub port: u16,
    /// Request path of the WebSocket endpoint.
    pub path: String,
    /// Sender ids allowed to broadcast quizzes and joystick grants.
    pub instructor_senders: Vec<String>,
    /// Sender ids allowed to push robot telemetry and map updates.
    pub telemetry_senders: Vec<String>,
    /// rosbridge topic velocity commands are addressed to.
    pub velocity_topic: String,
    /// Delay before the final zero-velocity command after joystick release.
    pub joystick_release_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            path: DEFAULT_CONNECT_PATH.to_string(),
            instructor_senders: vec!["professor".to_string()],
            telemetry_senders: vec!["server".to_string(), "professor".to_string()],
            velocity_topic: VELOCITY_TOPIC.to_string(),
            joystick_release_debounce: Duration::from_millis(100),
        }
    }
}

/// Observable session state, shared between the API and the connection task.
///
/// Mutated only by `QuizSession` and its connection task; consumers read and
/// subscribe through the session's accessors.
#[derive(Clone)]
struct SharedState {
    connection: StateCell<ConnectionState>,
    quiz: StateCell<Option<Quiz>>,
    answers: StateCell<HashMap<String, QuizAnswer>>,
    robot: StateCell<Option<RobotStatus>>,
    joystick: StateCell<bool>,
    map: StateCell<Option<String>>,
    error: StateCell<Option<String>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            connection: StateCell::new(ConnectionState::Disconnected {
                reason: "not yet connected".to_string(),
            }),
            quiz: StateCell::new(None),
            answers: StateCell::new(HashMap::new()),
            robot: StateCell::new(None),
            joystick: StateCell::new(false),
            map: StateCell::new(None),
            error: StateCell::new(None),
        }
    }

    /// Clears everything scoped to one connection.
    fn reset_volatile(&self) {
        self.quiz.set(None);
        self.answers.set(HashMap::new());
        self.robot.set(None);
        self.joystick.set(false);
        self.map.set(None);
    }
}

/// Handle to the single live connection task.
struct ConnectionHandle {
    outbound: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

/// Client session: one student, at most one live server connection.
pub struct QuizSession {
    student: StudentInfo,
    config: SessionConfig,
    history: Option<Arc<VisitHistory>>,
    state: SharedState,
    conn: Mutex<Option<ConnectionHandle>>,
    velocity_seq: Arc<AtomicU64>,
}

impl QuizSession {
    /// Creates a session for `student`. No connection is opened yet.
    pub fn new(student: StudentInfo, config: SessionConfig) -> Self {
        Self {
            student,
            config,
            history: None,
            state: SharedState::new(),
            conn: Mutex::new(None),
            velocity_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wires up answer persistence. Quizzes and answers are then recorded
    /// into the student's visit history as they arrive.
    pub fn with_history(mut self, history: Arc<VisitHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// The student this session belongs to.
    pub fn student(&self) -> &StudentInfo {
        &self.student
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection.get()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.connection.subscribe()
    }

    /// Quiz currently broadcast by the instructor, if any.
    pub fn current_quiz(&self) -> Option<Quiz> {
        self.state.quiz.get()
    }

    /// Subscribes to quiz changes.
    pub fn subscribe_quiz(&self) -> watch::Receiver<Option<Quiz>> {
        self.state.quiz.subscribe()
    }

    /// Answers submitted in this session, keyed by question id.
    pub fn submitted_answers(&self) -> HashMap<String, QuizAnswer> {
        self.state.answers.get()
    }

    /// Subscribes to answer map changes.
    pub fn subscribe_answers(&self) -> watch::Receiver<HashMap<String, QuizAnswer>> {
        self.state.answers.subscribe()
    }

    /// Latest robot telemetry snapshot, if any arrived.
    pub fn robot_status(&self) -> Option<RobotStatus> {
        self.state.robot.get()
    }

    /// Subscribes to telemetry changes.
    pub fn subscribe_robot_status(&self) -> watch::Receiver<Option<RobotStatus>> {
        self.state.robot.subscribe()
    }

    /// Whether the server currently allows joystick control.
    pub fn joystick_enabled(&self) -> bool {
        self.state.joystick.get()
    }

    /// Subscribes to joystick permission changes.
    pub fn subscribe_joystick(&self) -> watch::Receiver<bool> {
        self.state.joystick.subscribe()
    }

    /// Latest map blob (opaque encoded image), if any arrived.
    pub fn current_map(&self) -> Option<String> {
        self.state.map.get()
    }

    /// Subscribes to map updates.
    pub fn subscribe_map(&self) -> watch::Receiver<Option<String>> {
        self.state.map.subscribe()
    }

    /// Most recent local error line, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state.error.get()
    }

    /// Subscribes to the local error line.
    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.state.error.subscribe()
    }

    /// Opens a connection to `ws://{host}:{port}{path}`.
    ///
    /// Accepted only while `Disconnected` or in `Error`; any other state
    /// makes this a no-op, so repeated calls never race a second socket.
    /// Resets quiz, answers, telemetry and the joystick flag for the new
    /// session, then hands the socket to a single background task. Progress
    /// is reported through the connection state.
    pub fn connect(&self, host: &str) {
        let mut conn = self.conn.lock().unwrap();

        if !self.state.connection.get().can_connect() {
            tracing::debug!("Ignoring connect to {}: connection already active", host);
            return;
        }

        if let Some(stale) = conn.take() {
            stale.task.abort();
        }

        let url = format!("ws://{}:{}{}", host, self.config.port, self.config.path);
        tracing::info!("Connecting to {}", url);

        self.state
            .connection
            .set(ConnectionState::Connecting { detail: url.clone() });
        self.state.reset_volatile();

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let task = tokio::spawn(run_connection(
            url,
            self.student.clone(),
            self.config.clone(),
            self.history.clone(),
            self.state.clone(),
            out_rx,
        ));

        *conn = Some(ConnectionHandle {
            outbound: out_tx,
            task,
        });
    }

    /// Tears down the connection and clears all volatile state.
    ///
    /// Allowed from any state and safe to repeat; ends in
    /// `Disconnected(reason)` either way.
    pub fn disconnect(&self, reason: &str) {
        let handle = self.conn.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.task.abort();
        }

        self.state.connection.set(ConnectionState::Disconnected {
            reason: reason.to_string(),
        });
        self.state.reset_volatile();
        tracing::info!("Disconnected: {}", reason);
    }

    /// Answers a question of the current quiz.
    ///
    /// Requires `Connected` and a current quiz containing `question_id`.
    /// Merges the answer into `submitted_answers` with correctness still
    /// unknown, sends the enveloped `ANSWER`, then records it in the visit
    /// history.
    pub async fn submit_answer(
        &self,
        question_id: &str,
        selected_option: &str,
    ) -> Result<QuizAnswer, SessionError> {
        if !self.connection_state().is_connected() {
            return Err(self.local_error(
                "Cannot submit an answer while disconnected",
                SessionError::NotConnected,
            ));
        }

        let quiz = match self.state.quiz.get() {
            Some(quiz) => quiz,
            None => {
                return Err(self.local_error("No active quiz to answer", SessionError::NoActiveQuiz))
            }
        };

        let question = match quiz.question(question_id) {
            Some(question) => question.clone(),
            None => {
                return Err(self.local_error(
                    format!("Unknown question: {}", question_id),
                    SessionError::UnknownQuestion(question_id.to_string()),
                ))
            }
        };

        let answer = QuizAnswer {
            id: format!("ans-{}", Uuid::new_v4()),
            quiz_id: quiz.id.clone(),
            question_id: question.id.clone(),
            student_id: self.student.id.clone(),
            student_name: self.student.name.clone(),
            answer: selected_option.to_string(),
            is_correct: None,
        };

        let text = encode_message(MSG_ANSWER, &answer, &self.student.id)
            .map_err(|e| SessionError::EncodeFailed(e.to_string()))?;

        // Merge before the frame leaves: the receive loop runs concurrently,
        // and an evaluation dispatched right after the send must not be
        // overwritten by this submission.
        self.state.answers.update(|answers| {
            answers.insert(answer.question_id.clone(), answer.clone());
        });

        if let Err(e) = self.send_text(text).await {
            // The frame never left; take the entry back out unless an
            // evaluation or a newer submission already replaced it.
            self.state.answers.update(|answers| {
                if answers
                    .get(&answer.question_id)
                    .is_some_and(|a| a.id == answer.id && a.is_correct.is_none())
                {
                    answers.remove(&answer.question_id);
                }
            });
            return Err(e);
        }

        if let Some(history) = &self.history {
            let history = Arc::clone(history);
            let recorded = answer.clone();
            let title = quiz.title.clone();
            let result = tokio::task::spawn_blocking(move || {
                history.record_answer(&recorded.student_id, &question, &recorded, Some(&title))
            })
            .await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("Failed to persist answer: {}", e),
                Err(e) => tracing::warn!("Answer persistence task failed: {}", e),
            }
        }

        tracing::debug!(
            "Submitted answer {} for question {}",
            answer.id,
            answer.question_id
        );
        Ok(answer)
    }

    /// Publishes a joystick velocity command to the robot.
    ///
    /// Requires `Connected` and the server-granted joystick permission.
    pub async fn send_velocity(&self, linear: f32, angular: f32) -> Result<(), SessionError> {
        if !self.connection_state().is_connected() {
            return Err(self.local_error(
                "Cannot drive the robot while disconnected",
                SessionError::NotConnected,
            ));
        }
        if !self.state.joystick.get() {
            return Err(self.local_error(
                "Joystick control is not enabled",
                SessionError::JoystickDisabled,
            ));
        }

        self.velocity_seq.fetch_add(1, Ordering::SeqCst);

        let text = self.velocity_frame(linear, angular)?;
        self.send_text(text).await
    }

    /// Signals that the joystick returned to center.
    ///
    /// After the configured debounce one final zero-velocity command is
    /// sent, so the robot stops even if the last movement frame was lost.
    /// Skipped when new joystick input arrives in the meantime.
    pub fn release_joystick(&self) {
        let seq = self.velocity_seq.load(Ordering::SeqCst);
        let outbound = match self.conn.lock().unwrap().as_ref() {
            Some(handle) => handle.outbound.clone(),
            None => return,
        };

        let velocity_seq = Arc::clone(&self.velocity_seq);
        let state = self.state.clone();
        let token = self.student.id.clone();
        let topic = self.config.velocity_topic.clone();
        let debounce = self.config.joystick_release_debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            if velocity_seq.load(Ordering::SeqCst) != seq {
                return;
            }
            if !state.connection.get().is_connected() || !state.joystick.get() {
                return;
            }

            let command = VelocityCommand::publish(
                format!("vel-{}", Uuid::new_v4()),
                &topic,
                &token,
                0.0,
                0.0,
            );
            match encode_message(MSG_ROBOT_CONTROL_VELOCITY, &command, &token) {
                Ok(text) => {
                    if outbound.send(Message::Text(text)).await.is_err() {
                        tracing::debug!("Stop command dropped: connection closed");
                    } else {
                        tracing::debug!("Joystick released, stop command sent");
                    }
                }
                Err(e) => tracing::warn!("Failed to encode stop command: {}", e),
            }
        });
    }

    /// Sends an already-built envelope. Requires `Connected`.
    pub async fn send_message(&self, envelope: Envelope) -> Result<(), SessionError> {
        if !self.connection_state().is_connected() {
            return Err(self.local_error(
                format!("Cannot send {} while disconnected", envelope.kind),
                SessionError::NotConnected,
            ));
        }
        let text = envelope
            .encode()
            .map_err(|e| SessionError::EncodeFailed(e.to_string()))?;
        self.send_text(text).await
    }

    fn velocity_frame(&self, linear: f32, angular: f32) -> Result<String, SessionError> {
        let command = VelocityCommand::publish(
            format!("vel-{}", Uuid::new_v4()),
            &self.config.velocity_topic,
            &self.student.id,
            linear,
            angular,
        );
        encode_message(MSG_ROBOT_CONTROL_VELOCITY, &command, &self.student.id)
            .map_err(|e| SessionError::EncodeFailed(e.to_string()))
    }

    async fn send_text(&self, text: String) -> Result<(), SessionError> {
        let outbound = {
            let conn = self.conn.lock().unwrap();
            match conn.as_ref() {
                Some(handle) => handle.outbound.clone(),
                None => {
                    drop(conn);
                    return Err(
                        self.local_error("Cannot send: not connected", SessionError::NotConnected)
                    );
                }
            }
        };

        if outbound.send(Message::Text(text)).await.is_err() {
            return Err(self.local_error(
                "Connection closed while sending",
                SessionError::NotConnected,
            ));
        }
        Ok(())
    }

    /// Records a rejected command on the error channel and returns `err`.
    fn local_error(&self, detail: impl Into<String>, err: SessionError) -> SessionError {
        let detail = detail.into();
        tracing::warn!("{}", detail);
        self.state.error.set(Some(detail));
        err
    }
}

/// Whether the receive loop should keep running after a frame.
enum Flow {
    Continue,
    SessionEnded,
}

/// Connection task: opens the socket, announces the student, then pumps
/// outbound frames and inbound dispatch until closed or cancelled.
async fn run_connection(
    url: String,
    student: StudentInfo,
    config: SessionConfig,
    history: Option<Arc<VisitHistory>>,
    state: SharedState,
    mut outbound: mpsc::Receiver<Message>,
) {
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::warn!("Connection to {} failed: {}", url, e);
            state.connection.set(ConnectionState::Error {
                detail: format!("Connection failed: {}", e),
            });
            return;
        }
    };

    // The identity frame must go out before anything else; the server
    // routes every later frame by this id.
    let identity = match encode_message(MSG_STUDENT_CONNECTION, &student.connection(), &student.id)
    {
        Ok(text) => text,
        Err(e) => {
            state.connection.set(ConnectionState::Error {
                detail: format!("Failed to encode identity frame: {}", e),
            });
            return;
        }
    };
    if let Err(e) = ws.send(Message::Text(identity)).await {
        tracing::warn!("Identity frame to {} failed: {}", url, e);
        state.connection.set(ConnectionState::Error {
            detail: format!("Failed to announce identity: {}", e),
        });
        return;
    }

    state.connection.set(ConnectionState::Connected);
    tracing::info!("Connected to {}", url);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(message) => {
                    if let Err(e) = ws.send(message).await {
                        tracing::warn!("Send failed: {}", e);
                        state.connection.set(ConnectionState::Error {
                            detail: format!("Failed to send: {}", e),
                        });
                        break;
                    }
                }
                None => {
                    // Session handle dropped; close the socket politely.
                    let _ = ws.close(None).await;
                    break;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match dispatch_frame(&text, &student, &config, history.as_ref(), &state).await {
                        Flow::Continue => {}
                        Flow::SessionEnded => {
                            let _ = ws.close(None).await;
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    handle_remote_close(&state, frame);
                    break;
                }
                Some(Ok(_)) => {} // ping/pong/binary carry no protocol data
                Some(Err(e)) => {
                    tracing::warn!("Error receiving messages: {}", e);
                    if state.connection.get().is_connected() {
                        state.connection.set(ConnectionState::Error {
                            detail: format!("Error receiving messages: {}", e),
                        });
                    }
                    break;
                }
                None => {
                    handle_remote_close(&state, None);
                    break;
                }
            },
        }
    }
}

/// The server closed the transport underneath us.
fn handle_remote_close(state: &SharedState, frame: Option<CloseFrame<'_>>) {
    match frame {
        Some(frame) if !frame.reason.is_empty() => {
            tracing::info!("Server closed the connection: {}", frame.reason);
        }
        _ => tracing::info!("Server closed the connection"),
    }

    state.joystick.set(false);
    state.map.set(None);

    // SESSION_ENDED and receive errors set their own final state first.
    if state.connection.get().is_connected() {
        state.connection.set(ConnectionState::Disconnected {
            reason: "closed by peer".to_string(),
        });
    }
}

/// Applies one inbound frame to the session state.
async fn dispatch_frame(
    text: &str,
    student: &StudentInfo,
    config: &SessionConfig,
    history: Option<&Arc<VisitHistory>>,
    state: &SharedState,
) -> Flow {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            frame_error(state, format!("Dropped malformed frame: {}", e));
            return Flow::Continue;
        }
    };

    match envelope.kind.as_str() {
        MSG_QUIZ => {
            if !trusted(&config.instructor_senders, &envelope.sender) {
                untrusted(&envelope);
                return Flow::Continue;
            }
            match envelope.payload::<Quiz>() {
                Ok(quiz) => {
                    tracing::info!(
                        "Quiz received: {} ({} questions)",
                        quiz.title,
                        quiz.questions.len()
                    );
                    record_visit(history, student, &quiz.title).await;
                    state.answers.set(HashMap::new());
                    state.quiz.set(Some(quiz));
                }
                Err(e) => frame_error(state, e.to_string()),
            }
        }

        MSG_ANSWER_RECEIVED => {
            tracing::debug!("Server acknowledged an answer");
        }

        MSG_ANSWER_EVALUATED => match envelope.payload::<QuizAnswer>() {
            Ok(mut evaluated) => {
                if evaluated.student_id != student.id {
                    tracing::debug!(
                        "Ignoring evaluation addressed to student {}",
                        evaluated.student_id
                    );
                    return Flow::Continue;
                }
                if evaluated.is_correct.is_none() {
                    evaluated.is_correct = Some(false);
                }

                apply_evaluation(history, student, &evaluated).await;

                tracing::info!(
                    "Answer for question {} evaluated: correct = {}",
                    evaluated.question_id,
                    evaluated.is_correct.unwrap_or(false)
                );
                state.answers.update(|answers| {
                    answers.insert(evaluated.question_id.clone(), evaluated.clone());
                });
            }
            Err(e) => frame_error(state, e.to_string()),
        },

        MSG_SESSION_ENDED => {
            tracing::info!("Session ended by server: {}", envelope.content);
            state.quiz.set(None);
            state.joystick.set(false);
            state.map.set(None);

            let reason = if envelope.content.trim().is_empty() {
                "session ended by server".to_string()
            } else {
                envelope.content
            };
            state.connection.set(ConnectionState::Disconnected { reason });
            return Flow::SessionEnded;
        }

        MSG_ALLOW_JOYSTICK => {
            if trusted(&config.instructor_senders, &envelope.sender) {
                tracing::info!("Joystick control granted");
                state.joystick.set(true);
            } else {
                untrusted(&envelope);
            }
        }

        MSG_DISABLE_JOYSTICK => {
            if trusted(&config.instructor_senders, &envelope.sender) {
                tracing::info!("Joystick control revoked");
                state.joystick.set(false);
            } else {
                untrusted(&envelope);
            }
        }

        MSG_ROBOT_STATUS => {
            if !trusted(&config.telemetry_senders, &envelope.sender) {
                untrusted(&envelope);
                return Flow::Continue;
            }
            match envelope.payload::<RobotStatus>() {
                Ok(status) => state.robot.set(Some(status)),
                Err(e) => frame_error(state, e.to_string()),
            }
        }

        MSG_MAP_UPDATE => {
            if trusted(&config.telemetry_senders, &envelope.sender) {
                state.map.set(Some(envelope.content));
            } else {
                untrusted(&envelope);
            }
        }

        other => {
            tracing::debug!("Ignoring unknown message type: {}", other);
        }
    }

    Flow::Continue
}

/// Ensures today's visit record exists once a quiz is known.
async fn record_visit(history: Option<&Arc<VisitHistory>>, student: &StudentInfo, title: &str) {
    let Some(history) = history else {
        return;
    };

    let history = Arc::clone(history);
    let student = student.clone();
    let title = title.to_string();
    let result =
        tokio::task::spawn_blocking(move || history.ensure_visit_today(&student, Some(&title)))
            .await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Failed to record visit: {}", e),
        Err(e) => tracing::warn!("Visit task failed: {}", e),
    }
}

/// Writes an evaluation verdict into the persisted visit history.
async fn apply_evaluation(
    history: Option<&Arc<VisitHistory>>,
    student: &StudentInfo,
    evaluated: &QuizAnswer,
) {
    let Some(history) = history else {
        return;
    };

    let history = Arc::clone(history);
    let student_id = student.id.clone();
    let evaluated = evaluated.clone();
    let result =
        tokio::task::spawn_blocking(move || history.apply_evaluation(&student_id, &evaluated))
            .await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Failed to persist evaluation: {}", e),
        Err(e) => tracing::warn!("Evaluation task failed: {}", e),
    }
}

fn trusted(allowed: &[String], sender: &str) -> bool {
    allowed.iter().any(|s| s == sender)
}

fn untrusted(envelope: &Envelope) {
    tracing::warn!(
        "Ignoring {} from untrusted sender {}",
        envelope.kind,
        envelope.sender
    );
}

/// Reports a bad frame without touching the connection.
fn frame_error(state: &SharedState, detail: String) {
    tracing::warn!("{}", detail);
    state.error.set(Some(detail));
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("No active quiz")]
    NoActiveQuiz,

    #[error("Unknown question: {0}")]
    UnknownQuestion(String),

    #[error("Joystick control not enabled")]
    JoystickDisabled,

    #[error("Failed to encode message: {0}")]
    EncodeFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::student::SchoolFocus;

    fn sample_session() -> QuizSession {
        let student = StudentInfo {
            id: "s1".to_string(),
            name: "Ann".to_string(),
            city: "Milan".to_string(),
            school_focus: SchoolFocus::Robotica,
        };
        QuizSession::new(student, SessionConfig::default())
    }

    #[test]
    fn test_initial_state() {
        let session = sample_session();

        assert_eq!(
            session.connection_state(),
            ConnectionState::Disconnected {
                reason: "not yet connected".to_string()
            }
        );
        assert!(session.connection_state().can_connect());
        assert!(session.current_quiz().is_none());
        assert!(session.submitted_answers().is_empty());
        assert!(!session.joystick_enabled());
        assert!(session.robot_status().is_none());
        assert!(session.current_map().is_none());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_disconnect_is_safe_to_repeat() {
        let session = sample_session();

        session.disconnect("user left");
        session.disconnect("user left again");

        assert_eq!(
            session.connection_state(),
            ConnectionState::Disconnected {
                reason: "user left again".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_answer_rejected_while_disconnected() {
        let session = sample_session();

        let result = session.submit_answer("q1", "A").await;

        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_send_velocity_rejected_while_disconnected() {
        let session = sample_session();

        let result = session.send_velocity(0.5, 0.0).await;

        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert!(session.last_error().is_some());
    }

    #[test]
    fn test_connection_state_predicates() {
        let connected = ConnectionState::Connected;
        let error = ConnectionState::Error {
            detail: "boom".to_string(),
        };

        assert!(connected.is_connected());
        assert!(!connected.can_connect());
        assert!(!error.is_connected());
        assert!(error.can_connect());
    }

    #[test]
    fn test_connection_state_display() {
        let state = ConnectionState::Disconnected {
            reason: "closed by peer".to_string(),
        };
        assert_eq!(state.to_string(), "Disconnected: closed by peer");
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }

    #[test]
    fn test_trusted_sender_matching() {
        let allowed = vec!["professor".to_string()];

        assert!(trusted(&allowed, "professor"));
        assert!(!trusted(&allowed, "s1"));
        assert!(!trusted(&allowed, ""));
    }
}
