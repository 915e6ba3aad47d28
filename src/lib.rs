//! ClassLink - Classroom Quiz and Robot Tele-op Client
//!
//! Client-side engine for classroom orientation sessions: discovers the
//! classroom server on the local network, keeps a live WebSocket session for
//! quizzes and robot tele-operation, exposes everything as observable state
//! for a UI layer, and records each student's visits and answers on disk.

pub mod networking;
pub mod state;
pub mod storage;
pub mod student;

// Re-export commonly used types
pub use networking::discovery::ServerScanner;
pub use networking::protocol::{Quiz, QuizAnswer};
pub use networking::session::{ConnectionState, QuizSession, SessionConfig};
pub use state::StateCell;
pub use storage::{DirectoryStore, VisitHistory};
pub use student::{SchoolFocus, StudentInfo};
