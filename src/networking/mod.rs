//! Networking module for the classroom connection
//!
//! Provides LAN server discovery, the wire protocol codec, and the live
//! quiz/tele-op session.

pub mod discovery;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use discovery::{ScanConfig, ScanError, ScanStatus, ServerScanner};
pub use protocol::{Envelope, ProtocolError, Quiz, QuizAnswer, Question, RobotStatus};
pub use session::{ConnectionState, QuizSession, SessionConfig, SessionError};

/// Port the classroom server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Request path of the WebSocket endpoint.
pub const DEFAULT_CONNECT_PATH: &str = "/connect";
