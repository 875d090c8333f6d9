//! WebSocket voice endpoint: connection handling, control frames, session
//! state, and the per-turn pipeline.

pub mod handler;
pub mod messages;
pub mod session;
pub mod turn;

pub use handler::ws_audio_handler;
pub use messages::{ErrorCode, IncomingMessage, MessageRoute, OutgoingMessage};
pub use session::{ConnectionStats, Session, SessionShared, TurnHandle};
pub use turn::{TurnInput, TurnOutcome};
