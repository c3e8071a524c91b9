//! Multi-party rooms over a full mesh

pub mod session;
pub mod state;

pub use session::RoomSession;
pub use state::{Participant, RoomNotice, RoomState, RoomStatus, ViewMode};
