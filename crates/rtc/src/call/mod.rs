//! 1:1 calls

pub mod session;
pub mod state;

pub use session::CallSession;
pub use state::{CallNotice, CallState, CallStatus};
