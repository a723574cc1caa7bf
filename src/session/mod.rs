pub mod commands;
pub mod controller;
pub mod report;
pub mod state;

pub use controller::{SessionController, SessionError, TurnOffOutcome, TurnOnAccepted};
pub use report::{EndReason, PersistenceSink, SessionReport};
pub use state::{SessionPhase, SessionState, SessionStatus};
