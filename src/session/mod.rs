//! Session lifecycle: state machine and the streaming coordinator

pub mod coordinator;
pub mod machine;
pub mod state;
pub mod transport;

pub use coordinator::{validate_pin, ActiveSession, SessionCoordinator};
pub use machine::{ActionRequest, SessionConfig, SessionMachine, Transition};
pub use state::{next_state, SessionEvent, SessionState};
pub use transport::{MediaSink, Registrar, SessionHandle, SessionInitError, SessionInitiator};
