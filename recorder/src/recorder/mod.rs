pub mod keys;
pub mod state;
pub mod writer;

pub use state::RecordingStateMachine;
