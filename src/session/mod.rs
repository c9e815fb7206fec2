pub mod capturer;
pub mod chunk_writer;
pub mod frame;
pub mod mixer;
pub mod orchestrator;
pub mod state;
pub mod summary;
pub mod synchronizer;

pub use frame::Frame;
pub use orchestrator::{SessionHandle, SessionOrchestrator};
pub use state::{ChannelConfig, ChannelRole, SessionConfig, SessionPhase};
pub use summary::{ChannelSummary, CombinedOutcome, SessionStatus, SessionSummary};
