pub mod manager;
pub mod sse;
pub mod stabilizer;

pub use manager::{FeedClient, FeedClientConfig, FeedHandler, NoopHandler, RawState};
pub use sse::SseDecoder;
pub use stabilizer::{StabilizerConfig, StableState, StateStabilizer};
