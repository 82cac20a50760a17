//! Game simulation modules

pub mod combat;
pub mod geometry;
pub mod r#match;
pub mod physics;
pub mod player;
pub mod shots;
pub mod sink;
pub mod snapshot;

pub use r#match::{MatchHandle, MatchId, MatchRegistry};
pub use player::SessionId;
pub use sink::{Sink, SINK_CAPACITY};
