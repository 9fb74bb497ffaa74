//! Server-side game state
//!
//! - `ParticipantStore`: the authoritative participant map, mutated through a
//!   single async writer gate
//! - `ActionTracker`: in-flight action bookkeeping with strict deadline expiry
//! - `BlockCursor`: latest known chain height

pub mod cursor;
pub mod store;
pub mod tracker;

pub use cursor::BlockCursor;
pub use store::{ParticipantStore, StoreWriter};
pub use tracker::ActionTracker;
