//! Push/pull synchronization against the remote authority.

mod client;
pub mod normalize;
pub mod protocol;

pub use client::{SyncClient, SyncHandle, SyncOutcome, SyncSignal, signal_channel};
