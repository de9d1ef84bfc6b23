//! Remote authority — the sync endpoint and its backing store.

mod routes;
mod store;

pub use routes::{SyncRouteState, sync_routes};
pub use store::{PullPayload, RemoteStore};
