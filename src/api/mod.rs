//! Local API daemon.
//!
//! A small HTTP surface for external tooling: list and control entries,
//! and the launch exchange. The daemon binds to loopback by default;
//! transport-level concerns like authentication belong to the caller's
//! environment, not this layer.

mod handlers;
mod router;
mod types;

pub use handlers::AppState;
pub use router::{create_router, serve};
pub use types::{EntrySummary, ErrorResponse, ListEntriesResponse, RefreshRequest};
