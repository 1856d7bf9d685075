//! Connection entry storage and control operations.
//!
//! The persisted hierarchy of configured connections: a flat arena of
//! entries indexed by fixed id, typed state blobs, the
//! usable/incomplete/failed classification machine and the
//! refresh/start/stop/pause operations driving it.

mod blob;
mod entry;
mod ops;
#[allow(clippy::module_inception)]
mod store;

pub use blob::{ContainerState, HostState};
pub use entry::{Capabilities, ConnectionEntry, EntryCondition, FixedId, StoreDef};
pub use ops::{control, pause, refresh, start, stop, ControlAction};
pub use store::ConnectionStore;
