// crates/progress/src/lib.rs
//! In-process progress state and pub/sub for embedding jobs.
//!
//! The embedding pipeline calls [`ProgressBroadcaster::advance`] as it
//! processes chunks; the HTTP layer subscribes per book id and pushes each
//! snapshot to its connection. No I/O happens in this crate.

pub mod broadcaster;
pub mod store;

pub use broadcaster::ProgressBroadcaster;
pub use store::ProgressStore;
