//! Local object registry: the entries this node currently hosts.

mod catalog;
mod entry;

pub use catalog::LocalObjects;
pub use entry::{EntryState, LocalEntry};
