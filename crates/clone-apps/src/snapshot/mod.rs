pub mod builder;
pub mod store;

pub use builder::SnapshotBuilder;
pub use store::SnapshotStore;
