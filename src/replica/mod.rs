//! Replica engines: sync rebuilds a missing or damaged replica from a
//! healthy peer (C10); transform reshapes a pool-set's part/replica
//! layout while preserving its data (C11).

pub mod sync;
pub mod transform;

pub use sync::{sync, SyncArgs, SyncFlags};
pub use transform::{transform, TransformArgs, TransformFlags};
