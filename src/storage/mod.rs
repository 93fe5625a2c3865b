//! On-disk snapshots of every index.

pub mod snapshot;
