//! Create-or-update reconciliation for Kubernetes objects.
//!
//! The entry points in [`reconcile`] take the desired state of an object and
//! converge what the cluster stores toward it: look the object up by name,
//! create it verbatim when it does not exist, otherwise rewrite only the
//! fields the reconciler owns for that kind and issue a single update.
//! When nothing drifted, nothing is written, so calls are safe to repeat
//! from a controller loop.
//!
//! Stores sit behind the [`ObjectStore`] trait: [`KubeStore`] talks to the
//! API server, [`testing::FakeStore`] backs tests. Further kinds plug in by
//! implementing [`OwnedFields`] and calling [`reconcile::ensure`] directly.

pub mod reconcile;
pub mod store;
pub mod testing;

pub use reconcile::{ensure, Automount, Error, OwnedFields};
pub use store::{KubeStore, ObjectKey, ObjectStore, StoreError};
