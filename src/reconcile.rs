//! The converge-or-noop procedure and the per-kind owned-field strategies.

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
use kube::Resource;
use thiserror::Error;
use tracing::info;

use crate::store::{ObjectKey, ObjectStore, StoreError};

/// Failure of a single reconcile call. Every variant names the operation
/// that failed and the kind it failed on; the store failure is the source.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing .metadata.name on desired {kind}")]
    MissingName { kind: &'static str },
    #[error("getting {kind}: {source}")]
    Lookup {
        kind: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("creating {kind}: {source}")]
    Create {
        kind: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("updating {kind}: {source}")]
    Update {
        kind: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Per-kind reconciliation strategy: which fields the reconciler owns and
/// how drift in them is corrected.
///
/// `apply_owned` compares every owned field of `desired` against `actual`
/// and overwrites the ones that differ, reporting whether anything changed.
/// Fields outside the owned set must be left alone; [`ensure`] sends
/// `actual` back to the store as the update payload, so everything else on
/// it (labels, resource version, fields other controllers manage) rides
/// along unchanged.
pub trait OwnedFields: Sized {
    /// Kind name used in errors and log lines.
    const KIND: &'static str;

    /// Folds desired's owned fields into `actual`. True if anything was
    /// rewritten.
    fn apply_owned(desired: &Self, actual: &mut Self) -> bool;
}

/// The three states of an optional boolean field such as
/// `automount_service_account_token`: absence is meaningful (defer to pod
/// or cluster defaults) and distinct from an explicit `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Automount {
    Unset,
    Disabled,
    Enabled,
}

impl Automount {
    /// The wire form of this state.
    pub fn as_field(self) -> Option<bool> {
        match self {
            Automount::Unset => None,
            Automount::Disabled => Some(false),
            Automount::Enabled => Some(true),
        }
    }
}

impl From<Option<bool>> for Automount {
    fn from(field: Option<bool>) -> Self {
        match field {
            None => Automount::Unset,
            Some(false) => Automount::Disabled,
            Some(true) => Automount::Enabled,
        }
    }
}

/// Decides what to write for a tri-state flag. `None` leaves the actual
/// value alone; `Some(v)` overwrites with `v`, which may clear the field.
fn tri_state_correction(desired: Option<bool>, actual: Option<bool>) -> Option<Option<bool>> {
    match (Automount::from(desired), Automount::from(actual)) {
        (Automount::Unset, Automount::Unset) => None,
        (Automount::Unset, _) => Some(None),
        (want, have) if want == have => None,
        (want, _) => Some(want.as_field()),
    }
}

impl OwnedFields for Namespace {
    const KIND: &'static str = "Namespace";

    // Existence only. A found namespace is never rewritten.
    fn apply_owned(_desired: &Self, _actual: &mut Self) -> bool {
        false
    }
}

impl OwnedFields for ServiceAccount {
    const KIND: &'static str = "ServiceAccount";

    fn apply_owned(desired: &Self, actual: &mut Self) -> bool {
        let mut changed = false;
        if desired.secrets != actual.secrets {
            actual.secrets = desired.secrets.clone();
            changed = true;
        }
        if desired.image_pull_secrets != actual.image_pull_secrets {
            actual.image_pull_secrets = desired.image_pull_secrets.clone();
            changed = true;
        }
        if let Some(value) = tri_state_correction(
            desired.automount_service_account_token,
            actual.automount_service_account_token,
        ) {
            actual.automount_service_account_token = value;
            changed = true;
        }
        changed
    }
}

impl OwnedFields for ConfigMap {
    const KIND: &'static str = "ConfigMap";

    fn apply_owned(desired: &Self, actual: &mut Self) -> bool {
        let mut changed = false;
        if desired.data != actual.data {
            actual.data = desired.data.clone();
            changed = true;
        }
        if desired.binary_data != actual.binary_data {
            actual.binary_data = desired.binary_data.clone();
            changed = true;
        }
        if desired.immutable != actual.immutable {
            actual.immutable = desired.immutable;
            changed = true;
        }
        changed
    }
}

/// Converges the stored object under `desired`'s key onto desired's owned
/// fields.
///
/// Looks the object up by name and namespace, creates it verbatim when
/// absent, otherwise rewrites only the owned fields that drifted and issues
/// a single update. When nothing drifted the fetched object comes back
/// untouched and no write goes out. Errors abort the call; there is no
/// retry here, conflicts included, so a looping caller decides when to try
/// again.
pub async fn ensure<K, S>(store: &S, desired: &K) -> Result<K, Error>
where
    K: OwnedFields + Resource + Clone,
    S: ObjectStore<K> + ?Sized,
{
    let key = ObjectKey::from_meta(desired.meta())
        .ok_or(Error::MissingName { kind: K::KIND })?;

    let fetched = store.fetch(&key).await.map_err(|source| Error::Lookup {
        kind: K::KIND,
        source,
    })?;

    let actual = match fetched {
        Some(actual) => actual,
        None => {
            info!("Create {}: {}", K::KIND, key);
            store.create(desired).await.map_err(|source| Error::Create {
                kind: K::KIND,
                source,
            })?;
            return Ok(desired.clone());
        }
    };

    let mut updated = actual.clone();
    if !K::apply_owned(desired, &mut updated) {
        return Ok(actual);
    }

    info!("Update {}: {}", K::KIND, key);
    store.update(&updated).await.map_err(|source| Error::Update {
        kind: K::KIND,
        source,
    })?;
    Ok(updated)
}

/// Ensures the namespace exists. A found namespace is returned as-is and
/// never updated.
pub async fn namespace<S>(store: &S, desired: &Namespace) -> Result<Namespace, Error>
where
    S: ObjectStore<Namespace> + ?Sized,
{
    ensure(store, desired).await
}

/// Converges a service account's secret list, image pull secret list and
/// automount flag.
pub async fn service_account<S>(
    store: &S,
    desired: &ServiceAccount,
) -> Result<ServiceAccount, Error>
where
    S: ObjectStore<ServiceAccount> + ?Sized,
{
    ensure(store, desired).await
}

/// Converges a config map's data, binary data and immutable flag.
pub async fn config_map<S>(store: &S, desired: &ConfigMap) -> Result<ConfigMap, Error>
where
    S: ObjectStore<ConfigMap> + ?Sized,
{
    ensure(store, desired).await
}
