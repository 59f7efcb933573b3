//! Scalar attribute bindings and change notification.
//!
//! A [`ScalarBinding`] pairs one registry path with a typed local mirror and
//! a reader/writer function pair. The default pair does a direct typed
//! get/set; custom pairs (unit conversion, bit extraction, multi-path
//! composition, clamping) live in [`convert`] or with the caller. Bindings
//! are registered with `SyncClient`, which hands back a typed
//! [`ScalarKey`] used for all later access: the key, not the mirror's
//! address, is the binding's identity.

pub mod convert;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::trace;

use crate::error::Result;
use crate::registry::{FromValue, IntoValue, RemoteHandle, RemotePath};
use crate::signal::binding::lock_poisoned_ok;

/// Marker for types that can live in a scalar mirror.
pub trait Scalar: Clone + Default + PartialEq + Debug + Serialize + Send + Sync + 'static {}

impl<T> Scalar for T where T: Clone + Default + PartialEq + Debug + Serialize + Send + Sync + 'static
{}

/// Reader function: fetch the remote value in its local representation.
///
/// Must return a stable, comparable representation; the equality check
/// against the mirror is the sole notification de-duplication mechanism.
pub type ScalarReader<T> = Arc<dyn Fn(&RemoteHandle, &RemotePath) -> Result<T> + Send + Sync>;

/// Writer function: push a local value to the remote store.
pub type ScalarWriter<T> = Arc<dyn Fn(&RemoteHandle, &RemotePath, &T) -> Result<()> + Send + Sync>;

/// Direct typed get.
pub fn default_reader<T>() -> ScalarReader<T>
where
    T: Scalar + FromValue,
{
    Arc::new(|handle, path| handle.get(path))
}

/// Direct typed set.
pub fn default_writer<T>() -> ScalarWriter<T>
where
    T: Scalar + IntoValue,
{
    Arc::new(|handle, path, value| handle.set(path, value.clone()))
}

/// Typed handle to a registered scalar binding.
///
/// Issued by `SyncClient` at registration; carries the element type so
/// read/write access stays statically typed.
pub struct ScalarKey<T: Scalar> {
    index: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T: Scalar> ScalarKey<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            _ty: PhantomData,
        }
    }

    /// Position of the binding in the client's registration order.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T: Scalar> Clone for ScalarKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Scalar> Copy for ScalarKey<T> {}

impl<T: Scalar> Debug for ScalarKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScalarKey({})", self.index)
    }
}

/// Object-safe face of a typed scalar binding, for the client's ordered
/// collection.
pub trait AttributeBinding: Send + Sync {
    /// Registry path backing this binding (may be empty).
    fn path(&self) -> &RemotePath;

    /// Poll the remote value; returns `true` when the mirror changed.
    fn read(&self, handle: &RemoteHandle) -> Result<bool>;

    /// Mirror value as JSON, for diagnostics.
    fn value_json(&self) -> serde_json::Value;

    /// Downcast support for typed access by key.
    fn as_any(&self) -> &dyn Any;
}

/// One registry path mirrored into a typed local value.
///
/// A binding with an empty path has no backing store: `read` and `write`
/// are no-ops and the mirror only changes through [`Self::seed`].
pub struct ScalarBinding<T: Scalar> {
    path: RemotePath,
    value: Mutex<T>,
    reader: ScalarReader<T>,
    writer: ScalarWriter<T>,
}

impl<T: Scalar> ScalarBinding<T> {
    /// Binding with the default direct get/set access.
    pub fn new(path: impl Into<RemotePath>) -> Self
    where
        T: FromValue + IntoValue,
    {
        Self::with_access(path, default_reader::<T>(), default_writer::<T>())
    }

    /// Binding with a custom reader/writer pair.
    pub fn with_access(
        path: impl Into<RemotePath>,
        reader: ScalarReader<T>,
        writer: ScalarWriter<T>,
    ) -> Self {
        Self {
            path: path.into(),
            value: Mutex::new(T::default()),
            reader,
            writer,
        }
    }

    /// Local-only binding: no backing store, mirror only.
    pub fn local() -> Self {
        Self {
            path: RemotePath::empty(),
            value: Mutex::new(T::default()),
            reader: Arc::new(|_, path| Err(crate::error::SyncError::absent(path.as_str()))),
            writer: Arc::new(|_, _, _| Ok(())),
        }
    }

    /// Pre-load the mirror without touching the remote store.
    pub fn seed(self, value: T) -> Self {
        *lock_poisoned_ok(&self.value) = value;
        self
    }

    /// Current mirror value.
    pub fn get(&self) -> T {
        lock_poisoned_ok(&self.value).clone()
    }

    /// Poll the remote value into the mirror.
    ///
    /// Invokes the reader, compares with the mirror and stores on change.
    /// The comparison is the only de-duplication: a `true` return is what
    /// triggers downstream notification, so two reads with an unchanged
    /// remote value report a change exactly once.
    pub fn read(&self, handle: &RemoteHandle) -> Result<bool> {
        if self.path.is_empty() {
            return Ok(false);
        }
        let candidate = (self.reader)(handle, &self.path)?;
        let mut value = lock_poisoned_ok(&self.value);
        if *value != candidate {
            trace!(path = %self.path, new = ?candidate, "attribute changed");
            *value = candidate;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Push a value to the remote store and mirror it unconditionally.
    pub fn write(&self, handle: &RemoteHandle, value: &T) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        (self.writer)(handle, &self.path, value)?;
        *lock_poisoned_ok(&self.value) = value.clone();
        Ok(())
    }
}

impl<T: Scalar> AttributeBinding for ScalarBinding<T> {
    fn path(&self) -> &RemotePath {
        &self.path
    }

    fn read(&self, handle: &RemoteHandle) -> Result<bool> {
        ScalarBinding::read(self, handle)
    }

    fn value_json(&self) -> serde_json::Value {
        serde_json::to_value(self.get()).unwrap_or(serde_json::Value::Null)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Change-notification dispatch: binding key to callback.
///
/// Callbacks run synchronously on the polling thread; receivers must defer
/// any heavy work.
#[derive(Default)]
pub struct NotificationRouter {
    map: Mutex<HashMap<usize, Box<dyn Fn() + Send + Sync>>>,
}

impl NotificationRouter {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the callback for a binding, replacing any previous one.
    pub fn set<T: Scalar>(&self, key: ScalarKey<T>, callback: impl Fn() + Send + Sync + 'static) {
        lock_poisoned_ok(&self.map).insert(key.index(), Box::new(callback));
    }

    pub(crate) fn notify(&self, index: usize) {
        let map = lock_poisoned_ok(&self.map);
        if let Some(callback) = map.get(&index) {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_binding_reads_and_writes_are_noops() {
        let binding = ScalarBinding::<i64>::local().seed(42);
        assert_eq!(binding.get(), 42);
        assert!(binding.path().is_empty());
        assert_eq!(binding.value_json(), serde_json::json!(42));
    }

    #[test]
    fn keys_are_copyable_and_typed() {
        let key: ScalarKey<f64> = ScalarKey::new(3);
        let copy = key;
        assert_eq!(copy.index(), 3);
        assert_eq!(format!("{:?}", key), "ScalarKey(3)");
    }

    #[test]
    fn router_dispatches_by_index() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let router = NotificationRouter::new();
        let key: ScalarKey<bool> = ScalarKey::new(0);

        let counter = hits.clone();
        router.set(key, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        router.notify(0);
        router.notify(1); // no callback registered
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
