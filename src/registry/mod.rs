//! Consumed registry collaborator interface and the connection handle.
//!
//! The bridge does not implement the registry transport. It consumes two
//! traits, [`Registry`] for establishing a connection to one daemon and
//! [`RegistryNode`] for path-addressed access to the tree behind it, and
//! wraps them in [`RemoteHandle`], the object every binding reads and writes
//! through. Production backends implement the traits over the real wire
//! protocol; [`crate::sim`] implements them in-process.

pub mod path;
pub mod value;

pub use path::RemotePath;
pub use value::{FromValue, IntoValue, Value, ValueKind};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Shared reference to a node in a connected registry tree.
pub type NodeRef = Arc<dyn RegistryNode>;

/// Connection factory for one registry daemon.
///
/// `connect` returns the root node of the tree; `disconnect` tears down any
/// daemon-side state for the address. Implementations must tolerate
/// `disconnect` for an address that is not connected.
pub trait Registry: Send + Sync {
    /// Establish a connection and return the tree root.
    fn connect(&self, address: &str) -> Result<NodeRef>;

    /// Tear down the daemon-side connection state for `address`.
    fn disconnect(&self, address: &str) -> Result<()>;
}

/// One node of a connected registry tree.
///
/// Leaves hold a typed [`Value`] or an executable action; interior nodes
/// hold children. All accessors may fail with a node error if the remote
/// side rejects the access.
pub trait RegistryNode: Send + Sync {
    /// Resolve a descendant by path.
    fn node(&self, path: &RemotePath) -> Result<NodeRef>;

    /// Read the leaf value.
    fn get(&self) -> Result<Value>;

    /// Write the leaf value.
    fn set(&self, value: Value) -> Result<()>;

    /// Trigger the action behind this node.
    fn execute(&self) -> Result<bool>;

    /// Path of this node relative to the tree root.
    fn rel_path(&self) -> String;

    /// Kind of the stored value, `None` for interior/action nodes.
    fn value_kind(&self) -> Option<ValueKind>;

    /// Whether the value can be read.
    fn is_readable(&self) -> bool;

    /// Number of direct children.
    fn child_count(&self) -> usize;

    /// Direct child by index.
    fn child(&self, index: usize) -> Result<NodeRef>;

    /// Rendering of the stored value for diagnostics.
    fn display_value(&self) -> String {
        self.get().map(|v| v.to_string()).unwrap_or_default()
    }
}

/// Connection to one remote registry root.
///
/// Owns the backend and the address; the root node is present only while
/// connected. The handle is replaced wholesale by `SyncClient` on each
/// connect/disconnect and treated as read-only by bindings in between.
pub struct RemoteHandle {
    registry: Arc<dyn Registry>,
    address: String,
    root: Option<NodeRef>,
}

impl RemoteHandle {
    /// New handle in the disconnected state.
    pub fn new(registry: Arc<dyn Registry>, address: impl Into<String>) -> Self {
        Self {
            registry,
            address: address.into(),
            root: None,
        }
    }

    /// Address this handle connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// True while a root node is held.
    pub fn is_connected(&self) -> bool {
        self.root.is_some()
    }

    /// Establish the connection, tearing down any previous one first.
    ///
    /// A prior root is destroyed and the address disconnected before
    /// reconnecting, forcing a clean daemon-side teardown. Teardown failures
    /// are logged and otherwise ignored; only the final connect failure is
    /// reported, leaving the handle disconnected.
    pub fn connect(&mut self) -> Result<()> {
        if self.root.take().is_some() {
            debug!(address = %self.address, "dropping stale registry root");
        }
        if let Err(err) = self.registry.disconnect(&self.address) {
            warn!(address = %self.address, error = %err, "disconnect before reconnect failed");
        }
        match self.registry.connect(&self.address) {
            Ok(root) => {
                self.root = Some(root);
                debug!(address = %self.address, "registry connected");
                Ok(())
            }
            Err(err) => {
                warn!(address = %self.address, error = %err, "registry connect failed");
                Err(err)
            }
        }
    }

    /// Drop the root and tear down the daemon-side connection.
    pub fn disconnect(&mut self) {
        self.root = None;
        if let Err(err) = self.registry.disconnect(&self.address) {
            warn!(address = %self.address, error = %err, "registry disconnect failed");
        }
    }

    /// Root node of the connected tree.
    pub fn root(&self) -> Result<&NodeRef> {
        self.root.as_ref().ok_or(SyncError::NotConnected)
    }

    /// Resolve a node by path from the root.
    pub fn node(&self, path: &RemotePath) -> Result<NodeRef> {
        self.root()?.node(path)
    }

    /// Typed read of a leaf value.
    pub fn get<T: FromValue>(&self, path: &RemotePath) -> Result<T> {
        let value = self.node(path)?.get()?;
        T::from_value(&value, path)
    }

    /// Typed write of a leaf value.
    pub fn set<T: IntoValue>(&self, path: &RemotePath, value: T) -> Result<()> {
        self.node(path)?.set(value.into_value())
    }

    /// Trigger a remote action.
    pub fn execute(&self, path: &RemotePath) -> Result<bool> {
        self.node(path)?
            .execute()
            .map_err(|err| SyncError::Execute {
                path: path.as_str().to_string(),
                reason: err.to_string(),
            })
    }
}
