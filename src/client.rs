//! Client orchestration: binding collections, polling thread, lifecycle.
//!
//! [`SyncClient`] owns the connection to one registry daemon and two ordered
//! binding collections: scalar attributes, polled as a group by the client's
//! own thread, and signals, each of which runs its own acquisition thread.
//! Connect and disconnect fan out across the collections; teardown stops
//! the polling thread, then every signal thread, strictly before the
//! bindings are released.
//!
//! Error policy: nothing in here crashes a worker thread. Attribute-read
//! failures abort the current polling pass, latch the error and drop the
//! connected flag; the loop keeps running and the caller decides when to
//! reconnect. Signal failures stay inside the failing binding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::attribute::{AttributeBinding, NotificationRouter, Scalar, ScalarBinding, ScalarKey};
use crate::config::BridgeConfig;
use crate::error::{ErrorLatch, ErrorRecord, Result, SyncError};
use crate::registry::{NodeRef, Registry, RemoteHandle, RemotePath};
use crate::signal::binding::{lock_poisoned_ok, sleep_while_set, SignalBinding};

struct ClientShared {
    handle: RwLock<RemoteHandle>,
    attributes: RwLock<Vec<Arc<dyn AttributeBinding>>>,
    signals: RwLock<Vec<Arc<dyn SignalBinding>>>,
    router: NotificationRouter,
    connected: AtomicBool,
    running: AtomicBool,
    errors: ErrorLatch,
    poll_period_ms: u64,
    idle_period_ms: u64,
}

/// Synchronization client for one remote registry.
///
/// Bindings are registered up front, then [`SyncClient::connect`] brings the
/// whole set online. Connect and disconnect may be called repeatedly; they
/// must not be called concurrently with active signal acquisition (disable
/// the signals first).
pub struct SyncClient {
    shared: Arc<ClientShared>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Create a client for the registry behind `backend`, with the polling
    /// thread started (it idles until connected).
    pub fn new(backend: Arc<dyn Registry>, config: &BridgeConfig) -> Self {
        let shared = Arc::new(ClientShared {
            handle: RwLock::new(RemoteHandle::new(backend, config.address.clone())),
            attributes: RwLock::new(Vec::new()),
            signals: RwLock::new(Vec::new()),
            router: NotificationRouter::new(),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(true),
            errors: ErrorLatch::new(),
            poll_period_ms: config.attributes.period_ms,
            idle_period_ms: config.attributes.idle_period_ms,
        });

        let thread_shared = Arc::clone(&shared);
        let poll_thread = thread::spawn(move || run_polling(thread_shared));

        Self {
            shared,
            poll_thread: Mutex::new(Some(poll_thread)),
        }
    }

    /// Register a scalar binding; the returned key is its identity for
    /// reads, writes and notification.
    pub fn add_scalar<T: Scalar>(&self, binding: ScalarBinding<T>) -> ScalarKey<T> {
        let mut attributes = write_lock(&self.shared.attributes);
        attributes.push(Arc::new(binding));
        ScalarKey::new(attributes.len() - 1)
    }

    /// Register a signal binding. The client takes a shutdown-ordering
    /// share; callers keep their own typed handle for data access.
    pub fn add_signal(&self, binding: Arc<dyn SignalBinding>) {
        write_lock(&self.shared.signals).push(binding);
    }

    /// Install a change-notification callback for a scalar binding.
    ///
    /// Invoked synchronously from the polling thread whenever a read
    /// observes a new value.
    pub fn set_notifier<T: Scalar>(
        &self,
        key: ScalarKey<T>,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        self.shared.router.set(key, callback);
    }

    /// Connect the registry handle, then every signal binding in
    /// registration order.
    ///
    /// On any signal failure the client stays not-connected but nothing is
    /// rolled back; a retry reconnects everything. The polling loop starts
    /// reading attributes once this succeeds.
    pub fn connect(&self) -> Result<()> {
        self.shared.connected.store(false, Ordering::SeqCst);

        let mut handle = write_lock(&self.shared.handle);
        if let Err(err) = handle.connect() {
            self.shared.errors.record(&err);
            warn!(error = %err, "connection to registry failed");
            return Err(err);
        }

        let signals = read_lock(&self.shared.signals).clone();
        for signal in &signals {
            if let Err(err) = signal.connect(&handle) {
                self.shared.errors.record(&err);
                warn!(path = %signal.path(), error = %err, "connection to signal failed");
                return Err(err);
            }
        }

        self.shared.connected.store(true, Ordering::SeqCst);
        info!(address = handle.address(), "client connected");
        Ok(())
    }

    /// Stop attribute polling and tear down the registry handle.
    ///
    /// Signal bindings are left as they are; a binding that keeps acquiring
    /// against its established protocol client will disable itself when the
    /// remote side goes away.
    pub fn disconnect(&self) {
        // Clear the flag first so the polling thread stops touching the
        // handle before it is torn down.
        self.shared.connected.store(false, Ordering::SeqCst);
        write_lock(&self.shared.handle).disconnect();
        info!("client disconnected");
    }

    /// True after a fully successful [`Self::connect`].
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Current mirror value of a scalar binding.
    pub fn value<T: Scalar>(&self, key: ScalarKey<T>) -> Result<T> {
        let attributes = read_lock(&self.shared.attributes);
        let binding = attributes
            .get(key.index())
            .ok_or(SyncError::UnknownBinding(key.index()))?;
        binding
            .as_any()
            .downcast_ref::<ScalarBinding<T>>()
            .map(ScalarBinding::get)
            .ok_or(SyncError::UnknownBinding(key.index()))
    }

    /// Write a value through a scalar binding and mirror it.
    ///
    /// Failures are latched for the status surface and returned; the client
    /// keeps running either way.
    pub fn write<T: Scalar>(&self, key: ScalarKey<T>, value: &T) -> Result<()> {
        let result = (|| {
            let attributes = read_lock(&self.shared.attributes);
            let binding = attributes
                .get(key.index())
                .ok_or(SyncError::UnknownBinding(key.index()))?;
            let binding = binding
                .as_any()
                .downcast_ref::<ScalarBinding<T>>()
                .ok_or(SyncError::UnknownBinding(key.index()))?;
            let handle = read_lock(&self.shared.handle);
            binding.write(&handle, value)
        })();

        if let Err(err) = &result {
            warn!(error = %err, "attribute write failed");
            self.shared.errors.record(err);
        }
        result
    }

    /// Trigger a remote action node. Failures are logged and reported as
    /// `false`, never escalated.
    pub fn execute(&self, path: &str) -> bool {
        let handle = read_lock(&self.shared.handle);
        match handle.execute(&RemotePath::new(path)) {
            Ok(result) => result,
            Err(err) => {
                warn!(path, error = %err, "execute failed");
                false
            }
        }
    }

    /// Collect `path=value` lines for every readable leaf under `path`
    /// (`"*"`, `"dump"` or empty for the whole tree).
    ///
    /// Diagnostics helper: on any failure the report is a single error
    /// line, never a partial tree.
    pub fn dump(&self, path: &str) -> Vec<String> {
        let result = (|| -> Result<Vec<String>> {
            let handle = read_lock(&self.shared.handle);
            let root = handle.root()?;
            let node = match path {
                "" | "*" | "dump" => Arc::clone(root),
                other => root.node(&RemotePath::new(other))?,
            };
            let mut out = Vec::new();
            tree_walk(&node, &mut out)?;
            Ok(out)
        })();

        match result {
            Ok(lines) => lines,
            Err(err) => {
                warn!(path, error = %err, "registry dump failed");
                vec![err.to_string()]
            }
        }
    }

    /// Mirror values of all registered attributes as JSON, keyed by path
    /// (registration index for local-only bindings).
    pub fn attributes_json(&self) -> serde_json::Value {
        let attributes = read_lock(&self.shared.attributes);
        let map: serde_json::Map<String, serde_json::Value> = attributes
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                let key = if binding.path().is_empty() {
                    format!("<local:{index}>")
                } else {
                    binding.path().as_str().to_string()
                };
                (key, binding.value_json())
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// True while an unserviced failure is latched.
    pub fn has_error(&self) -> bool {
        self.shared.errors.is_set()
    }

    /// Last latched failure, if any.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.shared.errors.peek()
    }

    /// Drain the latched failure.
    pub fn take_error(&self) -> Option<ErrorRecord> {
        self.shared.errors.take()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        // Stop our own polling thread first, then every acquisition thread,
        // and only then let the binding collections go away.
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock_poisoned_ok(&self.poll_thread).take() {
            if handle.join().is_err() {
                warn!("attribute polling thread panicked");
            }
        }
        let signals = read_lock(&self.shared.signals).clone();
        for signal in &signals {
            signal.shutdown();
        }
        debug!("client dropped");
    }
}

/// Attribute polling thread body: read every binding on a fixed cadence
/// while connected, idle-poll otherwise. The first failing read aborts the
/// pass and flags the client disconnected; reconnection is the caller's
/// call.
fn run_polling(shared: Arc<ClientShared>) {
    debug!("attribute polling thread started");
    while shared.running.load(Ordering::SeqCst) {
        if shared.connected.load(Ordering::SeqCst) {
            let pass = {
                let handle = read_lock(&shared.handle);
                let attributes = read_lock(&shared.attributes).clone();
                let mut outcome = Ok(());
                for (index, attribute) in attributes.iter().enumerate() {
                    match attribute.read(&handle) {
                        Ok(true) => shared.router.notify(index),
                        Ok(false) => {}
                        Err(err) => {
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                outcome
            };
            if let Err(err) = pass {
                warn!(error = %err, "attribute update pass failed");
                shared.errors.record(&err);
                shared.connected.store(false, Ordering::SeqCst);
            }
            sleep_while_set(&shared.running, shared.poll_period_ms);
        } else {
            sleep_while_set(&shared.running, shared.idle_period_ms);
        }
    }
    debug!("attribute polling thread exited");
}

/// Depth-first `path=value` collection over a registry sub-tree.
fn tree_walk(node: &NodeRef, out: &mut Vec<String>) -> Result<()> {
    let mut line = node.rel_path();
    if node.value_kind().is_some() && node.is_readable() {
        line.push('=');
        line.push_str(&node.display_value());
    }
    out.push(line);
    for index in 0..node.child_count() {
        tree_walk(&node.child(index)?, out)?;
    }
    Ok(())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
