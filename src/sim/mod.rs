//! In-process simulated registry backend.
//!
//! Stands in for the device daemons during development and in tests: an
//! in-memory registry tree with typed leaves and executable action nodes,
//! plus stream and data-on-demand signal sources generating synthetic
//! blocks. Failure injection (offline registry, open/read failures) and
//! call counters make the error-recovery and back-pressure paths testable
//! without hardware.
//!
//! The block generator is deterministic: component `i`, row `j` carries
//! `amplitude * (i + 1) + j` (plus the on-demand sample delay when one is
//! set), so tests can assert exact column contents. Optional noise can be
//! mixed in for soak-style runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::registry::{NodeRef, Registry, RegistryNode, RemotePath, Value, ValueKind};
use crate::signal::{
    AccessKind, OnDemandClient, OnDemandMode, Sample, SampleBlock, SignalHub, SignalMeta,
    SignalSource, StreamClient,
};

/// How long a simulated trigger takes to arrive, for blocking on-demand
/// modes.
const TRIGGER_WAIT_MS: u64 = 20;

enum SimEntry {
    Leaf(Mutex<Value>),
    Action {
        result: bool,
        count: AtomicUsize,
    },
    Signal(Arc<SimSignalState>),
}

struct SimSignalState {
    name: String,
    kind: AccessKind,
    columns: usize,
    amplitude: Mutex<f64>,
    noise: Mutex<f64>,
    stream_interval_ms: AtomicU64,
    fail_open: AtomicBool,
    fail_read: AtomicBool,
    open_count: AtomicUsize,
    read_count: AtomicUsize,
    sequence: AtomicU64,
}

impl SimSignalState {
    fn new(name: String, kind: AccessKind, columns: usize) -> Self {
        Self {
            name,
            kind,
            columns,
            amplitude: Mutex::new(10_000.0),
            noise: Mutex::new(0.0),
            stream_interval_ms: AtomicU64::new(10),
            fail_open: AtomicBool::new(false),
            fail_read: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            read_count: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    fn fill<T: Sample>(&self, block: &mut SampleBlock<T>, sample_offset: i64) {
        let amplitude = *lock(&self.amplitude);
        let noise = *lock(&self.noise);
        let mut rng = rand::thread_rng();
        for row in 0..block.rows() {
            for col in 0..block.columns() {
                let mut value =
                    amplitude * (col as f64 + 1.0) + row as f64 + sample_offset as f64;
                if noise > 0.0 {
                    value += rng.gen_range(-noise..noise);
                }
                block.row_mut(row)[col] = T::from_f64(value);
            }
        }
    }
}

#[derive(Default)]
struct SimState {
    entries: RwLock<BTreeMap<String, SimEntry>>,
    offline: AtomicBool,
    connect_count: AtomicUsize,
    disconnect_count: AtomicUsize,
}

/// Simulated registry daemon plus signal hub.
///
/// Implements [`Registry`] and, for every supported element type,
/// [`SignalHub`]; hand the same backend to `RemoteHandle` construction and
/// to the signal bindings.
#[derive(Clone, Default)]
pub struct SimBackend {
    state: Arc<SimState>,
}

impl SimBackend {
    /// Empty simulated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a value leaf. This is the "remote side changed"
    /// hook for tests, so unlike [`RegistryNode::set`] it may change the
    /// stored kind.
    pub fn set_value(&self, path: &str, value: Value) {
        let key = normalize(path);
        let mut entries = write(&self.state.entries);
        match entries.get(&key) {
            Some(SimEntry::Leaf(slot)) => *lock(slot) = value,
            _ => {
                entries.insert(key, SimEntry::Leaf(Mutex::new(value)));
            }
        }
    }

    /// Current value of a leaf, if present.
    pub fn value(&self, path: &str) -> Option<Value> {
        let entries = read(&self.state.entries);
        match entries.get(&normalize(path)) {
            Some(SimEntry::Leaf(slot)) => Some(lock(slot).clone()),
            _ => None,
        }
    }

    /// Create an executable action node with a fixed result.
    pub fn add_action(&self, path: &str, result: bool) {
        write(&self.state.entries).insert(
            normalize(path),
            SimEntry::Action {
                result,
                count: AtomicUsize::new(0),
            },
        );
    }

    /// Number of times an action node has been executed.
    pub fn execute_count(&self, path: &str) -> usize {
        match read(&self.state.entries).get(&normalize(path)) {
            Some(SimEntry::Action { count, .. }) => count.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    /// Register a streaming signal with `columns` components.
    pub fn add_stream_signal(&self, path: &str, columns: usize) {
        let key = normalize(path);
        let state = SimSignalState::new(key.clone(), AccessKind::Stream, columns);
        write(&self.state.entries).insert(key, SimEntry::Signal(Arc::new(state)));
    }

    /// Register a data-on-demand signal with `columns` components.
    pub fn add_dod_signal(&self, path: &str, columns: usize) {
        let key = normalize(path);
        let state = SimSignalState::new(key.clone(), AccessKind::DataOnDemand, columns);
        write(&self.state.entries).insert(key, SimEntry::Signal(Arc::new(state)));
    }

    /// Make the registry refuse connections.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Connections served so far.
    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    /// Disconnects requested so far.
    pub fn disconnect_count(&self) -> usize {
        self.state.disconnect_count.load(Ordering::SeqCst)
    }

    /// Make every open of a signal fail.
    pub fn fail_signal_opens(&self, path: &str, fail: bool) {
        if let Some(signal) = self.signal_state(path) {
            signal.fail_open.store(fail, Ordering::SeqCst);
        }
    }

    /// Make every read of a signal fail.
    pub fn fail_signal_reads(&self, path: &str, fail: bool) {
        if let Some(signal) = self.signal_state(path) {
            signal.fail_read.store(fail, Ordering::SeqCst);
        }
    }

    /// Opens issued against a signal.
    pub fn signal_open_count(&self, path: &str) -> usize {
        self.signal_state(path)
            .map(|s| s.open_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Reads served by a signal.
    pub fn signal_read_count(&self, path: &str) -> usize {
        self.signal_state(path)
            .map(|s| s.read_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Base level of the generated blocks.
    pub fn set_signal_amplitude(&self, path: &str, amplitude: f64) {
        if let Some(signal) = self.signal_state(path) {
            *lock(&signal.amplitude) = amplitude;
        }
    }

    /// Peak noise mixed into generated blocks (zero for deterministic
    /// output).
    pub fn set_signal_noise(&self, path: &str, noise: f64) {
        if let Some(signal) = self.signal_state(path) {
            *lock(&signal.noise) = noise;
        }
    }

    /// Pacing of the simulated stream, in milliseconds per block.
    pub fn set_stream_interval_ms(&self, path: &str, interval: u64) {
        if let Some(signal) = self.signal_state(path) {
            signal.stream_interval_ms.store(interval, Ordering::SeqCst);
        }
    }

    fn signal_state(&self, path: &str) -> Option<Arc<SimSignalState>> {
        match read(&self.state.entries).get(&normalize(path)) {
            Some(SimEntry::Signal(state)) => Some(Arc::clone(state)),
            _ => None,
        }
    }
}

impl Registry for SimBackend {
    fn connect(&self, address: &str) -> Result<NodeRef> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Connection(format!(
                "simulated registry offline at {address}"
            )));
        }
        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        debug!(address, "sim registry connected");
        Ok(Arc::new(SimNode {
            state: Arc::clone(&self.state),
            path: String::new(),
        }))
    }

    fn disconnect(&self, address: &str) -> Result<()> {
        self.state.disconnect_count.fetch_add(1, Ordering::SeqCst);
        debug!(address, "sim registry disconnected");
        Ok(())
    }
}

impl<T: Sample> SignalHub<T> for SimBackend {
    fn create(&self, node: &NodeRef) -> Result<Arc<dyn SignalSource<T>>> {
        let path = node.rel_path();
        match self.signal_state(&path) {
            Some(state) => Ok(Arc::new(SimSignalSource::<T> {
                state,
                _ty: std::marker::PhantomData,
            })),
            None => Err(SyncError::UnsupportedMode(path)),
        }
    }
}

struct SimNode {
    state: Arc<SimState>,
    path: String,
}

impl SimNode {
    fn child_names(&self) -> Vec<String> {
        let prefix = if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.path)
        };
        let entries = read(&self.state.entries);
        let mut names: Vec<String> = Vec::new();
        for key in entries.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let name = rest.split('/').next().unwrap_or(rest).to_string();
            if names.last() != Some(&name) {
                names.push(name);
            }
        }
        names
    }

    fn with_entry<R>(&self, f: impl FnOnce(&SimEntry) -> Result<R>) -> Result<R> {
        let entries = read(&self.state.entries);
        match entries.get(&self.path) {
            Some(entry) => f(entry),
            None => Err(SyncError::absent(self.path.clone())),
        }
    }
}

impl RegistryNode for SimNode {
    fn node(&self, path: &RemotePath) -> Result<NodeRef> {
        let mut target = self.path.clone();
        for segment in path.segments() {
            if target.is_empty() {
                target.push_str(segment);
            } else {
                target.push('/');
                target.push_str(segment);
            }
        }
        let entries = read(&self.state.entries);
        let exists = target.is_empty()
            || entries.contains_key(&target)
            || entries
                .keys()
                .any(|key| key.starts_with(&format!("{target}/")));
        if !exists {
            return Err(SyncError::absent(target));
        }
        drop(entries);
        Ok(Arc::new(SimNode {
            state: Arc::clone(&self.state),
            path: target,
        }))
    }

    fn get(&self) -> Result<Value> {
        self.with_entry(|entry| match entry {
            SimEntry::Leaf(slot) => Ok(lock(slot).clone()),
            _ => Err(SyncError::Node {
                path: self.path.clone(),
                reason: "node holds no scalar value".into(),
            }),
        })
    }

    fn set(&self, value: Value) -> Result<()> {
        self.with_entry(|entry| match entry {
            SimEntry::Leaf(slot) => {
                let mut stored = lock(slot);
                if stored.kind() != value.kind() {
                    return Err(SyncError::type_mismatch(
                        self.path.clone(),
                        &value.kind().to_string(),
                        &stored.kind().to_string(),
                    ));
                }
                *stored = value;
                Ok(())
            }
            _ => Err(SyncError::Node {
                path: self.path.clone(),
                reason: "node is not writable".into(),
            }),
        })
    }

    fn execute(&self) -> Result<bool> {
        self.with_entry(|entry| match entry {
            SimEntry::Action { result, count } => {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(*result)
            }
            _ => Err(SyncError::Node {
                path: self.path.clone(),
                reason: "node is not executable".into(),
            }),
        })
    }

    fn rel_path(&self) -> String {
        self.path.clone()
    }

    fn value_kind(&self) -> Option<ValueKind> {
        let entries = read(&self.state.entries);
        match entries.get(&self.path) {
            Some(SimEntry::Leaf(slot)) => Some(lock(slot).kind()),
            _ => None,
        }
    }

    fn is_readable(&self) -> bool {
        matches!(
            read(&self.state.entries).get(&self.path),
            Some(SimEntry::Leaf(_))
        )
    }

    fn child_count(&self) -> usize {
        self.child_names().len()
    }

    fn child(&self, index: usize) -> Result<NodeRef> {
        let names = self.child_names();
        let name = names
            .get(index)
            .ok_or_else(|| SyncError::absent(format!("{}#{}", self.path, index)))?;
        self.node(&RemotePath::new(name.clone()))
    }
}

struct SimSignalSource<T: Sample> {
    state: Arc<SimSignalState>,
    _ty: std::marker::PhantomData<fn() -> T>,
}

impl<T: Sample> SignalSource<T> for SimSignalSource<T> {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn access_kind(&self) -> AccessKind {
        self.state.kind
    }

    fn column_count(&self) -> usize {
        self.state.columns
    }

    fn stream_client(&self) -> Result<Box<dyn StreamClient<T>>> {
        if self.state.kind != AccessKind::Stream {
            return Err(SyncError::UnsupportedMode(self.state.name.clone()));
        }
        Ok(Box::new(SimStreamClient {
            state: Arc::clone(&self.state),
            open: false,
            _ty: std::marker::PhantomData,
        }))
    }

    fn on_demand_client(&self) -> Result<Box<dyn OnDemandClient<T>>> {
        if self.state.kind != AccessKind::DataOnDemand {
            return Err(SyncError::UnsupportedMode(self.state.name.clone()));
        }
        Ok(Box::new(SimDodClient {
            state: Arc::clone(&self.state),
            open: false,
            mode: OnDemandMode::Now,
            _ty: std::marker::PhantomData,
        }))
    }
}

struct SimStreamClient<T: Sample> {
    state: Arc<SimSignalState>,
    open: bool,
    _ty: std::marker::PhantomData<fn() -> T>,
}

impl<T: Sample> StreamClient<T> for SimStreamClient<T> {
    fn open(&mut self) -> Result<()> {
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(SyncError::Open {
                path: self.state.name.clone(),
                reason: "simulated open failure".into(),
            });
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read(&mut self, block: &mut SampleBlock<T>) -> Result<()> {
        if !self.open {
            return Err(SyncError::StreamRead {
                path: self.state.name.clone(),
                reason: "stream not open".into(),
            });
        }
        if self.state.fail_read.load(Ordering::SeqCst) {
            return Err(SyncError::StreamRead {
                path: self.state.name.clone(),
                reason: "simulated read failure".into(),
            });
        }
        // Pace like a real stream: the read blocks until the next block is
        // due.
        let interval = self.state.stream_interval_ms.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(interval));
        self.state.read_count.fetch_add(1, Ordering::SeqCst);
        self.state.sequence.fetch_add(1, Ordering::SeqCst);
        self.state.fill(block, 0);
        Ok(())
    }
}

struct SimDodClient<T: Sample> {
    state: Arc<SimSignalState>,
    open: bool,
    mode: OnDemandMode,
    _ty: std::marker::PhantomData<fn() -> T>,
}

impl<T: Sample> OnDemandClient<T> for SimDodClient<T> {
    fn open(&mut self, mode: OnDemandMode, _length: usize, _offset: i64) -> Result<()> {
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(SyncError::Open {
                path: self.state.name.clone(),
                reason: "simulated open failure".into(),
            });
        }
        self.mode = mode;
        self.open = true;
        Ok(())
    }

    fn read(
        &mut self,
        block: &mut SampleBlock<T>,
        meta: &mut SignalMeta,
        sample_offset: i64,
    ) -> Result<()> {
        if !self.open {
            return Err(SyncError::Read {
                path: self.state.name.clone(),
                reason: "acquisition not open".into(),
            });
        }
        if self.state.fail_read.load(Ordering::SeqCst) {
            return Err(SyncError::Read {
                path: self.state.name.clone(),
                reason: "simulated read failure".into(),
            });
        }
        if self.mode != OnDemandMode::Now {
            // Triggered modes block until the (simulated) event arrives.
            thread::sleep(Duration::from_millis(TRIGGER_WAIT_MS));
        }
        self.state.read_count.fetch_add(1, Ordering::SeqCst);
        meta.lmt = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        meta.trigger_count = self.state.read_count.load(Ordering::SeqCst) as u64;
        self.state.fill(block, sample_offset);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_access_is_typed() {
        let backend = SimBackend::new();
        backend.set_value("boards/raf5/Kx", Value::ULong(10_000_000));

        let root = backend.connect("127.0.0.1").unwrap();
        let node = root.node(&RemotePath::new("boards/raf5/Kx")).unwrap();
        assert_eq!(node.get().unwrap(), Value::ULong(10_000_000));

        node.set(Value::ULong(9_000_000)).unwrap();
        assert_eq!(backend.value("boards/raf5/Kx"), Some(Value::ULong(9_000_000)));

        assert!(matches!(
            node.set(Value::Bool(true)),
            Err(SyncError::Node { .. })
        ));
    }

    #[test]
    fn missing_nodes_are_absent() {
        let backend = SimBackend::new();
        backend.set_value("a/b", Value::Long(1));

        let root = backend.connect("127.0.0.1").unwrap();
        assert!(root.node(&RemotePath::new("a")).is_ok()); // interior
        assert!(root.node(&RemotePath::new("a/x")).is_err());
    }

    #[test]
    fn actions_count_executions() {
        let backend = SimBackend::new();
        backend.add_action("control/reset", true);

        let root = backend.connect("127.0.0.1").unwrap();
        let node = root.node(&RemotePath::new("control/reset")).unwrap();
        assert!(node.execute().unwrap());
        assert!(node.execute().unwrap());
        assert_eq!(backend.execute_count("control/reset"), 2);
    }

    #[test]
    fn children_enumerate_in_stable_order() {
        let backend = SimBackend::new();
        backend.set_value("boards/raf5/Kx", Value::Long(1));
        backend.set_value("boards/raf5/Ky", Value::Long(2));
        backend.set_value("boards/raf0/Kx", Value::Long(3));

        let root = backend.connect("127.0.0.1").unwrap();
        let boards = root.node(&RemotePath::new("boards")).unwrap();
        assert_eq!(boards.child_count(), 2);
        assert_eq!(boards.child(0).unwrap().rel_path(), "boards/raf0");
        assert_eq!(boards.child(1).unwrap().rel_path(), "boards/raf5");
    }

    #[test]
    fn deterministic_fill_when_noise_is_zero() {
        let state = SimSignalState::new("s".into(), AccessKind::Stream, 3);
        *lock(&state.amplitude) = 1000.0;
        let mut block = SampleBlock::<i32>::new(3, 4);
        state.fill(&mut block, 0);
        assert_eq!(block.at(0, 0), 1000);
        assert_eq!(block.at(3, 2), 3003);
    }
}
