//! Columnar signal binding and its acquisition thread.
//!
//! [`ColumnarSignal`] mirrors one remote signal into N local column buffers,
//! one per signal component. A dedicated worker thread acquires row-major
//! blocks through the protocol client (stream or on-demand) while the
//! binding is enabled and connected; callers pull the latest block into the
//! column buffers with [`ColumnarSignal::get_data`].
//!
//! Locking model: the acquisition state (protocol client + block buffer) is
//! guarded by one mutex, the column buffers by another. `get_data` is the
//! only caller-side operation that touches the acquisition state, and it
//! takes the locks in acquisition → columns order; `realloc` takes only the
//! columns lock. Back-pressure sleeps happen with no lock held.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::SignalDefaults;
use crate::error::{ErrorLatch, ErrorRecord, Result, SyncError};
use crate::registry::{RemoteHandle, RemotePath};
use crate::signal::{
    AccessKind, OnDemandClient, OnDemandMode, Sample, SampleBlock, SignalHub, SignalMeta,
    StreamClient,
};

/// Callback invoked after every successful acquisition update.
///
/// Runs on the acquisition thread; receivers must treat it as
/// untrusted-thread context and defer any heavy work.
pub type SignalCallback = Box<dyn Fn() + Send + Sync>;

/// Control surface shared by all signal bindings, independent of element
/// type. `SyncClient` drives its heterogeneous binding collection through
/// this.
pub trait SignalBinding: Send + Sync {
    /// Registry path of the bound signal.
    fn path(&self) -> &RemotePath;

    /// Resolve the path against a connected handle and set up the protocol
    /// client. See [`ColumnarSignal::connect`].
    fn connect(&self, handle: &RemoteHandle) -> Result<()>;

    /// Allow the acquisition thread to run.
    fn enable(&self);

    /// Stop acquiring without disconnecting.
    fn disable(&self);

    /// Whether acquisition is currently allowed.
    fn is_enabled(&self) -> bool;

    /// Whether a protocol client is established.
    fn is_connected(&self) -> bool;

    /// Stop and join the acquisition thread. Idempotent; called by the
    /// owning client during teardown, strictly before buffers are released.
    fn shutdown(&self);
}

/// Protocol client plus its acquisition buffer.
enum AcqState<T: Sample> {
    Idle,
    Stream {
        client: Box<dyn StreamClient<T>>,
        block: SampleBlock<T>,
    },
    OnDemand {
        client: Box<dyn OnDemandClient<T>>,
        block: SampleBlock<T>,
    },
}

impl<T: Sample> AcqState<T> {
    fn close(&mut self) {
        match self {
            AcqState::Idle => {}
            AcqState::Stream { client, .. } => client.close(),
            AcqState::OnDemand { client, .. } => client.close(),
        }
    }

    fn block_mut(&mut self) -> Option<&mut SampleBlock<T>> {
        match self {
            AcqState::Idle => None,
            AcqState::Stream { block, .. } | AcqState::OnDemand { block, .. } => Some(block),
        }
    }
}

struct SignalCore<T: Sample> {
    path: RemotePath,
    hub: Arc<dyn SignalHub<T>>,
    column_count: usize,

    running: AtomicBool,
    enabled: AtomicBool,
    connected: AtomicBool,
    /// A freshly acquired block awaits transposition into the columns.
    updated: AtomicBool,
    /// Connected protocol is data-on-demand.
    on_demand: AtomicBool,

    period_ms: AtomicU64,
    idle_poll_ms: u64,
    unread_backoff_ms: u64,
    throttle_immediate: AtomicBool,

    offset: AtomicI64,
    length: AtomicUsize,
    mode: Mutex<OnDemandMode>,

    acq: Mutex<AcqState<T>>,
    columns: Mutex<Vec<Box<[T]>>>,
    callback: Mutex<Option<SignalCallback>>,
    errors: ErrorLatch,
}

/// Local mirror of one remote multi-component signal.
///
/// Construction spawns the acquisition thread immediately; it idles until
/// the binding is both connected (via [`ColumnarSignal::connect`], normally
/// called by `SyncClient`) and enabled. Dropping the binding stops and joins
/// the thread before the buffers go away.
pub struct ColumnarSignal<T: Sample> {
    core: Arc<SignalCore<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Sample> ColumnarSignal<T> {
    /// Create a binding with `columns` components of `length` samples each,
    /// using the crate-default timing settings.
    pub fn new(
        path: impl Into<RemotePath>,
        columns: usize,
        length: usize,
        hub: Arc<dyn SignalHub<T>>,
    ) -> Arc<Self> {
        Self::with_defaults(path, columns, length, hub, &SignalDefaults::default())
    }

    /// Create a binding with explicit timing settings.
    pub fn with_defaults(
        path: impl Into<RemotePath>,
        columns: usize,
        length: usize,
        hub: Arc<dyn SignalHub<T>>,
        defaults: &SignalDefaults,
    ) -> Arc<Self> {
        let core = Arc::new(SignalCore {
            path: path.into(),
            hub,
            column_count: columns,
            running: AtomicBool::new(true),
            enabled: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            updated: AtomicBool::new(false),
            on_demand: AtomicBool::new(false),
            period_ms: AtomicU64::new(defaults.period_ms),
            idle_poll_ms: defaults.idle_period_ms,
            unread_backoff_ms: defaults.unread_backoff_ms,
            throttle_immediate: AtomicBool::new(defaults.throttle_immediate),
            offset: AtomicI64::new(0),
            length: AtomicUsize::new(length),
            mode: Mutex::new(OnDemandMode::Now),
            acq: Mutex::new(AcqState::Idle),
            columns: Mutex::new(
                (0..columns)
                    .map(|_| vec![T::default(); length].into_boxed_slice())
                    .collect(),
            ),
            callback: Mutex::new(None),
            errors: ErrorLatch::new(),
        });

        let thread_core = Arc::clone(&core);
        let worker = thread::spawn(move || run_acquisition(thread_core));

        Arc::new(Self {
            core,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Resolve the signal behind `path` and establish its protocol client.
    ///
    /// Stream sources get a persistent client opened here; an open failure
    /// is fatal for this connect attempt. On-demand sources get a client
    /// that is opened and closed around each acquisition instead, so no
    /// remote resource is held while idle.
    pub fn connect(&self, handle: &RemoteHandle) -> Result<()> {
        let core = &self.core;
        core.connected.store(false, Ordering::SeqCst);

        let node = handle.node(&core.path)?;
        let source = core.hub.create(&node)?;
        if source.column_count() != core.column_count {
            return Err(SyncError::Node {
                path: core.path.as_str().to_string(),
                reason: format!(
                    "signal has {} components, binding expects {}",
                    source.column_count(),
                    core.column_count
                ),
            });
        }

        let length = core.length.load(Ordering::SeqCst);
        let mut acq = lock_poisoned_ok(&core.acq);
        // Any client from a previous connect is closed before the protocol
        // branch, so a failed reconnect leaves the binding cleanly idle.
        acq.close();
        *acq = AcqState::Idle;
        match source.access_kind() {
            AccessKind::Stream => {
                let mut client = source.stream_client()?;
                client.open()?;
                *acq = AcqState::Stream {
                    client,
                    block: SampleBlock::new(core.column_count, length),
                };
                core.on_demand.store(false, Ordering::SeqCst);
            }
            AccessKind::DataOnDemand => {
                let client = source.on_demand_client()?;
                *acq = AcqState::OnDemand {
                    client,
                    block: SampleBlock::new(core.column_count, length),
                };
                core.on_demand.store(true, Ordering::SeqCst);
            }
        }
        drop(acq);

        core.updated.store(false, Ordering::SeqCst);
        core.connected.store(true, Ordering::SeqCst);
        debug!(path = %core.path, "signal connected");
        Ok(())
    }

    /// Run one acquisition cycle. Normally driven by the internal thread,
    /// public so callers can acquire synchronously as well.
    ///
    /// On failure the binding disables itself and drops its connected flag;
    /// the caller must reconnect and re-enable to resume.
    pub fn update(&self) -> Result<()> {
        self.core.update()
    }

    /// Copy the most recent block into the column buffers.
    ///
    /// No-op unless an unread block is pending. If the configured length
    /// changed since the block was acquired (a concurrent [`Self::realloc`]),
    /// the block is resized to match and the pending flag cleared without
    /// copying; the next acquisition refills it at the right size. Returns
    /// `true` when the columns were refreshed.
    pub fn get_data(&self) -> bool {
        let core = &self.core;
        if !core.updated.load(Ordering::SeqCst) {
            return false;
        }

        let mut acq = lock_poisoned_ok(&core.acq);
        let length = core.length.load(Ordering::SeqCst);
        let Some(block) = acq.block_mut() else {
            return false;
        };
        if block.rows() != length {
            debug!(
                path = %core.path,
                was = block.rows(),
                is = length,
                "buffer size changed while reading signal"
            );
            block.resize(length);
            core.updated.store(false, Ordering::SeqCst);
            return false;
        }

        let mut columns = lock_poisoned_ok(&core.columns);
        for (i, column) in columns.iter_mut().enumerate() {
            for j in 0..length {
                column[j] = block.at(j, i);
            }
        }
        core.updated.store(false, Ordering::SeqCst);
        trace!(path = %core.path, rows = length, "data copied");
        true
    }

    /// Resize every column buffer to `length` samples, zero-filled.
    ///
    /// Caller contract: only invoke while acquisition is disabled or the
    /// binding is stopped; the acquisition buffer adjusts itself on the next
    /// [`Self::get_data`] cycle.
    pub fn realloc(&self, length: usize) {
        let core = &self.core;
        let mut columns = lock_poisoned_ok(&core.columns);
        core.length.store(length, Ordering::SeqCst);
        *columns = (0..core.column_count)
            .map(|_| vec![T::default(); length].into_boxed_slice())
            .collect();
        debug!(path = %core.path, length, "columns reallocated");
    }

    /// Snapshot of one column buffer.
    pub fn column(&self, index: usize) -> Option<Vec<T>> {
        let columns = lock_poisoned_ok(&self.core.columns);
        columns.get(index).map(|c| c.to_vec())
    }

    /// Copy one column into `out`; copies `min(len, out.len())` samples.
    pub fn copy_column(&self, index: usize, out: &mut [T]) -> usize {
        let columns = lock_poisoned_ok(&self.core.columns);
        match columns.get(index) {
            Some(column) => {
                let n = column.len().min(out.len());
                out[..n].copy_from_slice(&column[..n]);
                n
            }
            None => 0,
        }
    }

    /// Number of components.
    pub fn column_count(&self) -> usize {
        self.core.column_count
    }

    /// Configured samples per column.
    pub fn length(&self) -> usize {
        self.core.length.load(Ordering::SeqCst)
    }

    /// True while an acquired block awaits [`Self::get_data`].
    pub fn is_updated(&self) -> bool {
        self.core.updated.load(Ordering::SeqCst)
    }

    /// Discard a pending block without copying it.
    pub fn clear_updated(&self) {
        self.core.updated.store(false, Ordering::SeqCst);
    }

    /// Sample delay applied to on-demand reads.
    pub fn set_offset(&self, offset: i64) {
        self.core.offset.store(offset, Ordering::SeqCst);
    }

    /// Current on-demand sample delay.
    pub fn offset(&self) -> i64 {
        self.core.offset.load(Ordering::SeqCst)
    }

    /// Acquisition period for immediate-mode reads, in milliseconds.
    pub fn set_period_ms(&self, period: u64) {
        self.core.period_ms.store(period, Ordering::SeqCst);
    }

    /// Select the on-demand acquisition mode.
    pub fn set_mode(&self, mode: OnDemandMode) {
        *lock_poisoned_ok(&self.core.mode) = mode;
    }

    /// Whether immediate mode also backs off while a block stays unread.
    pub fn set_throttle_immediate(&self, throttle: bool) {
        self.core.throttle_immediate.store(throttle, Ordering::SeqCst);
    }

    /// Install the per-update callback, replacing any previous one.
    pub fn set_notifier(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock_poisoned_ok(&self.core.callback) = Some(Box::new(callback));
    }

    /// Last acquisition failure, if any.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.core.errors.peek()
    }

    /// Drain the last acquisition failure.
    pub fn take_error(&self) -> Option<ErrorRecord> {
        self.core.errors.take()
    }
}

impl<T: Sample> SignalBinding for ColumnarSignal<T> {
    fn path(&self) -> &RemotePath {
        &self.core.path
    }

    fn connect(&self, handle: &RemoteHandle) -> Result<()> {
        ColumnarSignal::connect(self, handle)
    }

    fn enable(&self) {
        self.core.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.core.enabled.store(false, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.core.running.store(false, Ordering::SeqCst);
        let handle = lock_poisoned_ok(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(path = %self.core.path, "acquisition thread panicked");
            }
        }
    }
}

impl<T: Sample> Drop for ColumnarSignal<T> {
    fn drop(&mut self) {
        // Thread joined before the core (and its buffers) can go away.
        self.shutdown();
        debug!(path = %self.core.path, "signal binding dropped");
    }
}

impl<T: Sample> SignalCore<T> {
    fn update(&self) -> Result<()> {
        match self.update_signal() {
            Ok(()) => {
                if let Some(callback) = lock_poisoned_ok(&self.callback).as_ref() {
                    callback();
                }
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path, error = %err, "signal update failed, disabling");
                self.errors.record(&err);
                self.enabled.store(false, Ordering::SeqCst);
                self.connected.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn update_signal(&self) -> Result<()> {
        // Back-pressure: an unread on-demand block is never overwritten.
        // Checked before taking the buffer mutex so the backoff sleep does
        // not block a concurrent get_data.
        if self.on_demand.load(Ordering::SeqCst) && self.updated.load(Ordering::SeqCst) {
            let mode = *lock_poisoned_ok(&self.mode);
            if mode != OnDemandMode::Now || self.throttle_immediate.load(Ordering::SeqCst) {
                self.sleep_while_running(self.unread_backoff_ms);
            }
            return Ok(());
        }

        let mut acq = lock_poisoned_ok(&self.acq);
        match &mut *acq {
            AcqState::Idle => Err(SyncError::NotConnected),
            AcqState::Stream { client, block } => {
                client.read(block).map_err(|err| SyncError::StreamRead {
                    path: self.path.as_str().to_string(),
                    reason: err.to_string(),
                })?;
                self.updated.store(true, Ordering::SeqCst);
                trace!(path = %self.path, rows = block.rows(), "stream data read");
                Ok(())
            }
            AcqState::OnDemand { client, block } => {
                let mode = *lock_poisoned_ok(&self.mode);
                let length = self.length.load(Ordering::SeqCst);
                client
                    .open(mode, length, 0)
                    .map_err(|err| SyncError::Open {
                        path: self.path.as_str().to_string(),
                        reason: err.to_string(),
                    })?;
                let mut meta = SignalMeta::default();
                let read = client
                    .read(block, &mut meta, self.offset.load(Ordering::SeqCst))
                    .map_err(|err| SyncError::Read {
                        path: self.path.as_str().to_string(),
                        reason: err.to_string(),
                    });
                client.close();
                read?;
                self.updated.store(true, Ordering::SeqCst);
                trace!(path = %self.path, rows = block.rows(), lmt = meta.lmt, "dod data read");
                Ok(())
            }
        }
    }

    fn sleep_while_running(&self, ms: u64) {
        sleep_while_set(&self.running, ms);
    }
}

/// Sleep up to `ms`, waking early when `flag` clears, so worker threads
/// stay responsive to shutdown even with long periods configured.
pub(crate) fn sleep_while_set(flag: &AtomicBool, ms: u64) {
    let deadline = Instant::now() + Duration::from_millis(ms);
    while flag.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// Acquisition thread body: update while enabled and connected, idle-poll
/// otherwise. Immediate on-demand reads return instantly, so only they get
/// an artificial period sleep; stream and triggered reads block inside the
/// protocol client.
fn run_acquisition<T: Sample>(core: Arc<SignalCore<T>>) {
    trace!(path = %core.path, "acquisition thread started");
    while core.running.load(Ordering::SeqCst) {
        if core.enabled.load(Ordering::SeqCst) && core.connected.load(Ordering::SeqCst) {
            let _ = core.update();
            let immediate = core.on_demand.load(Ordering::SeqCst)
                && *lock_poisoned_ok(&core.mode) == OnDemandMode::Now;
            if immediate {
                let period = core.period_ms.load(Ordering::SeqCst);
                core.sleep_while_running(period);
            }
        } else {
            core.sleep_while_running(core.idle_poll_ms);
        }
    }
    trace!(path = %core.path, "acquisition thread exited");
}

/// Continue through mutex poisoning: a panicked worker must not wedge
/// shutdown or caller reads.
pub(crate) fn lock_poisoned_ok<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
