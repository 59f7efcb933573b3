//! Remote signal acquisition: collaborator traits and sample containers.
//!
//! A *signal* is a remote high-rate data source with a fixed number of
//! components per sample. The bridge consumes signals through a small
//! client surface: a [`SignalHub`] resolves a registry node into a
//! [`SignalSource`], which hands out either a persistent [`StreamClient`]
//! (continuous block pulls) or an [`OnDemandClient`] (explicit
//! open/read/close per block, optionally trigger-relative). The columnar
//! binding living in [`binding`] drives these from its acquisition thread.

pub mod binding;

pub use binding::{ColumnarSignal, SignalBinding};

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::registry::NodeRef;

/// Element type of a signal component.
///
/// Acquisition and transposition are generic over this; the closed set of
/// implementations mirrors the raw formats the hardware produces.
pub trait Sample: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Convert from the generator-side float representation.
    fn from_f64(value: f64) -> Self;

    /// Widen to float for diagnostics.
    fn to_f64(self) -> f64;
}

impl Sample for i16 {
    fn from_f64(value: f64) -> Self {
        value as i16
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Sample for i32 {
    fn from_f64(value: f64) -> Self {
        value as i32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Sample for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

/// How a signal source delivers its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    /// Persistent client continuously pulling sequential blocks.
    Stream,
    /// Each block obtained by an explicit open/read/close cycle.
    DataOnDemand,
}

/// Acquisition mode for on-demand reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnDemandMode {
    /// Read the most recent data immediately; never blocks.
    Now,
    /// Read one buffer relative to the acquisition start.
    Single,
    /// Block until the next trigger event, then read relative to it.
    Event,
}

/// Acquisition metadata returned alongside an on-demand block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalMeta {
    /// Machine-time tick of the first sample in the block.
    pub lmt: u64,
    /// Trigger counter at acquisition time.
    pub trigger_count: u64,
}

/// Row-major block of acquired samples.
///
/// One row per sample, one column per signal component. This is the
/// client-side acquisition buffer; the binding transposes it into
/// column-major caller-visible arrays on demand.
#[derive(Clone, Debug)]
pub struct SampleBlock<T: Sample> {
    columns: usize,
    data: Vec<T>,
}

impl<T: Sample> SampleBlock<T> {
    /// Zero-filled block of `rows` samples with `columns` components each.
    pub fn new(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            data: vec![T::default(); columns * rows],
        }
    }

    /// Number of samples.
    pub fn rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.data.len() / self.columns
        }
    }

    /// Number of components per sample.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Discard contents and zero-fill to a new row count.
    pub fn resize(&mut self, rows: usize) {
        self.data.clear();
        self.data.resize(self.columns * rows, T::default());
    }

    /// One sample, as a component slice.
    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.columns..(row + 1) * self.columns]
    }

    /// Mutable view of one sample.
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        &mut self.data[row * self.columns..(row + 1) * self.columns]
    }

    /// Component value at (`row`, `column`).
    pub fn at(&self, row: usize, column: usize) -> T {
        self.data[row * self.columns + column]
    }
}

/// Descriptor for one remote signal, resolved from a registry node.
pub trait SignalSource<T: Sample>: Send + Sync {
    /// Name of the signal, used in error reports.
    fn name(&self) -> &str;

    /// Delivery protocol of this source.
    fn access_kind(&self) -> AccessKind;

    /// Number of components per sample.
    fn column_count(&self) -> usize;

    /// Create a streaming client. Only valid for [`AccessKind::Stream`]
    /// sources; the client still has to be opened.
    fn stream_client(&self) -> Result<Box<dyn StreamClient<T>>>;

    /// Create an on-demand client. Only valid for
    /// [`AccessKind::DataOnDemand`] sources; opening is deferred to each
    /// acquisition cycle.
    fn on_demand_client(&self) -> Result<Box<dyn OnDemandClient<T>>>;
}

/// Persistent client over a streaming source.
pub trait StreamClient<T: Sample>: Send {
    /// Open the stream. Must be called before the first read.
    fn open(&mut self) -> Result<()>;

    /// Close the stream. Idempotent.
    fn close(&mut self);

    /// Read the next block, blocking until data is available. Fills every
    /// row of `block`.
    fn read(&mut self, block: &mut SampleBlock<T>) -> Result<()>;
}

/// Per-acquisition client over an on-demand source.
pub trait OnDemandClient<T: Sample>: Send {
    /// Open for one acquisition of `length` samples in `mode`, positioned
    /// `offset` samples past the mode's reference point.
    fn open(&mut self, mode: OnDemandMode, length: usize, offset: i64) -> Result<()>;

    /// Read one block with an additional per-read sample delay applied.
    /// Fills every row of `block` and reports acquisition metadata.
    fn read(
        &mut self,
        block: &mut SampleBlock<T>,
        meta: &mut SignalMeta,
        sample_offset: i64,
    ) -> Result<()>;

    /// Close the acquisition. Called unconditionally after each read
    /// attempt. Idempotent.
    fn close(&mut self);
}

/// Resolver from registry nodes to typed signal sources.
///
/// This is the remote-signal creation seam: backends implement it next to
/// their [`crate::registry::Registry`] implementation.
pub trait SignalHub<T: Sample>: Send + Sync {
    /// Resolve `node` into a signal source, failing with an unsupported-mode
    /// error when the node does not describe a signal this hub can serve.
    fn create(&self, node: &NodeRef) -> Result<Arc<dyn SignalSource<T>>>;
}
