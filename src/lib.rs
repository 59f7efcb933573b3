//! # regsync
//!
//! Client-side synchronization bridge between a remote hierarchical
//! instrument registry and locally exposed, strongly-typed attributes and
//! signal buffers. The crate is a library consumed by a hosting process
//! (typically an attribute server); it defines no wire format or CLI of its
//! own.
//!
//! ## Crate Structure
//!
//! - **`client`**: the [`client::SyncClient`] orchestrator; owns the
//!   registry handle, the binding collections, the attribute polling thread
//!   and the error latch.
//! - **`registry`**: the consumed registry collaborator traits
//!   ([`registry::Registry`], [`registry::RegistryNode`]), path and value
//!   types, and the [`registry::RemoteHandle`] connection wrapper.
//! - **`attribute`**: typed scalar bindings with pluggable reader/writer
//!   conversion functions, registration keys and change notification.
//! - **`signal`**: columnar signal bindings with one acquisition thread per
//!   signal, supporting continuous stream and data-on-demand protocols.
//! - **`config`**: TOML + environment configuration via `figment`. See
//!   [`config::BridgeConfig`].
//! - **`logging`**: `tracing` subscriber bootstrap helpers for hosts.
//! - **`error`**: the [`error::SyncError`] taxonomy and the cross-thread
//!   [`error::ErrorLatch`].
//! - **`sim`**: in-process simulated registry and signal sources, used by
//!   the test suite and for development without hardware.

pub mod attribute;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod signal;
pub mod sim;

pub use attribute::{ScalarBinding, ScalarKey};
pub use client::SyncClient;
pub use config::BridgeConfig;
pub use error::{Result, SyncError};
pub use registry::{RemoteHandle, RemotePath, Value};
pub use signal::{ColumnarSignal, OnDemandMode, SignalBinding};
