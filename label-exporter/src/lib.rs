//! Exports pod labels as Prometheus metric labels.
//!
//! Pods that carry an opt-in label are tracked in a [`LabelIndex`]; every
//! scrape renders one `label_exporter` sample per tracked pod, with one
//! label column per tracked label name.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Zenoh Network  │────>│   Dispatcher    │────>│   Label Index   │
//! │  (labels/**)    │     │  (add/remove)   │     │  (single lock)  │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │ snapshot
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! label-exporter --config config.json5
//! ```
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod filter;
pub mod http;
pub mod index;
pub mod mapping;
pub mod metrics;
pub mod watcher;

pub use collector::LabelCollector;
pub use config::{CleanupStrategy, ExporterConfig};
pub use dispatcher::{EventDispatcher, LabelEvent, SharedDispatcher};
pub use filter::LabelFilter;
pub use http::HttpServer;
pub use index::{LabelIndex, SharedIndex, Snapshot};
pub use metrics::{ExporterMetrics, build_registry};
pub use watcher::{EntityWatcher, SyncStatus, WatchError};
