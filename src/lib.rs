//! # abyss
//!
//! Per-process observability core: a metric collection and analysis
//! pipeline driven by one [`Pusher`] per data source, stateful and
//! stateless analyzers, threshold [`Alert`]s, and a [`Registry`] that
//! gathers everything into typed, named metric families.
//!
//! A [`Supervisor`] owns one [`ProcRegistry`] per monitored process,
//! building it from a YAML configuration document (see [`config`]) and
//! forwarding gathered metrics to a pluggable [`sink::Sink`].
//!
//! ## Quick start
//!
//! ```no_run
//! use abyss::config::ProcConfig;
//! use abyss::proc_registry::ProcRegistry;
//! use abyss::pushfunc::PushFuncOpts;
//!
//! let text = std::fs::read_to_string("proc.yaml").unwrap();
//! let config = ProcConfig::from_yaml(&text).unwrap();
//! let registry = ProcRegistry::from_config(std::process::id(), &config, &PushFuncOpts::default()).unwrap();
//! registry.start();
//! let (_buckets, _errs) = registry.gather();
//! registry.stop();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod analyzer;
pub mod bpf;
pub mod config;
pub mod data;
pub mod error;
pub mod metric;
pub mod proc_registry;
pub mod pusher;
pub mod pushfunc;
pub mod registry;
pub mod sink;
pub mod supervisor;

pub use analyzer::{Aggregation, AggregationOpts, Alert, QuantileAnalyzer, StatefulAnalyzer, StatelessAnalyzer};
pub use data::DataPair;
pub use error::{AbyssError, AbyssResult, MultiError};
pub use metric::{ConstMetric, ConstSummary, Desc, Labels, Metric, MetricFamily, ValueType, WireMetric};
pub use proc_registry::ProcRegistry;
pub use pusher::{PushFn, Pusher};
pub use registry::{Collector, Registry};
pub use sink::Sink;
pub use supervisor::Supervisor;
