//! Domain layer for rask-metrics-exporter.
//!
//! Contains the canonical types shared across all modules:
//! - `Metric` and friends: the snapshot handed over by the aggregation engine
//! - `Envelope`: the pipeline's wire-ready record
//! - `ExporterError`: Top-level error type

pub mod envelope;
pub mod error;
pub mod metric;

pub use envelope::{DataPoint, DataPointKind, Envelope, EnvelopeData, MetricData};
pub use error::ExporterError;
pub use metric::{
    LabelKey, LabelValue, Metric, MetricDescriptor, MetricDescriptorType, Point, PointValue,
    TimeSeries,
};
