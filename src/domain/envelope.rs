use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const METRIC_ENVELOPE_NAME: &str = "Microsoft.ApplicationInsights.Metric";
pub const STATSBEAT_ENVELOPE_NAME: &str = "Statsbeat";

/// One exportable record, serialized as-is into the ingestion payload.
///
/// `time` is the original measurement time, never the transmission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub ver: u32,
    pub name: String,
    pub time: DateTime<Utc>,
    pub sample_rate: f64,
    #[serde(rename = "iKey")]
    pub instrumentation_key: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub data: EnvelopeData,
}

impl Envelope {
    pub fn metric(
        instrumentation_key: &str,
        name: &str,
        time: DateTime<Utc>,
        tags: BTreeMap<String, String>,
        data: MetricData,
    ) -> Self {
        Self {
            ver: 1,
            name: name.to_string(),
            time,
            sample_rate: 100.0,
            instrumentation_key: instrumentation_key.to_string(),
            tags,
            data: EnvelopeData::MetricData(data),
        }
    }

    pub fn metric_data(&self) -> Option<&MetricData> {
        match &self.data {
            EnvelopeData::MetricData(data) => Some(data),
        }
    }
}

/// Discriminated payload, encoded as `{"baseType": ..., "baseData": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum EnvelopeData {
    MetricData(MetricData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub ver: u32,
    pub metrics: Vec<DataPoint>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl MetricData {
    pub fn new(metrics: Vec<DataPoint>, properties: BTreeMap<String, String>) -> Self {
        Self {
            ver: 2,
            metrics,
            properties,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataPointKind {
    #[default]
    Measurement,
    Aggregation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub ns: String,
    pub name: String,
    #[serde(default)]
    pub kind: DataPointKind,
    pub value: f64,
}
