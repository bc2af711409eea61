use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shape of the values carried by a metric's time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricDescriptorType {
    GaugeInt64,
    GaugeDouble,
    GaugeDistribution,
    CumulativeInt64,
    CumulativeDouble,
    CumulativeDistribution,
}

impl MetricDescriptorType {
    pub fn is_distribution(self) -> bool {
        matches!(
            self,
            MetricDescriptorType::GaugeDistribution | MetricDescriptorType::CumulativeDistribution
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKey {
    pub key: String,
    pub description: String,
}

impl LabelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
        }
    }
}

/// A label value; `None` means the label was recorded without a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValue {
    pub value: Option<String>,
}

impl LabelValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }

    pub fn missing() -> Self {
        Self { value: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub kind: MetricDescriptorType,
    pub label_keys: Vec<LabelKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    Long(i64),
    Double(f64),
    Distribution {
        count: u64,
        sum: f64,
        bucket_counts: Vec<u64>,
    },
}

impl PointValue {
    /// Scalar value of the point, `None` for distributions.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Long(v) => Some(*v as f64),
            PointValue::Double(v) => Some(*v),
            PointValue::Distribution { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub value: PointValue,
    /// When the measurement was recorded.
    pub timestamp: DateTime<Utc>,
}

/// One labelled series of a metric. `label_values` pairs positionally with
/// the descriptor's `label_keys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub label_values: Vec<LabelValue>,
    pub points: Vec<Point>,
    pub start_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub descriptor: MetricDescriptor,
    pub time_series: Vec<TimeSeries>,
}

impl Metric {
    /// Convenience constructor for a single-series gauge, used by the
    /// built-in producers.
    pub fn gauge(name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            descriptor: MetricDescriptor {
                name: name.into(),
                description: String::new(),
                unit: String::new(),
                kind: MetricDescriptorType::GaugeDouble,
                label_keys: Vec::new(),
            },
            time_series: vec![TimeSeries {
                label_values: Vec::new(),
                points: vec![Point {
                    value: PointValue::Double(value),
                    timestamp,
                }],
                start_timestamp: None,
            }],
        }
    }

    /// Sets the same labels on the descriptor and on every series.
    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (keys, values): (Vec<_>, Vec<_>) = labels
            .into_iter()
            .map(|(k, v)| (LabelKey::new(k), LabelValue::new(v)))
            .unzip();
        self.descriptor.label_keys = keys;
        for series in &mut self.time_series {
            series.label_values = values.clone();
        }
        self
    }
}
