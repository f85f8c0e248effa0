//! # Telemetry Recorder
//!
//! Append-only in-memory store of every sample delivered during a flight,
//! keyed by variable name and written to disk once the flight is over.
//!
//! The exported file maps each variable to its ordered timestamps and
//! values, in the order the variables were declared:
//!
//! ```json
//! {
//!     "stateEstimate.x": {
//!         "time": [1200, 1210],
//!         "data": [0.01, 0.012]
//!     }
//! }
//! ```
//!
//! JSON has no literal for non-finite numbers, so NaN and the infinities
//! are written as the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Ordered samples of one variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Vehicle timestamps in milliseconds
    pub time: Vec<u64>,
    /// Sample values, index-aligned with `time`
    #[serde(with = "sample_values")]
    pub data: Vec<f64>,
}

mod sample_values {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Sample {
        Number(f64),
        Named(String),
        // `null`, as written for non-finite values by plain serde_json
        Missing(()),
    }

    fn encode(value: f64) -> Sample {
        if value.is_nan() {
            Sample::Named("NaN".to_string())
        } else if value == f64::INFINITY {
            Sample::Named("Infinity".to_string())
        } else if value == f64::NEG_INFINITY {
            Sample::Named("-Infinity".to_string())
        } else {
            Sample::Number(value)
        }
    }

    fn decode(sample: Sample) -> Result<f64, String> {
        match sample {
            Sample::Number(v) => Ok(v),
            Sample::Missing(()) => Ok(f64::NAN),
            Sample::Named(name) => match name.to_ascii_lowercase().as_str() {
                "nan" => Ok(f64::NAN),
                "infinity" | "inf" | "+infinity" | "+inf" => Ok(f64::INFINITY),
                "-infinity" | "-inf" => Ok(f64::NEG_INFINITY),
                _ => Err(format!("invalid sample value {:?}", name)),
            },
        }
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| encode(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Sample>::deserialize(deserializer)?
            .into_iter()
            .map(|s| decode(s).map_err(D::Error::custom))
            .collect()
    }
}

impl Series {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.time.last().copied()
    }
}

/// Buffer of (timestamp, value) samples per variable.
///
/// No deduplication or downsampling: memory grows with flight duration
/// times subscribed variable count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecorder {
    series: Vec<(String, Series)>,
    index: HashMap<String, usize>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `name` has a (possibly empty) series, keeping declaration order.
    pub fn declare(&mut self, name: &str) {
        self.slot(name);
    }

    fn slot(&mut self, name: &str) -> &mut Series {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.series.push((name.to_string(), Series::default()));
                self.index.insert(name.to_string(), self.series.len() - 1);
                self.series.len() - 1
            }
        };
        &mut self.series[idx].1
    }

    /// Append one sample to `name`'s series.
    pub fn record(&mut self, name: &str, timestamp: u64, value: f64) {
        let series = self.slot(name);
        if let Some(last) = series.last_timestamp() {
            if timestamp < last {
                warn!("Timestamp for {} went backwards ({} after {})", name, timestamp, last);
            }
        }
        series.time.push(timestamp);
        series.data.push(value);
    }

    pub fn get(&self, name: &str) -> Option<&Series> {
        self.index.get(name).map(|&idx| &self.series[idx].1)
    }

    /// Variable names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Series)> {
        self.series.iter().map(|(name, s)| (name.as_str(), s))
    }

    /// Number of declared variables.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total number of samples across all variables.
    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|(_, s)| s.len()).sum()
    }

    /// Serialize as pretty-printed JSON with four-space indentation.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_pretty(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn write_pretty<W: Write>(&self, writer: W) -> Result<()> {
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(writer, formatter);
        self.serialize(&mut ser)?;
        Ok(())
    }

    /// Write the whole recording to `path`, overwriting any existing file.
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_pretty(&mut writer)?;
        writer.flush()?;
        info!(
            "Wrote {} samples for {} variables to {}",
            self.sample_count(),
            self.len(),
            path.display()
        );
        Ok(())
    }

    /// Read a recording previously written by [`export`](Self::export).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading telemetry from {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl Serialize for TelemetryRecorder {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.series.len()))?;
        for (name, series) in &self.series {
            map.serialize_entry(name, series)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TelemetryRecorder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RecorderVisitor;

        impl<'de> Visitor<'de> for RecorderVisitor {
            type Value = TelemetryRecorder;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variable name to {time, data}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut recorder = TelemetryRecorder::new();
                while let Some((name, series)) = access.next_entry::<String, Series>()? {
                    if series.time.len() != series.data.len() {
                        return Err(serde::de::Error::custom(format!(
                            "series {} has {} timestamps but {} values",
                            name,
                            series.time.len(),
                            series.data.len()
                        )));
                    }
                    *recorder.slot(&name) = series;
                }
                Ok(recorder)
            }
        }

        deserializer.deserialize_map(RecorderVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_record_preserves_arrival_order() {
        let mut rec = TelemetryRecorder::new();
        rec.record("stateEstimate.x", 10, 0.1);
        rec.record("stateEstimate.x", 20, 0.2);

        let series = rec.get("stateEstimate.x").unwrap();
        assert_eq!(series.time, vec![10, 20]);
        assert_eq!(series.data, vec![0.1, 0.2]);
    }

    #[test]
    fn test_ties_are_kept() {
        let mut rec = TelemetryRecorder::new();
        rec.record("a", 10, 1.0);
        rec.record("a", 10, 1.0);
        assert_eq!(rec.get("a").unwrap().len(), 2);
    }

    #[test]
    fn test_declare_keeps_order_and_empty_series() {
        let mut rec = TelemetryRecorder::new();
        rec.declare("b");
        rec.declare("a");
        rec.declare("b");
        rec.record("c", 1, 2.0);

        assert_eq!(rec.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert!(rec.get("a").unwrap().is_empty());
        assert_eq!(rec.sample_count(), 1);
    }

    #[test]
    fn test_json_layout() {
        let mut rec = TelemetryRecorder::new();
        rec.record("z", 5, 1.5);
        rec.declare("a");

        let json = rec.to_json().unwrap();
        // Declaration order, not alphabetical
        assert!(json.find("\"z\"").unwrap() < json.find("\"a\"").unwrap());
        assert!(json.contains("    \"z\": {"));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["z"]["time"][0], 5);
        assert_eq!(value["z"]["data"][0], 1.5);
        assert!(value["a"]["time"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_export_and_load_round_trip() {
        let mut rec = TelemetryRecorder::new();
        rec.declare("ae483log.o_x");
        rec.record("stateEstimate.x", 100, 0.25);
        rec.record("stateEstimate.x", 110, -0.5);
        rec.record("ae483log.m_1", 100, 40000.0);

        let file = NamedTempFile::new().unwrap();
        rec.export(file.path()).unwrap();

        let loaded = TelemetryRecorder::load(file.path()).unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(loaded.names().collect::<Vec<_>>(), rec.names().collect::<Vec<_>>());
    }

    #[test]
    fn test_non_finite_samples_round_trip() {
        let mut rec = TelemetryRecorder::new();
        rec.record("ae483log.o_z", 100, 0.25);
        rec.record("ae483log.o_z", 110, f64::NAN);
        rec.record("ae483log.o_z", 120, f64::INFINITY);
        rec.record("ae483log.o_z", 130, f64::NEG_INFINITY);

        let json = rec.to_json().unwrap();
        assert!(json.contains("\"NaN\""));
        assert!(json.contains("\"-Infinity\""));

        let file = NamedTempFile::new().unwrap();
        rec.export(file.path()).unwrap();
        let loaded = TelemetryRecorder::load(file.path()).unwrap();

        let series = loaded.get("ae483log.o_z").unwrap();
        assert_eq!(series.time, vec![100, 110, 120, 130]);
        assert_eq!(series.data[0], 0.25);
        assert!(series.data[1].is_nan());
        assert_eq!(series.data[2], f64::INFINITY);
        assert_eq!(series.data[3], f64::NEG_INFINITY);
    }

    #[test]
    fn test_null_and_integer_samples_load() {
        let json = r#"{"a": {"time": [1, 2, 3], "data": [null, 40000, 0.5]}}"#;
        let rec = TelemetryRecorder::from_json(json).unwrap();
        let data = &rec.get("a").unwrap().data;
        assert!(data[0].is_nan());
        assert_eq!(data[1], 40000.0);
        assert_eq!(data[2], 0.5);
    }

    #[test]
    fn test_unknown_sample_string_rejected() {
        let json = r#"{"a": {"time": [1], "data": ["fast"]}}"#;
        assert!(TelemetryRecorder::from_json(json).is_err());
    }

    #[test]
    fn test_export_overwrites_existing_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "garbage that is longer than the new content").unwrap();

        let rec = TelemetryRecorder::new();
        rec.export(file.path()).unwrap();

        assert_eq!(TelemetryRecorder::load(file.path()).unwrap(), rec);
    }

    #[test]
    fn test_mismatched_series_rejected() {
        let json = r#"{"a": {"time": [1, 2], "data": [1.0]}}"#;
        assert!(TelemetryRecorder::from_json(json).is_err());
    }
}
