//! Run manifest sidecar.
//!
//! One JSON document is written next to each run's CSV file, capturing the
//! resolved parameter values and run identity at the point where all
//! parameters are finalized. It is the machine-readable companion to the
//! human-readable comment banner at the top of the CSV.

use crate::field::ResolvedParams;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Metadata describing one run, serialized once at run start.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Experiment name (also the base of the output file names).
    pub experiment: String,
    /// Resolved parameter values.
    pub parameters: serde_json::Value,
    /// Declared measurement columns, in CSV order (derived columns excluded).
    pub columns: Vec<String>,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Machine the run executed on.
    pub hostname: String,
    /// Version of this crate.
    pub software_version: String,
    /// CSV file name, relative to the manifest. `None` for debug runs.
    pub data_file: Option<String>,
    /// Whether the run executed in debug mode (no durable persistence).
    pub debug: bool,
}

impl RunManifest {
    /// Build a manifest for a run that is about to start.
    pub fn new(
        run_id: Uuid,
        experiment: impl Into<String>,
        params: &ResolvedParams,
        columns: Vec<String>,
        started_at: DateTime<Utc>,
        debug: bool,
    ) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            run_id,
            experiment: experiment.into(),
            parameters: params.to_json(),
            columns,
            started_at,
            hostname,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            data_file: None,
            debug,
        }
    }

    /// One-line `key: value` rendering of the parameters, used in the CSV
    /// comment banner.
    pub fn parameters_line(&self) -> String {
        match &self.parameters {
            serde_json::Value::Object(map) => {
                let mut pairs: Vec<_> = map.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                pairs
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{self, FieldDescriptor, FieldValue};
    use std::collections::HashMap;

    #[test]
    fn manifest_serializes_with_parameters() {
        let fields = vec![FieldDescriptor::float("duration", 60.0)];
        let mut supplied = HashMap::new();
        supplied.insert("duration".to_string(), FieldValue::Float(30.0));
        let params = field::resolve(&fields, &supplied).unwrap();

        let manifest = RunManifest::new(
            Uuid::new_v4(),
            "r-continuous",
            &params,
            vec!["R".to_string()],
            Utc::now(),
            false,
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["experiment"], "r-continuous");
        assert_eq!(json["parameters"]["duration"], 30.0);
        assert_eq!(json["columns"][0], "R");
        assert!(!manifest.hostname.is_empty());
    }

    #[test]
    fn parameters_line_is_sorted() {
        let fields = vec![
            FieldDescriptor::float("b", 2.0),
            FieldDescriptor::float("a", 1.0),
        ];
        let params = field::resolve(&fields, &HashMap::new()).unwrap();
        let manifest = RunManifest::new(
            Uuid::new_v4(),
            "x",
            &params,
            vec![],
            Utc::now(),
            true,
        );
        assert_eq!(manifest.parameters_line(), "a: 1.0, b: 2.0");
    }
}
