// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loading instance records and candidate patches.
//!
//! Datasets are JSON Lines files (one record per line) or JSON files holding an array of records.
//! A dataset can also be named by identifier, in which case it's looked up under the configured
//! dataset root as `<root>/<identifier>/<split>.jsonl`.

use crate::{
    errors::{ConfigurationError, DatasetLoadError, PredictionsLoadError},
    store::is_valid_instance_id,
};
use benchgate_metadata::{InstanceRecord, Predictions};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use std::{collections::HashSet, fs};
use tracing::debug;

/// A single record of a dataset.
#[derive(Debug)]
pub struct DatasetEntry {
    /// The instance ID of the record.
    pub instance_id: String,

    /// The record exactly as it was read.
    pub raw: Map<String, Value>,

    /// The parsed record, or why it couldn't be parsed.
    ///
    /// A record that can't be parsed fails only its own instance.
    pub record: Result<InstanceRecord, ConfigurationError>,
}

impl DatasetEntry {
    fn from_raw(
        raw: Map<String, Value>,
        path: &Utf8Path,
        line: usize,
    ) -> Result<Self, DatasetLoadError> {
        let Some(instance_id) = raw.get("instance_id").and_then(Value::as_str) else {
            return Err(DatasetLoadError::MissingInstanceId {
                path: path.to_owned(),
                line,
            });
        };
        let instance_id = instance_id.to_owned();

        let record = if is_valid_instance_id(&instance_id) {
            serde_json::from_value(Value::Object(raw.clone()))
        } else {
            Err(serde::de::Error::custom(
                "instance ID must be a relative path without `.` or `..` components",
            ))
        };
        let record = record.map_err(|err| ConfigurationError::MalformedRecord {
            instance_id: instance_id.clone(),
            err,
        });

        Ok(Self {
            instance_id,
            raw,
            record,
        })
    }

    /// Returns the reference solution patch, even if the record is otherwise malformed.
    pub fn solution_patch(&self) -> &str {
        match &self.record {
            Ok(record) => &record.patch,
            Err(_) => self
                .raw
                .get("patch")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        }
    }
}

/// An ordered collection of dataset records with unique instance IDs.
#[derive(Debug, Default)]
pub struct Dataset {
    entries: Vec<DatasetEntry>,
}

impl Dataset {
    /// Loads a dataset from a `.jsonl` or `.json` file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, DatasetLoadError> {
        let contents = fs::read_to_string(path).map_err(|err| DatasetLoadError::Read {
            path: path.to_owned(),
            err,
        })?;

        let is_json_array = path.extension() == Some("json");
        let raw_records: Vec<(usize, Value)> = if is_json_array {
            let values: Vec<Value> =
                serde_json::from_str(&contents).map_err(|err| DatasetLoadError::Parse {
                    path: path.to_owned(),
                    line: err.line(),
                    err,
                })?;
            values
                .into_iter()
                .enumerate()
                .map(|(index, value)| (index + 1, value))
                .collect()
        } else {
            let mut values = Vec::new();
            for (index, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let value = serde_json::from_str(line).map_err(|err| DatasetLoadError::Parse {
                    path: path.to_owned(),
                    line: index + 1,
                    err,
                })?;
                values.push((index + 1, value));
            }
            values
        };

        let mut dataset = Self::default();
        let mut seen = HashSet::new();
        for (line, value) in raw_records {
            let Value::Object(raw) = value else {
                return Err(DatasetLoadError::MissingInstanceId {
                    path: path.to_owned(),
                    line,
                });
            };
            let entry = DatasetEntry::from_raw(raw, path, line)?;
            if !seen.insert(entry.instance_id.clone()) {
                return Err(DatasetLoadError::DuplicateInstanceId {
                    instance_id: entry.instance_id,
                });
            }
            dataset.entries.push(entry);
        }

        debug!(%path, records = dataset.entries.len(), "loaded dataset");
        Ok(dataset)
    }

    /// Loads a dataset given either a path or an identifier.
    ///
    /// Existing files are read directly. An existing directory, or else `source` looked up under
    /// `dataset_root`, is read as a directory of splits: the named split if one is given, or else
    /// every `.jsonl` split in the directory, in name order.
    ///
    /// Splits commonly overlap. When several are combined, the first occurrence of each instance
    /// is kept.
    pub fn load(
        source: &str,
        split: Option<&str>,
        dataset_root: &Utf8Path,
    ) -> Result<Self, DatasetLoadError> {
        let path = Utf8Path::new(source);
        if path.is_file() {
            return Self::from_file(path);
        }

        let dir = if path.is_dir() {
            path.to_owned()
        } else {
            dataset_root.join(source)
        };
        let files = match split {
            Some(split) => {
                let file = dir.join(format!("{split}.jsonl"));
                if !file.is_file() {
                    return Err(DatasetLoadError::NotFound {
                        identifier: source.to_owned(),
                        searched: file,
                    });
                }
                vec![file]
            }
            None => list_splits(source, &dir)?,
        };

        let mut dataset = Self::default();
        let mut seen = HashSet::new();
        for file in files {
            for entry in Self::from_file(&file)?.entries {
                if seen.insert(entry.instance_id.clone()) {
                    dataset.entries.push(entry);
                } else {
                    debug!(
                        instance_id = entry.instance_id,
                        %file,
                        "skipping instance already seen in an earlier split",
                    );
                }
            }
        }
        Ok(dataset)
    }

    /// Returns the entries in the order they were read.
    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    /// Consumes the dataset, returning its entries.
    pub fn into_entries(self) -> Vec<DatasetEntry> {
        self.entries
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the dataset has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keeps only the entries whose instance IDs are in `instance_ids`.
    pub fn retain_ids(&mut self, instance_ids: &[String]) {
        self.entries
            .retain(|entry| instance_ids.contains(&entry.instance_id));
    }
}

fn list_splits(identifier: &str, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DatasetLoadError> {
    if !dir.is_dir() {
        return Err(DatasetLoadError::NotFound {
            identifier: identifier.to_owned(),
            searched: dir.to_owned(),
        });
    }

    let read_dir = dir.read_dir_utf8().map_err(|err| DatasetLoadError::ReadDir {
        dir: dir.to_owned(),
        err,
    })?;
    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|err| DatasetLoadError::ReadDir {
            dir: dir.to_owned(),
            err,
        })?;
        let path = entry.path();
        if path.extension() == Some("jsonl") && path.is_file() {
            files.push(path.to_owned());
        }
    }

    if files.is_empty() {
        return Err(DatasetLoadError::NotFound {
            identifier: identifier.to_owned(),
            searched: dir.to_owned(),
        });
    }
    files.sort();
    Ok(files)
}

/// Where candidate patches come from.
#[derive(Clone, Debug)]
pub enum PatchSource {
    /// Each instance's own reference solution.
    Gold,

    /// A predictions file.
    Predictions(Predictions),
}

impl PatchSource {
    /// The argument that selects [`PatchSource::Gold`].
    pub const GOLD: &'static str = "gold";

    /// Interprets a `--patch-dir` argument: `gold`, or the path to a predictions file.
    pub fn from_arg(arg: &str) -> Result<Self, PredictionsLoadError> {
        if arg.trim() == Self::GOLD {
            Ok(Self::Gold)
        } else {
            load_predictions(Utf8Path::new(arg)).map(Self::Predictions)
        }
    }

    /// Returns true for [`PatchSource::Gold`].
    pub fn is_gold(&self) -> bool {
        matches!(self, Self::Gold)
    }

    /// Returns the candidate patch for an entry, or `None` if the entry isn't evaluated at all.
    ///
    /// A prediction whose patch is `null` yields an empty patch.
    pub fn candidate_for(&self, entry: &DatasetEntry) -> Option<String> {
        match self {
            Self::Gold => Some(entry.solution_patch().to_owned()),
            Self::Predictions(predictions) => predictions
                .get(&entry.instance_id)
                .map(|prediction| prediction.model_patch.clone().unwrap_or_default()),
        }
    }
}

/// Loads a predictions file: a JSON object mapping instance IDs to `{"model_patch": ...}`.
pub fn load_predictions(path: &Utf8Path) -> Result<Predictions, PredictionsLoadError> {
    let contents = fs::read_to_string(path).map_err(|err| PredictionsLoadError::Read {
        path: path.to_owned(),
        err,
    })?;
    let predictions: Predictions =
        serde_json::from_str(&contents).map_err(|err| PredictionsLoadError::Parse {
            path: path.to_owned(),
            err,
        })?;
    debug!(%path, predictions = predictions.len(), "loaded predictions");
    Ok(predictions)
}
