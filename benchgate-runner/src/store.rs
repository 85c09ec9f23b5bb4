// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk layout of benchgate output.
//!
//! ```text
//! <output-dir>/
//!   results.json                        (evaluate)
//!   gold_patch_evaluated_instances.jsonl (evaluate, gold patches only)
//!   validation_results.json             (validate)
//!   validated_instances.jsonl           (validate)
//!   <instance-id>/
//!     report.json                       (evaluate)
//!     pre_patch_log.txt                 (validate)
//!     post_patch_log.txt
//!     status.json
//!     error.txt                         (only if the instance errored)
//! ```
//!
//! Every file is written atomically, so an interrupted run never leaves a truncated artifact
//! behind for a later run to pick up.

use crate::errors::{DisplayErrorChain, InfrastructureError, InstanceError, SummaryWriteError};
use benchgate_metadata::{Report, ValidationResult};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::{fs, io, io::Write};
use tracing::debug;

/// Per-instance verdict in evaluate mode.
pub const REPORT_FILE_NAME: &str = "report.json";
/// Parsed statuses: the post-patch status map in evaluate mode, the validation result in validate
/// mode.
pub const STATUS_FILE_NAME: &str = "status.json";
/// Test log captured before the solution patch.
pub const PRE_PATCH_LOG_FILE_NAME: &str = "pre_patch_log.txt";
/// Test log captured after the candidate or solution patch.
pub const POST_PATCH_LOG_FILE_NAME: &str = "post_patch_log.txt";
/// Error chain for an instance that couldn't be processed.
pub const ERROR_FILE_NAME: &str = "error.txt";
/// Aggregate summary in evaluate mode.
pub const RESULTS_FILE_NAME: &str = "results.json";
/// Instance records resolved by their own solution patch.
pub const GOLD_EVALUATED_FILE_NAME: &str = "gold_patch_evaluated_instances.jsonl";
/// Aggregate summary in validate mode.
pub const VALIDATION_RESULTS_FILE_NAME: &str = "validation_results.json";
/// Instance records merged with their validation results.
pub const VALIDATED_INSTANCES_FILE_NAME: &str = "validated_instances.jsonl";

/// Returns true if `instance_id` can name an artifact directory.
///
/// The ID must be a non-empty relative path made up of normal components only, so that the
/// directory stays inside the output directory.
pub fn is_valid_instance_id(instance_id: &str) -> bool {
    !instance_id.is_empty()
        && Utf8Path::new(instance_id)
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)))
}

/// Reads and writes artifacts under an output directory.
///
/// Artifacts of instances whose IDs fail [`is_valid_instance_id`] are never read or written.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: Utf8PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The directory holding an instance's artifacts.
    pub fn instance_dir(&self, instance_id: &str) -> Utf8PathBuf {
        self.root.join(instance_id)
    }

    /// The path of a single artifact of an instance.
    pub fn instance_file(&self, instance_id: &str, file_name: &str) -> Utf8PathBuf {
        self.instance_dir(instance_id).join(file_name)
    }

    /// Returns a previously written report, if it's well-formed.
    ///
    /// A report is only reused if it has a `resolved` field. Anything else, including a missing
    /// or unreadable file, means the instance runs again.
    pub fn cached_report(&self, instance_id: &str) -> Option<Report> {
        if !is_valid_instance_id(instance_id) {
            return None;
        }
        let path = self.instance_file(instance_id, REPORT_FILE_NAME);
        let contents = fs::read_to_string(&path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&contents).ok()?;
        if !value.get("resolved").is_some_and(|resolved| resolved.is_boolean()) {
            debug!(%path, "ignoring cached report without `resolved`");
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Returns a previously written validation result, if it parses.
    pub fn cached_validation(&self, instance_id: &str) -> Option<ValidationResult> {
        if !is_valid_instance_id(instance_id) {
            return None;
        }
        let path = self.instance_file(instance_id, STATUS_FILE_NAME);
        let contents = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(result) => Some(result),
            Err(err) => {
                debug!(%path, "ignoring unparseable cached status: {err}");
                None
            }
        }
    }

    /// Writes a text artifact for an instance.
    pub fn write_text(
        &self,
        instance_id: &str,
        file_name: &str,
        contents: &str,
    ) -> Result<Utf8PathBuf, InfrastructureError> {
        let path = self.checked_instance_file(instance_id, file_name)?;
        write_atomic(&path, contents.as_bytes()).map_err(|err| {
            InfrastructureError::ArtifactWrite {
                path: path.clone(),
                err,
            }
        })?;
        Ok(path)
    }

    /// Writes a JSON artifact for an instance.
    pub fn write_json<T: Serialize>(
        &self,
        instance_id: &str,
        file_name: &str,
        value: &T,
    ) -> Result<Utf8PathBuf, InfrastructureError> {
        let path = self.checked_instance_file(instance_id, file_name)?;
        let mut contents = serde_json::to_string_pretty(value).map_err(|err| {
            InfrastructureError::ArtifactSerialize {
                path: path.clone(),
                err,
            }
        })?;
        contents.push('\n');
        write_atomic(&path, contents.as_bytes()).map_err(|err| {
            InfrastructureError::ArtifactWrite {
                path: path.clone(),
                err,
            }
        })?;
        Ok(path)
    }

    fn checked_instance_file(
        &self,
        instance_id: &str,
        file_name: &str,
    ) -> Result<Utf8PathBuf, InfrastructureError> {
        if !is_valid_instance_id(instance_id) {
            return Err(InfrastructureError::InvalidArtifactDir {
                instance_id: instance_id.to_owned(),
            });
        }
        Ok(self.instance_file(instance_id, file_name))
    }

    /// Records why an instance errored.
    pub fn write_error(
        &self,
        instance_id: &str,
        error: &InstanceError,
    ) -> Result<Utf8PathBuf, InfrastructureError> {
        let contents = format!("{}\n", DisplayErrorChain::new(error));
        self.write_text(instance_id, ERROR_FILE_NAME, &contents)
    }

    /// Removes a stale error file, if any.
    pub fn clear_error(&self, instance_id: &str) {
        if !is_valid_instance_id(instance_id) {
            return;
        }
        let path = self.instance_file(instance_id, ERROR_FILE_NAME);
        match fs::remove_file(&path) {
            Ok(()) => debug!(%path, "removed stale error file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(%path, "failed to remove stale error file: {err}"),
        }
    }

    /// Writes an aggregate JSON file at the root of the output directory.
    pub fn write_summary<T: Serialize>(
        &self,
        file_name: &str,
        value: &T,
    ) -> Result<Utf8PathBuf, SummaryWriteError> {
        let path = self.root.join(file_name);
        let mut contents =
            serde_json::to_string_pretty(value).map_err(|err| SummaryWriteError::Serialize {
                path: path.clone(),
                err,
            })?;
        contents.push('\n');
        write_atomic(&path, contents.as_bytes()).map_err(|err| SummaryWriteError::Write {
            path: path.clone(),
            err,
        })?;
        Ok(path)
    }

    /// Writes a JSON Lines file at the root of the output directory, one value per line.
    pub fn write_jsonl<T: Serialize>(
        &self,
        file_name: &str,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Utf8PathBuf, SummaryWriteError> {
        let path = self.root.join(file_name);
        let mut contents = Vec::new();
        for value in values {
            serde_json::to_writer(&mut contents, &value).map_err(|err| {
                SummaryWriteError::Serialize {
                    path: path.clone(),
                    err,
                }
            })?;
            contents.push(b'\n');
        }
        write_atomic(&path, &contents).map_err(|err| SummaryWriteError::Write {
            path: path.clone(),
            err,
        })?;
        Ok(path)
    }
}

fn write_atomic(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
        .write(|file| file.write_all(contents))
        .map_err(|err| match err {
            atomicwrites::Error::Internal(err) | atomicwrites::Error::User(err) => err,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchgate_metadata::KnownSetOutcome;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn report(resolved: bool) -> Report {
        Report {
            instance_id: "org__repo-1".to_owned(),
            resolved,
            pass_to_pass: KnownSetOutcome::default(),
            fail_to_pass: KnownSetOutcome {
                success: vec!["t1".to_owned()],
                failure: vec![],
            },
        }
    }

    #[test]
    fn cached_report_round_trip() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.cached_report("org__repo-1"), None);

        let path = store
            .write_json("org__repo-1", REPORT_FILE_NAME, &report(true))
            .unwrap();
        assert_eq!(path, dir.path().join("org__repo-1").join("report.json"));
        assert_eq!(store.cached_report("org__repo-1"), Some(report(true)));
    }

    #[test]
    fn cached_report_requires_resolved() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        for contents in [
            "{\"instance_id\": \"org__repo-1\"}",
            "{\"instance_id\": \"org__repo-1\", \"resolved\": null}",
            "not json",
        ] {
            store
                .write_text("org__repo-1", REPORT_FILE_NAME, contents)
                .unwrap();
            assert_eq!(store.cached_report("org__repo-1"), None, "{contents}");
        }
    }

    #[test]
    fn error_file_lifecycle() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let error = InstanceError::Panicked {
            message: "boom".to_owned(),
        };

        let path = store.write_error("org__repo-1", &error).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "instance task panicked: boom\n"
        );
        store.clear_error("org__repo-1");
        assert!(!path.exists());
        // Clearing again is fine.
        store.clear_error("org__repo-1");
    }

    #[test]
    fn jsonl_has_one_record_per_line() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested"));
        let path = store
            .write_jsonl(
                VALIDATED_INSTANCES_FILE_NAME,
                [serde_json::json!({"a": 1}), serde_json::json!({"b": [2]})],
            )
            .unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "{\"a\":1}\n{\"b\":[2]}\n"
        );
    }

    #[test_case("org__repo-1", true; "plain")]
    #[test_case("org/repo-1", true; "nested")]
    #[test_case("", false; "empty")]
    #[test_case("..", false; "parent")]
    #[test_case("../escape", false; "leading parent")]
    #[test_case("org/../../escape", false; "inner parent")]
    #[test_case("/tmp/escape", false; "absolute")]
    fn instance_id_validity(instance_id: &str, valid: bool) {
        assert_eq!(is_valid_instance_id(instance_id), valid);
    }

    #[test]
    fn invalid_instance_ids_stay_off_disk() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("out"));

        let err = store
            .write_text("../escape", POST_PATCH_LOG_FILE_NAME, "log")
            .unwrap_err();
        assert!(
            matches!(
                &err,
                InfrastructureError::InvalidArtifactDir { instance_id }
                    if instance_id == "../escape"
            ),
            "unexpected error: {err}"
        );
        let error = InstanceError::Panicked {
            message: "boom".to_owned(),
        };
        assert!(store.write_error("../escape", &error).is_err());
        assert!(!dir.path().join("escape").exists());

        fs::create_dir_all(dir.path().join("escape")).unwrap();
        fs::write(
            dir.path().join("escape").join(REPORT_FILE_NAME),
            serde_json::to_string(&report(true)).unwrap(),
        )
        .unwrap();
        assert_eq!(store.cached_report("../escape"), None);
    }
}
