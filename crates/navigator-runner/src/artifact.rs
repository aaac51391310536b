//! Playbook artifacts.
//!
//! An artifact is a run result persisted as versioned JSON. Loading one
//! yields an ordinary sealed [`RunResult`], so a replayed run is viewed
//! exactly like a live one.
//!
//! A run saved before it finished is replayed as canceled, with a
//! supervisor line recording where the capture stopped.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use navigator_core::{
    EventPayload, EventRecord, LineOrigin, NavigatorError, Result, RunId, RunStatus,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::launcher::ExitStatus;
use crate::result::RunResult;

/// Current artifact format version.
pub const ARTIFACT_VERSION: u32 = 1;

/// On-disk form of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookArtifact {
    pub version: u32,
    pub run_id: RunId,
    #[serde(default)]
    pub name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub exit: Option<ExitStatus>,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<EventRecord>,
}

impl PlaybookArtifact {
    /// Capture the current state of a run.
    pub fn capture(result: &RunResult, name: Option<&str>) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            run_id: result.run_id(),
            name: name.map(str::to_string),
            status: result.status(),
            exit: result.exit_status(),
            saved_at: Utc::now(),
            records: result.snapshot(),
        }
    }

    /// Turn the artifact back into a sealed run result.
    ///
    /// A sealed result is always terminal, so a capture of a run that was
    /// still going is closed as [`RunStatus::Canceled`].
    pub fn into_result(mut self) -> RunResult {
        if !self.status.is_terminal() {
            warn!(
                run_id = %self.run_id,
                "Artifact was saved while the run was {}, replaying as canceled",
                self.status
            );
            let seq = self.records.last().map_or(1, |last| last.seq + 1);
            self.records.push(EventRecord::at(
                seq,
                self.saved_at,
                EventPayload::RawText {
                    origin: LineOrigin::Supervisor,
                    line: format!(
                        "Run was still {} when this artifact was saved; later output is missing",
                        self.status
                    ),
                },
            ));
            self.status = RunStatus::Canceled;
        }
        RunResult::from_records(self.run_id, self.records, self.status, self.exit)
    }
}

/// Path of an automatically saved artifact:
/// `<dir>/<name>-artifact-<timestamp>.json`.
pub fn default_artifact_path(dir: &Path, name: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{name}-artifact-{}.json",
        at.format("%Y-%m-%dT%H:%M:%S%.6f%:z")
    ))
}

/// Save a run to `path`, creating parent directories as needed.
///
/// The artifact is written to a temporary file in the same directory and
/// renamed into place, so `path` never holds a partial write.
pub fn save(result: &RunResult, path: &Path, name: Option<&str>) -> Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(|e| NavigatorError::DirectoryCreation {
                path: parent.to_path_buf(),
                source: e,
            })?;
            parent
        }
        None => Path::new("."),
    };

    let artifact = PlaybookArtifact::capture(result, name);
    let staged = NamedTempFile::new_in(parent)
        .map_err(|e| NavigatorError::io("creating temporary artifact", parent, e))?;
    let mut writer = BufWriter::new(staged);
    serde_json::to_writer_pretty(&mut writer, &artifact)
        .map_err(|e| NavigatorError::json_parse(format!("writing {}", path.display()), e))?;
    let staged = writer
        .into_inner()
        .map_err(|e| NavigatorError::io("writing artifact", path, e.into_error()))?;
    staged
        .persist(path)
        .map_err(|e| NavigatorError::io("renaming artifact", path, e.error))?;

    info!(
        "Saved artifact {} ({} records, {})",
        path.display(),
        artifact.records.len(),
        artifact.status
    );
    Ok(())
}

/// Load a run from an artifact file.
pub fn load(path: &Path) -> Result<RunResult> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => NavigatorError::artifact_not_found(path),
        _ => NavigatorError::io("opening artifact", path, e),
    })?;

    let artifact: PlaybookArtifact = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        NavigatorError::ArtifactInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    if artifact.version > ARTIFACT_VERSION {
        return Err(NavigatorError::ArtifactInvalid {
            path: path.to_path_buf(),
            message: format!(
                "format version {} is newer than supported version {ARTIFACT_VERSION}",
                artifact.version
            ),
        });
    }

    if artifact.records.windows(2).any(|pair| pair[0].seq >= pair[1].seq) {
        return Err(NavigatorError::ArtifactInvalid {
            path: path.to_path_buf(),
            message: "records are not in increasing sequence order".into(),
        });
    }

    debug!(
        "Loaded artifact {} ({} records)",
        path.display(),
        artifact.records.len()
    );
    Ok(artifact.into_result())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use navigator_core::{EventPayload, LineOrigin};

    fn sample() -> RunResult {
        let records = vec![
            EventRecord::new(
                1,
                EventPayload::PlayStarted {
                    play_id: "p1".into(),
                    name: "all".into(),
                },
            ),
            EventRecord::new(
                2,
                EventPayload::RawText {
                    origin: LineOrigin::Stderr,
                    line: "warning".into(),
                },
            ),
        ];
        RunResult::from_records("r1", records, RunStatus::Failed, Some(ExitStatus::Code(2)))
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/site-artifact.json");
        let original = sample();

        save(&original, &path, Some("site")).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.run_id(), "r1");
        assert_eq!(loaded.status(), RunStatus::Failed);
        assert_eq!(loaded.exit_status(), Some(ExitStatus::Code(2)));
        assert_eq!(loaded.snapshot(), original.snapshot());
        assert!(loaded.is_sealed());
    }

    #[test]
    fn test_save_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-artifact.json");
        save(&sample(), &path, None).unwrap();
        save(&sample(), &path, None).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("site-artifact.json")]);
        assert_eq!(load(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_partial_capture_replays_as_canceled() {
        let live = RunResult::new("r2");
        live.append(EventRecord::new(
            1,
            EventPayload::RawText {
                origin: LineOrigin::Stdout,
                line: "a".into(),
            },
        ));
        assert_eq!(live.status(), RunStatus::Running);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial-artifact.json");
        save(&live, &path, None).unwrap();
        let loaded = load(&path).unwrap();

        assert!(loaded.is_sealed());
        assert_eq!(loaded.status(), RunStatus::Canceled);
        let records = loaded.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].seq, 2);
        assert!(matches!(
            &records[1].payload,
            EventPayload::RawText { origin: LineOrigin::Supervisor, .. }
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/site-artifact.json")).unwrap_err();
        assert!(matches!(err, NavigatorError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_load_rejects_garbage_and_future_versions() {
        let dir = tempfile::tempdir().unwrap();

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "not json").unwrap();
        assert!(matches!(
            load(&garbage).unwrap_err(),
            NavigatorError::ArtifactInvalid { .. }
        ));

        let future = dir.path().join("future.json");
        let mut artifact = PlaybookArtifact::capture(&sample(), None);
        artifact.version = ARTIFACT_VERSION + 1;
        std::fs::write(&future, serde_json::to_string(&artifact).unwrap()).unwrap();
        assert!(matches!(
            load(&future).unwrap_err(),
            NavigatorError::ArtifactInvalid { .. }
        ));
    }

    #[test]
    fn test_default_artifact_path() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let path = default_artifact_path(Path::new("/tmp/runs"), "site", at);
        assert_eq!(
            path,
            PathBuf::from("/tmp/runs/site-artifact-2024-03-01T12:30:00.000000+00:00.json")
        );
    }
}
