//! File-backed upsert store for port calls and labels
//!
//! Layout under the egress directory:
//! - `port_calls.jsonl` - one PortCall per line, ordered by natural key
//! - `labels.jsonl` - one Label per line, ordered by port_call_ref
//! - `checkpoint.json` - latest committed window end
//! - `run_summary.jsonl` - appended once per committed run
//!
//! A commit first drops the stored calls inside the run's replace scope, with
//! their labels, then upserts the run's records. Every file is written to a
//! `.tmp` sibling and renamed into place only after all staging succeeded; a
//! staging failure removes the staged files. Data files are renamed before
//! the checkpoint, so a commit interrupted between renames leaves the
//! checkpoint behind and the next run recomputes the same window. Rewriting
//! the same records produces byte-identical files.

use crate::domain::port_call::{CallKey, Label, PortCall};
use crate::infra::metrics::RunSummary;
use crate::services::pipeline::RunOutput;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PORT_CALLS_FILE: &str = "port_calls.jsonl";
const LABELS_FILE: &str = "labels.jsonl";
const CHECKPOINT_FILE: &str = "checkpoint.json";
const RUN_SUMMARY_FILE: &str = "run_summary.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record in {path} at line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.to_path_buf(), source }
}

/// Last committed window end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_until: DateTime<Utc>,
}

/// One line of the run history
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub site_id: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub snapshot: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub port_calls_total: usize,
    pub port_calls_upserted: usize,
    /// Stored calls inside the replace scope that the run did not reproduce
    pub port_calls_removed: usize,
    pub labels_total: usize,
    pub labels_upserted: usize,
}

pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn port_calls_path(&self) -> PathBuf {
        self.dir.join(PORT_CALLS_FILE)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn run_summary_path(&self) -> PathBuf {
        self.dir.join(RUN_SUMMARY_FILE)
    }

    pub fn load_port_calls(&self) -> Result<BTreeMap<CallKey, PortCall>, StoreError> {
        let calls: Vec<PortCall> = read_jsonl(&self.port_calls_path())?;
        Ok(calls.into_iter().map(|c| (c.key(), c)).collect())
    }

    pub fn load_labels(&self) -> Result<BTreeMap<String, Label>, StoreError> {
        let labels: Vec<Label> = read_jsonl(&self.labels_path())?;
        Ok(labels.into_iter().map(|l| (l.port_call_ref.clone(), l)).collect())
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.checkpoint_path();
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { path, line: 1, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Drop stored calls in the run's replace scope, upsert the run's calls
    /// and labels, advance the checkpoint and append the run record
    pub fn commit(&self, output: &RunOutput, record: &RunRecord) -> Result<CommitStats, StoreError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let mut calls = self.load_port_calls()?;
        let mut labels = self.load_labels()?;

        let mut superseded = BTreeSet::new();
        calls.retain(|_, call| {
            let covered = output.replace.covers(call);
            if covered {
                superseded.insert(call.port_call_ref.clone());
            }
            !covered
        });
        labels.retain(|port_call_ref, _| !superseded.contains(port_call_ref));
        let reproduced: BTreeSet<&str> =
            output.port_calls.values().map(|c| c.port_call_ref.as_str()).collect();
        let port_calls_removed =
            superseded.iter().filter(|r| !reproduced.contains(r.as_str())).count();
        for (key, call) in &output.port_calls {
            calls.insert(key.clone(), call.clone());
        }
        for (port_call_ref, label) in &output.labels {
            labels.insert(port_call_ref.clone(), label.clone());
        }

        let last_until = match self.load_checkpoint()? {
            Some(existing) => existing.last_until.max(record.until),
            None => record.until,
        };
        let checkpoint = Checkpoint { last_until };

        let mut staged = Vec::with_capacity(3);
        if let Err(err) = self.stage_all(&calls, &labels, &checkpoint, &mut staged) {
            discard_staged(&staged);
            return Err(err);
        }
        for (idx, (tmp, target)) in staged.iter().enumerate() {
            if let Err(source) = fs::rename(tmp, target) {
                discard_staged(&staged[idx..]);
                return Err(StoreError::Io { path: target.clone(), source });
            }
            debug!(file = %target.display(), "store_file_committed");
        }

        self.append_run_record(record)?;

        let stats = CommitStats {
            port_calls_total: calls.len(),
            port_calls_upserted: output.port_calls.len(),
            port_calls_removed,
            labels_total: labels.len(),
            labels_upserted: output.labels.len(),
        };
        info!(
            dir = %self.dir.display(),
            port_calls = %stats.port_calls_total,
            port_calls_upserted = %stats.port_calls_upserted,
            port_calls_removed = %stats.port_calls_removed,
            labels = %stats.labels_total,
            labels_upserted = %stats.labels_upserted,
            checkpoint = %last_until,
            "store_committed"
        );
        Ok(stats)
    }

    /// Stage data files then the checkpoint, in rename order
    fn stage_all(
        &self,
        calls: &BTreeMap<CallKey, PortCall>,
        labels: &BTreeMap<String, Label>,
        checkpoint: &Checkpoint,
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<(), StoreError> {
        staged.push(stage_jsonl(&self.port_calls_path(), calls.values())?);
        staged.push(stage_jsonl(&self.labels_path(), labels.values())?);
        staged.push(stage_json(&self.checkpoint_path(), checkpoint)?);
        Ok(())
    }

    fn append_run_record(&self, record: &RunRecord) -> Result<(), StoreError> {
        let path = self.run_summary_path();
        let line = serde_json::to_string(record)
            .map_err(|source| StoreError::Encode { path: path.clone(), source })?;
        let mut file =
            OpenOptions::new().create(true).append(true).open(&path).map_err(io_err(&path))?;
        writeln!(file, "{line}").map_err(io_err(&path))
    }
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StoreError::Io { path: path.to_path_buf(), source }),
    };

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write records to a temp sibling of `target`; returns (tmp, target)
fn stage_jsonl<'a, T: Serialize + 'a>(
    target: &Path,
    records: impl Iterator<Item = &'a T>,
) -> Result<(PathBuf, PathBuf), StoreError> {
    let tmp = tmp_path(target);
    let file = File::create(&tmp).map_err(io_err(&tmp))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)
            .map_err(|source| StoreError::Encode { path: target.to_path_buf(), source })?;
        writer.write_all(b"\n").map_err(io_err(&tmp))?;
    }
    writer.flush().map_err(io_err(&tmp))?;
    Ok((tmp, target.to_path_buf()))
}

/// Best-effort removal of staged files after a failed commit
fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        if let Err(e) = fs::remove_file(tmp) {
            warn!(file = %tmp.display(), error = %e, "staged_file_not_removed");
        }
    }
}

fn stage_json<T: Serialize>(target: &Path, value: &T) -> Result<(PathBuf, PathBuf), StoreError> {
    let tmp = tmp_path(target);
    let json = serde_json::to_string_pretty(value)
        .map_err(|source| StoreError::Encode { path: target.to_path_buf(), source })?;
    fs::write(&tmp, json).map_err(io_err(&tmp))?;
    Ok((tmp, target.to_path_buf()))
}
