//! Append-only, durable transaction log.
//!
//! Every mutating operation writes an intent line before touching the
//! filesystem and an outcome line after, each flushed and fsynced before the
//! pipeline proceeds. A crash mid-operation therefore always leaves
//! detectable evidence: an intent with no outcome. The log is JSON Lines,
//! one file per run at a fixed location, superseded by the next run.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutating operation kinds the pipeline performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Mkdir,
    Move,
    Link,
    Delete,
}

/// State of the operands before the operation ran, captured so the inverse
/// operation can be checked before it is applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreState {
    pub source_existed: bool,
    pub source_hash: Option<String>,
}

/// One line of the on-disk log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogLine {
    Header {
        run_id: String,
        started: DateTime<Utc>,
    },
    Intent {
        seq: u64,
        op: OpKind,
        source: PathBuf,
        dest: Option<PathBuf>,
        pre_state: PreState,
        timestamp: DateTime<Utc>,
    },
    Outcome {
        seq: u64,
        success: bool,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

/// How one logged operation finished, as reconstructed from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// Intent and a success outcome were both recorded.
    Done,
    /// Intent and a failure outcome were both recorded.
    Failed(String),
    /// Intent only: the process stopped mid-operation.
    IntentOnly,
}

/// One operation folded from its intent/outcome lines.
#[derive(Debug, Clone)]
pub struct LoggedOp {
    pub seq: u64,
    pub op: OpKind,
    pub source: PathBuf,
    pub dest: Option<PathBuf>,
    pub pre_state: PreState,
    pub outcome: OpOutcome,
}

/// Full reconstruction of a run's log.
#[derive(Debug)]
pub struct LogReplay {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub ops: Vec<LoggedOp>,
    /// A trailing line that could not be parsed (torn write at crash time).
    pub truncated_tail: bool,
}

impl LogReplay {
    /// Operations that completed successfully, newest first. This is the
    /// order rollback applies inverses in.
    pub fn completed_reversed(&self) -> Vec<&LoggedOp> {
        let mut out: Vec<&LoggedOp> = self
            .ops
            .iter()
            .filter(|op| op.outcome == OpOutcome::Done)
            .collect();
        out.reverse();
        out
    }
}

/// Single-writer handle to the current run's log.
#[derive(Debug)]
pub struct TransactionLog {
    path: PathBuf,
    file: File,
    next_seq: u64,
    committed: u64,
    run_id: String,
}

impl TransactionLog {
    /// Start a fresh log for a new run, superseding any previous one.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("open transaction log: {}", path.display()))?;

        let started = Utc::now();
        let run_id = format!("reorg_{}", started.format("%Y%m%d_%H%M%S"));
        let header = LogLine::Header {
            run_id: run_id.clone(),
            started,
        };
        let line = serde_json::to_string(&header).context("serialize log header")?;
        writeln!(file, "{line}").context("write log header")?;
        file.sync_all().context("sync log header")?;
        sync_parent_dir(path);

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_seq: 1,
            committed: 0,
            run_id,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of operations with a recorded success outcome. Phase guards
    /// compare this against each phase's expected operation count.
    pub fn committed_count(&self) -> u64 {
        self.committed
    }

    /// Durably record intent to perform an operation. Must return before the
    /// corresponding filesystem mutation starts.
    pub fn begin(
        &mut self,
        op: OpKind,
        source: &Path,
        dest: Option<&Path>,
        pre_state: PreState,
    ) -> Result<u64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.append(&LogLine::Intent {
            seq,
            op,
            source: source.to_path_buf(),
            dest: dest.map(Path::to_path_buf),
            pre_state,
            timestamp: Utc::now(),
        })?;
        Ok(seq)
    }

    /// Record that the operation begun as `seq` completed.
    pub fn commit(&mut self, seq: u64) -> Result<()> {
        self.append(&LogLine::Outcome {
            seq,
            success: true,
            reason: None,
            timestamp: Utc::now(),
        })?;
        self.committed += 1;
        Ok(())
    }

    /// Record that the operation begun as `seq` failed and was reverted.
    pub fn abort(&mut self, seq: u64, reason: &str) -> Result<()> {
        self.append(&LogLine::Outcome {
            seq,
            success: false,
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        })
    }

    fn append(&mut self, line: &LogLine) -> Result<()> {
        let text = serde_json::to_string(line).context("serialize log entry")?;
        writeln!(self.file, "{text}")
            .with_context(|| format!("append transaction log: {}", self.path.display()))?;
        self.file
            .sync_all()
            .with_context(|| format!("sync transaction log: {}", self.path.display()))?;
        Ok(())
    }
}

/// Read a log front-to-back, folding intent/outcome pairs into operations.
pub fn read_all(path: &Path) -> Result<LogReplay> {
    let file =
        File::open(path).with_context(|| format!("open transaction log: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut run_id = None;
    let mut started = None;
    let mut ops: Vec<LoggedOp> = Vec::new();
    let mut truncated_tail = false;

    let mut lines = reader.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line.with_context(|| format!("read log line: {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: LogLine = match serde_json::from_str(trimmed) {
            Ok(p) => p,
            Err(_) if lines.peek().is_none() => {
                // The final line may be torn by a crash mid-write.
                truncated_tail = true;
                break;
            }
            Err(e) => bail!("corrupt transaction log {}: {}", path.display(), e),
        };

        match parsed {
            LogLine::Header { run_id: id, started: at } => {
                run_id = Some(id);
                started = Some(at);
            }
            LogLine::Intent {
                seq,
                op,
                source,
                dest,
                pre_state,
                ..
            } => ops.push(LoggedOp {
                seq,
                op,
                source,
                dest,
                pre_state,
                outcome: OpOutcome::IntentOnly,
            }),
            LogLine::Outcome { seq, success, reason, .. } => {
                match ops.iter_mut().find(|o| o.seq == seq) {
                    Some(op) => {
                        op.outcome = if success {
                            OpOutcome::Done
                        } else {
                            OpOutcome::Failed(reason.unwrap_or_default())
                        };
                    }
                    None => bail!(
                        "corrupt transaction log {}: outcome for unknown seq {}",
                        path.display(),
                        seq
                    ),
                }
            }
        }
    }

    let run_id = run_id
        .ok_or_else(|| anyhow::anyhow!("transaction log {} has no header", path.display()))?;

    Ok(LogReplay {
        run_id,
        started: started.unwrap_or_else(Utc::now),
        ops,
        truncated_tail,
    })
}

/// Fsync the directory containing `path` so the log file's existence itself
/// survives a crash.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    use std::os::unix::fs::OpenOptionsExt;
    if let Some(parent) = path.parent() {
        let opened = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(parent);
        if let Ok(f) = opened {
            let _ = f.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn append_and_read_round_trip() -> Result<()> {
        let tmp = TempDir::new()?;
        let log_path = tmp.path().join("transaction.log");

        let mut log = TransactionLog::create(&log_path)?;
        let s1 = log.begin(
            OpKind::Mkdir,
            Path::new("core/src"),
            None,
            PreState::default(),
        )?;
        log.commit(s1)?;
        let s2 = log.begin(
            OpKind::Move,
            Path::new("b.py"),
            Some(Path::new("core/src/b.py")),
            PreState {
                source_existed: true,
                source_hash: Some("blake3:abc".into()),
            },
        )?;
        log.commit(s2)?;
        assert_eq!(log.committed_count(), 2);

        let replay = read_all(&log_path)?;
        assert!(replay.run_id.starts_with("reorg_"));
        assert_eq!(replay.ops.len(), 2);
        assert_eq!(replay.ops[0].op, OpKind::Mkdir);
        assert_eq!(replay.ops[1].op, OpKind::Move);
        assert_eq!(replay.ops[1].outcome, OpOutcome::Done);
        assert_eq!(
            replay.ops[1].pre_state.source_hash.as_deref(),
            Some("blake3:abc")
        );
        assert!(!replay.truncated_tail);
        Ok(())
    }

    #[test]
    fn aborted_ops_are_not_counted_committed() -> Result<()> {
        let tmp = TempDir::new()?;
        let log_path = tmp.path().join("transaction.log");

        let mut log = TransactionLog::create(&log_path)?;
        let seq = log.begin(
            OpKind::Move,
            Path::new("a.py"),
            Some(Path::new("core/src/a.py")),
            PreState::default(),
        )?;
        log.abort(seq, "hash mismatch")?;
        assert_eq!(log.committed_count(), 0);

        let replay = read_all(&log_path)?;
        assert_eq!(replay.ops.len(), 1);
        assert_eq!(
            replay.ops[0].outcome,
            OpOutcome::Failed("hash mismatch".into())
        );
        assert!(replay.completed_reversed().is_empty());
        Ok(())
    }

    #[test]
    fn intent_without_outcome_is_visible() -> Result<()> {
        let tmp = TempDir::new()?;
        let log_path = tmp.path().join("transaction.log");

        let mut log = TransactionLog::create(&log_path)?;
        log.begin(
            OpKind::Link,
            Path::new("b.py"),
            Some(Path::new("core/src/b.py")),
            PreState::default(),
        )?;
        drop(log); // simulate a crash between intent and outcome

        let replay = read_all(&log_path)?;
        assert_eq!(replay.ops.len(), 1);
        assert_eq!(replay.ops[0].outcome, OpOutcome::IntentOnly);
        Ok(())
    }

    #[test]
    fn torn_trailing_line_is_tolerated() -> Result<()> {
        let tmp = TempDir::new()?;
        let log_path = tmp.path().join("transaction.log");

        let mut log = TransactionLog::create(&log_path)?;
        let seq = log.begin(OpKind::Mkdir, Path::new("docs"), None, PreState::default())?;
        log.commit(seq)?;
        drop(log);

        // Simulate a torn write at the end of the file.
        let mut contents = fs::read_to_string(&log_path)?;
        contents.push_str("{\"kind\":\"intent\",\"seq\":9,\"op\":\"Mo");
        fs::write(&log_path, contents)?;

        let replay = read_all(&log_path)?;
        assert!(replay.truncated_tail);
        assert_eq!(replay.ops.len(), 1);
        Ok(())
    }

    #[test]
    fn completed_reversed_is_newest_first() -> Result<()> {
        let tmp = TempDir::new()?;
        let log_path = tmp.path().join("transaction.log");

        let mut log = TransactionLog::create(&log_path)?;
        for name in ["one", "two", "three"] {
            let seq = log.begin(OpKind::Mkdir, Path::new(name), None, PreState::default())?;
            log.commit(seq)?;
        }

        let replay = read_all(&log_path)?;
        let order: Vec<_> = replay
            .completed_reversed()
            .iter()
            .map(|op| op.source.clone())
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("three"),
                PathBuf::from("two"),
                PathBuf::from("one")
            ]
        );
        Ok(())
    }
}
