//! Append-only, hash-chained audit log with periodic Merkle checkpoints.
//!
//! Every event links to its predecessor by hash, so a single mutated field
//! anywhere in the file breaks the chain from that point forward.
//! Verification always walks from sequence 0 and reports the first broken
//! link rather than just "valid" or "invalid".

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Genesis predecessor hash: 64 zero characters, matching the hex width of
/// both supported digest algorithms.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Number of appended events between automatic Merkle checkpoints.
pub const DEFAULT_CHECKPOINT_WINDOW: u64 = 360;

/// Errors raised while appending to or reading the audit chain.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The underlying file could not be opened, read, or written.
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A line in the log could not be parsed as an event record.
    #[error("malformed record at line {0}")]
    Malformed(u64),
    /// Serialization of a record failed.
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which digest algorithm produced a record's hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    /// BLAKE3, the primary algorithm.
    Blake3,
    /// SHA-256, the documented fallback when BLAKE3 is unavailable.
    Sha256,
}

impl HashAlgo {
    fn digest_hex(self, preimage: &[u8]) -> String {
        match self {
            HashAlgo::Blake3 => blake3::hash(preimage).to_hex().to_string(),
            HashAlgo::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(preimage);
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// One line of the audit log: an event plus its position in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// When the event was appended.
    pub ts: DateTime<Utc>,
    /// Monotonic sequence number, starting at 0.
    pub seq: u64,
    /// Event name (e.g. `"dispatch-start"`, `"kill-triggered"`).
    pub event: String,
    /// Hash of the previous record, or [`GENESIS_HASH`] for `seq == 0`.
    pub prev_hash: String,
    /// Hash of this record.
    pub hash: String,
    /// Algorithm used to produce `hash`.
    pub algo: HashAlgo,
    /// Event-specific fields.
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

/// A Merkle-root checkpoint over a contiguous window of event hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleCheckpoint {
    /// Record type discriminator, always `"merkle_root"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// First sequence number covered by this checkpoint.
    pub first_seq: u64,
    /// Last sequence number covered by this checkpoint.
    pub last_seq: u64,
    /// Number of leaves folded into the root.
    pub event_count: u64,
    /// The computed Merkle root, hex-encoded.
    pub merkle_root: String,
}

fn canonical_preimage(
    ts: DateTime<Utc>,
    seq: u64,
    event: &str,
    prev_hash: &str,
    details: &BTreeMap<String, Value>,
) -> Vec<u8> {
    let mut map: BTreeMap<&str, Value> = BTreeMap::new();
    map.insert("details", serde_json::json!(details));
    map.insert("event", serde_json::json!(event));
    map.insert("prev_hash", serde_json::json!(prev_hash));
    map.insert("seq", serde_json::json!(seq));
    map.insert("ts", serde_json::json!(ts.to_rfc3339()));
    serde_json::to_vec(&map).expect("canonical map always serializes")
}

/// Pairwise Merkle root with duplicate-last-leaf balancing for odd levels.
pub fn merkle_root(algo: HashAlgo, leaves: &[String]) -> String {
    if leaves.is_empty() {
        return GENESIS_HASH.to_owned();
    }
    let mut level: Vec<String> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level.last().expect("non-empty").clone();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let combined = format!("{}{}", pair[0], pair[1]);
                algo.digest_hex(combined.as_bytes())
            })
            .collect();
    }
    level.into_iter().next().expect("non-empty")
}

struct ChainState {
    file: File,
    seq: u64,
    head: String,
    pending_leaves: Vec<String>,
    window_start_seq: u64,
}

/// The append-only, hash-chained event log.
pub struct AuditChain {
    path: PathBuf,
    algo: HashAlgo,
    checkpoint_window: u64,
    state: Mutex<ChainState>,
}

impl AuditChain {
    /// Open (creating if absent) the audit log at `path`.
    ///
    /// If the file's last line is truncated or unparseable, it is dropped
    /// and a `chain-resumed-from-genesis` event is appended recording the
    /// fact — the chain never silently forks.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the file cannot be opened, or
    /// [`AuditError::Malformed`] if a *non-tail* line fails to parse (a
    /// condition this function cannot repair).
    pub fn open(path: impl AsRef<Path>, algo: HashAlgo) -> Result<Self, AuditError> {
        Self::open_with_window(path, algo, DEFAULT_CHECKPOINT_WINDOW)
    }

    /// Like [`Self::open`] but with an explicit checkpoint window, mainly
    /// for tests that want small windows.
    pub fn open_with_window(
        path: impl AsRef<Path>,
        algo: HashAlgo,
        checkpoint_window: u64,
    ) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let read_file = OpenOptions::new().read(true).open(&path);
        let mut resumed_from_malformed_tail = false;
        let mut last_event_seq: Option<(u64, String)> = None;
        let mut window_start_seq = 0u64;
        let mut pending_leaves = Vec::new();
        let mut valid_byte_len: u64 = 0;

        if let Ok(f) = read_file {
            let reader = BufReader::new(&f);
            let mut offset: u64 = 0;
            for line in reader.lines() {
                let line = line?;
                let line_len = line.len() as u64 + 1;
                if line.trim().is_empty() {
                    offset += line_len;
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) if value.get("type").and_then(Value::as_str) == Some("merkle_root") => {
                        offset += line_len;
                        valid_byte_len = offset;
                        pending_leaves.clear();
                        if let Some(last) = value.get("last_seq").and_then(Value::as_u64) {
                            window_start_seq = last + 1;
                        }
                    }
                    Ok(value) => match serde_json::from_value::<EventRecord>(value) {
                        Ok(record) => {
                            offset += line_len;
                            valid_byte_len = offset;
                            pending_leaves.push(record.hash.clone());
                            last_event_seq = Some((record.seq, record.hash));
                        }
                        Err(_) => {
                            resumed_from_malformed_tail = true;
                            break;
                        }
                    },
                    Err(_) => {
                        resumed_from_malformed_tail = true;
                        break;
                    }
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        if resumed_from_malformed_tail {
            file.seek(SeekFrom::Start(valid_byte_len))?;
            file.set_len(valid_byte_len)?;
            file.seek(SeekFrom::End(0))?;
        }

        let (seq, head) = match &last_event_seq {
            Some((seq, hash)) => (seq + 1, hash.clone()),
            None => (0, GENESIS_HASH.to_owned()),
        };

        let chain = Self {
            path,
            algo,
            checkpoint_window,
            state: Mutex::new(ChainState {
                file,
                seq,
                head,
                pending_leaves,
                window_start_seq,
            }),
        };

        if resumed_from_malformed_tail {
            let mut details = HashMap::new();
            details.insert(
                "detail".to_owned(),
                Value::String("tail record was truncated or unparseable; chain resumed from last valid record".to_owned()),
            );
            chain.append("chain-resumed-from-genesis", details)?;
        }

        Ok(chain)
    }

    /// Append a new event, returning the record that was written.
    ///
    /// Write failures are logged but do not prevent the in-memory head from
    /// advancing, so the chain stays internally consistent even if the
    /// on-disk tail is momentarily behind.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialize`] if the record cannot be encoded.
    pub fn append(
        &self,
        event: &str,
        details: HashMap<String, Value>,
    ) -> Result<EventRecord, AuditError> {
        let mut state = self.state.lock().expect("audit chain lock poisoned");
        let ts = Utc::now();
        let seq = state.seq;
        let prev_hash = state.head.clone();
        let details: BTreeMap<String, Value> = details.into_iter().collect();
        let preimage = canonical_preimage(ts, seq, event, &prev_hash, &details);
        let hash = self.algo.digest_hex(&preimage);

        let record = EventRecord {
            ts,
            seq,
            event: event.to_owned(),
            prev_hash,
            hash: hash.clone(),
            algo: self.algo,
            details,
        };

        let line = serde_json::to_string(&record)?;
        if let Err(e) = writeln!(state.file, "{line}").and_then(|()| state.file.flush()) {
            warn!(error = %e, seq, "failed to persist audit record; head still advances in memory");
        }

        state.head = hash;
        state.seq = seq + 1;
        state.pending_leaves.push(record.hash.clone());

        if state.pending_leaves.len() as u64 >= self.checkpoint_window {
            self.write_checkpoint_locked(&mut state)?;
        }

        Ok(record)
    }

    /// Force a Merkle checkpoint over whatever leaves have accumulated
    /// since the last one, even if short of a full window.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialize`] or [`AuditError::Io`] on failure.
    pub fn flush_checkpoint(&self) -> Result<Option<MerkleCheckpoint>, AuditError> {
        let mut state = self.state.lock().expect("audit chain lock poisoned");
        if state.pending_leaves.is_empty() {
            return Ok(None);
        }
        self.write_checkpoint_locked(&mut state)
    }

    fn write_checkpoint_locked(
        &self,
        state: &mut ChainState,
    ) -> Result<Option<MerkleCheckpoint>, AuditError> {
        if state.pending_leaves.is_empty() {
            return Ok(None);
        }
        let event_count = state.pending_leaves.len() as u64;
        let first_seq = state.window_start_seq;
        let last_seq = first_seq + event_count - 1;
        let root = merkle_root(self.algo, &state.pending_leaves);
        let checkpoint = MerkleCheckpoint {
            kind: "merkle_root".to_owned(),
            first_seq,
            last_seq,
            event_count,
            merkle_root: root,
        };
        let line = serde_json::to_string(&checkpoint)?;
        if let Err(e) = writeln!(state.file, "{line}").and_then(|()| state.file.flush()) {
            warn!(error = %e, "failed to persist merkle checkpoint");
        }
        state.pending_leaves.clear();
        state.window_start_seq = last_seq + 1;
        Ok(Some(checkpoint))
    }

    /// Re-read the log from sequence 0 and verify every hash link.
    ///
    /// Returns `(true, None)` if the whole chain is intact, or
    /// `(false, Some(seq))` naming the first sequence number whose hash
    /// does not match its recomputed value (including a broken link from
    /// the previous record).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the file cannot be read.
    pub fn verify(&self) -> Result<(bool, Option<u64>), AuditError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut expected_prev = GENESIS_HASH.to_owned();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if value.get("type").and_then(Value::as_str) == Some("merkle_root") {
                continue;
            }
            let record: EventRecord = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(_) => continue,
            };

            if record.prev_hash != expected_prev {
                return Ok((false, Some(record.seq)));
            }
            let preimage = canonical_preimage(
                record.ts,
                record.seq,
                &record.event,
                &record.prev_hash,
                &record.details,
            );
            let recomputed = record.algo.digest_hex(&preimage);
            if recomputed != record.hash {
                return Ok((false, Some(record.seq)));
            }
            expected_prev = record.hash.clone();
        }

        Ok((true, None))
    }

    /// Current chain head hash, without touching disk.
    #[must_use]
    pub fn head(&self) -> String {
        self.state.lock().expect("audit chain lock poisoned").head.clone()
    }

    /// Next sequence number that will be assigned.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.state.lock().expect("audit chain lock poisoned").seq
    }
}
