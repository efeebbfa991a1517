use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream;
use kestrel_core::EntityId;
use kestrel_ports::{
    EventLog, EventStream, LogError, LogResult, PersistedEvent, Snapshot, check_batch,
};
use std::collections::VecDeque;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What an entity's lock knows about its file
#[derive(Debug, Default)]
struct FileTail {
    /// Last committed sequence and the byte length of the valid prefix.
    /// `None` until the file has been scanned (or after a failed write).
    scanned: Option<(u64, u64)>,
}

/// Event log on the local filesystem
///
/// Each entity gets `<id>.events.jsonl`, one appended batch per line as a
/// JSON array of `PersistedEvent`, and `<id>.snapshot.json` holding its
/// newest snapshot. A batch is written with a single write followed by
/// fsync. Only newline-terminated lines count as committed, so a batch is
/// on disk entirely or not at all: a trailing line without a newline is a
/// torn write that readers ignore and the next append cuts off.
pub struct FileEventLog {
    dir: PathBuf,
    locks: DashMap<EntityId, Arc<Mutex<FileTail>>>,
}

impl FileEventLog {
    /// Open (creating if needed) a log rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> LogResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened file event log");
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn events_path(&self, entity_id: &EntityId) -> PathBuf {
        self.dir.join(format!("{entity_id}.events.jsonl"))
    }

    fn snapshot_path(&self, entity_id: &EntityId) -> PathBuf {
        self.dir.join(format!("{entity_id}.snapshot.json"))
    }

    fn lock_for(&self, entity_id: &EntityId) -> Arc<Mutex<FileTail>> {
        self.locks.entry(entity_id.clone()).or_default().clone()
    }

    /// Find the last sequence and the length of the intact prefix
    async fn scan(&self, entity_id: &EntityId) -> LogResult<(u64, u64)> {
        let bytes = match fs::read(self.events_path(entity_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(e.into()),
        };

        let mut tail = 0;
        let mut valid_len = 0;
        let mut rest = bytes.as_slice();
        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            let line = &rest[..end];
            if !line.iter().all(u8::is_ascii_whitespace) {
                let batch: Vec<PersistedEvent> = serde_json::from_slice(line).map_err(|e| {
                    LogError::Codec(format!("{entity_id} after sequence {tail}: {e}"))
                })?;
                if let Some(last) = batch.last() {
                    tail = last.sequence;
                }
            }
            valid_len += end as u64 + 1;
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            warn!(
                entity_id = %entity_id,
                torn_bytes = rest.len(),
                "Ignoring torn trailing write"
            );
        }
        Ok((tail, valid_len))
    }

    async fn write_batch(
        &self,
        entity_id: &EntityId,
        valid_len: u64,
        events: &[PersistedEvent],
    ) -> LogResult<u64> {
        let mut buf = serde_json::to_vec(events)?;
        buf.push(b'\n');

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.events_path(entity_id))
            .await?;
        let current_len = file.metadata().await?.len();
        if current_len > valid_len {
            debug!(entity_id = %entity_id, valid_len, current_len, "Truncating torn write");
            file.set_len(valid_len).await?;
        }

        let mut file = file;
        file.seek(SeekFrom::Start(valid_len)).await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;
        Ok(valid_len + buf.len() as u64)
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(
        &self,
        entity_id: &EntityId,
        expected_tail: u64,
        events: Vec<PersistedEvent>,
    ) -> LogResult<u64> {
        let lock = self.lock_for(entity_id);
        let mut file_tail = lock.lock().await;

        let (actual, valid_len) = match file_tail.scanned {
            Some(scanned) => scanned,
            None => self.scan(entity_id).await?,
        };
        file_tail.scanned = Some((actual, valid_len));

        if actual != expected_tail {
            return Err(LogError::VersionConflict {
                entity_id: entity_id.to_string(),
                expected: expected_tail,
                actual,
            });
        }
        check_batch(expected_tail, &events)?;

        let new_tail = expected_tail + events.len() as u64;
        match self.write_batch(entity_id, valid_len, &events).await {
            Ok(new_len) => {
                file_tail.scanned = Some((new_tail, new_len));
                Ok(new_tail)
            }
            Err(e) => {
                // Rescan next time; part of the batch may be on disk
                file_tail.scanned = None;
                Err(e)
            }
        }
    }

    async fn read_from(&self, entity_id: &EntityId, after: u64) -> LogResult<EventStream> {
        let file = match File::open(self.events_path(entity_id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(stream::empty().boxed()),
            Err(e) => return Err(e.into()),
        };

        let entity = entity_id.to_string();
        let reader = BufReader::new(file);
        let events = stream::unfold(Some((reader, VecDeque::new())), move |state| {
            let entity = entity.clone();
            async move {
                let (mut reader, mut pending) = state?;
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), Some((reader, pending))));
                    }
                    let mut line = String::new();
                    match reader.read_line(&mut line).await {
                        Ok(0) => return None,
                        Ok(_) if !line.ends_with('\n') => {
                            debug!(entity_id = %entity, "Stopping at torn trailing write");
                            return None;
                        }
                        Ok(_) if line.trim().is_empty() => continue,
                        Ok(_) => match serde_json::from_str::<Vec<PersistedEvent>>(&line) {
                            Ok(batch) => {
                                pending.extend(batch.into_iter().filter(|e| e.sequence > after));
                            }
                            Err(e) => {
                                let err = LogError::Codec(format!("{entity}: {e}"));
                                return Some((Err(err), None));
                            }
                        },
                        Err(e) => return Some((Err(LogError::from(e)), None)),
                    }
                }
            }
        });
        Ok(events.boxed())
    }

    async fn load_latest_snapshot(&self, entity_id: &EntityId) -> LogResult<Option<Snapshot>> {
        match fs::read(self.snapshot_path(entity_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_snapshot(&self, entity_id: &EntityId, snapshot: Snapshot) -> LogResult<()> {
        let lock = self.lock_for(entity_id);
        let _guard = lock.lock().await;

        if let Ok(Some(current)) = self.load_latest_snapshot(entity_id).await
            && current.sequence >= snapshot.sequence
        {
            debug!(
                entity_id = %entity_id,
                stored = current.sequence,
                offered = snapshot.sequence,
                "Keeping newer snapshot"
            );
            return Ok(());
        }

        let path = self.snapshot_path(entity_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&snapshot)?;

        let mut file = File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_data().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
