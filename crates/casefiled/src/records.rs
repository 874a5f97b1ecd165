//! Single-writer queue in front of the record store.
//!
//! One OS thread owns the SQLite connection and applies requests in arrival
//! order. An update is read-current → transform → save inside that thread, so
//! concurrent edits of different fields (or different photo slots) of the same
//! record never overwrite each other.

use crate::store::{RecordStore, StoreError};
use casefile_core::CaseRecord;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("record not found: {0}")]
    NotFound(Uuid),
    #[error("failed to spawn record thread: {0}")]
    Spawn(std::io::Error),
    #[error("record thread exited")]
    ChannelClosed,
}

/// In-place edit applied to the current stored record.
pub type RecordTransform = Box<dyn FnOnce(&mut CaseRecord) + Send>;

/// A record before and after an update.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub before: CaseRecord,
    pub after: CaseRecord,
}

/// Messages sent to the record thread.
enum RecordRequest {
    Create {
        record: CaseRecord,
        reply: oneshot::Sender<Result<CaseRecord, RecordError>>,
    },
    Load {
        id: Uuid,
        reply: oneshot::Sender<Result<CaseRecord, RecordError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<CaseRecord>, RecordError>>,
    },
    Update {
        id: Uuid,
        transform: RecordTransform,
        reply: oneshot::Sender<Result<RecordUpdate, RecordError>>,
    },
    Delete {
        id: Uuid,
        reply: oneshot::Sender<Result<CaseRecord, RecordError>>,
    },
}

/// Clone-safe handle to the record thread.
#[derive(Clone)]
pub struct RecordHandle {
    tx: mpsc::Sender<RecordRequest>,
}

impl RecordHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RecordError>>) -> RecordRequest,
    ) -> Result<T, RecordError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RecordError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RecordError::ChannelClosed)?
    }

    /// Store a new record and return it.
    pub async fn create(&self, record: CaseRecord) -> Result<CaseRecord, RecordError> {
        self.request(|reply| RecordRequest::Create { record, reply }).await
    }

    pub async fn load(&self, id: Uuid) -> Result<CaseRecord, RecordError> {
        self.request(|reply| RecordRequest::Load { id, reply }).await
    }

    /// All records, newest first.
    pub async fn list(&self) -> Result<Vec<CaseRecord>, RecordError> {
        self.request(|reply| RecordRequest::List { reply }).await
    }

    /// Apply `transform` to the current stored copy of record `id` and save it.
    pub async fn update(
        &self,
        id: Uuid,
        transform: impl FnOnce(&mut CaseRecord) + Send + 'static,
    ) -> Result<RecordUpdate, RecordError> {
        let transform: RecordTransform = Box::new(transform);
        self.request(|reply| RecordRequest::Update {
            id,
            transform,
            reply,
        })
        .await
    }

    /// Remove a record, returning its last stored state.
    pub async fn delete(&self, id: Uuid) -> Result<CaseRecord, RecordError> {
        self.request(|reply| RecordRequest::Delete { id, reply }).await
    }
}

/// Spawn the record thread, which takes ownership of `store`.
pub fn spawn_records(store: RecordStore) -> Result<RecordHandle, RecordError> {
    let (tx, mut rx) = mpsc::channel::<RecordRequest>(32);

    std::thread::Builder::new()
        .name("casefile-records".into())
        .spawn(move || {
            tracing::info!("record thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    RecordRequest::Create { record, reply } => {
                        let result = store.create(&record).map(|()| record).map_err(Into::into);
                        let _ = reply.send(result);
                    }
                    RecordRequest::Load { id, reply } => {
                        let _ = reply.send(load_existing(&store, id));
                    }
                    RecordRequest::List { reply } => {
                        let _ = reply.send(store.list().map_err(Into::into));
                    }
                    RecordRequest::Update {
                        id,
                        transform,
                        reply,
                    } => {
                        let _ = reply.send(run_update(&store, id, transform));
                    }
                    RecordRequest::Delete { id, reply } => {
                        let result = store
                            .delete(id)
                            .map_err(RecordError::from)
                            .and_then(|r| r.ok_or(RecordError::NotFound(id)));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("record thread exiting");
        })
        .map_err(RecordError::Spawn)?;

    Ok(RecordHandle { tx })
}

fn load_existing(store: &RecordStore, id: Uuid) -> Result<CaseRecord, RecordError> {
    store.load(id)?.ok_or(RecordError::NotFound(id))
}

fn run_update(
    store: &RecordStore,
    id: Uuid,
    transform: RecordTransform,
) -> Result<RecordUpdate, RecordError> {
    let before = load_existing(store, id)?;
    let mut after = before.clone();
    transform(&mut after);
    // the id is the row key; a transform must not move the record
    after.id = before.id;

    if after != before && !store.save(&after)? {
        return Err(RecordError::NotFound(id));
    }
    tracing::debug!(record = %id, "record updated");
    Ok(RecordUpdate { before, after })
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefile_core::{AnalysisMode, SlotIndex};

    fn handle() -> RecordHandle {
        spawn_records(RecordStore::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_create_load_list() {
        let records = handle();
        let created = records.create(CaseRecord::new("Graffiti")).await.unwrap();

        assert_eq!(records.load(created.id).await.unwrap(), created);
        assert_eq!(records.list().await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let records = handle();
        let id = Uuid::new_v4();
        assert!(matches!(records.load(id).await, Err(RecordError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_update_returns_before_and_after() {
        let records = handle();
        let created = records.create(CaseRecord::new("t")).await.unwrap();

        let update = records
            .update(created.id, |r| r.set_mode_flag(AnalysisMode::Face, true))
            .await
            .unwrap();

        assert_eq!(update.before.mode, AnalysisMode::None);
        assert_eq!(update.after.mode, AnalysisMode::Face);
        assert_eq!(records.load(created.id).await.unwrap(), update.after);
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let records = handle();
        let created = records.create(CaseRecord::new("t")).await.unwrap();

        let update = records
            .update(created.id, |r| r.id = Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(update.after.id, created.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_slot_updates_are_not_lost() {
        let records = handle();
        let created = records.create(CaseRecord::new("t")).await.unwrap();

        let tasks: Vec<_> = SlotIndex::all()
            .map(|slot| {
                let records = records.clone();
                tokio::spawn(async move {
                    records
                        .update(created.id, move |r| {
                            r.photos.set(slot, format!("IMG_{slot}.JPG"));
                        })
                        .await
                })
            })
            .collect();
        let suspect_edit = {
            let records = records.clone();
            tokio::spawn(async move { records.update(created.id, |r| r.suspect = "Sam".into()).await })
        };
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        suspect_edit.await.unwrap().unwrap();

        let stored = records.load(created.id).await.unwrap();
        assert_eq!(stored.suspect, "Sam");
        for slot in SlotIndex::all() {
            assert_eq!(stored.photos.get(slot), Some(format!("IMG_{slot}.JPG").as_str()));
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let records = handle();
        let created = records.create(CaseRecord::new("t")).await.unwrap();

        assert_eq!(records.delete(created.id).await.unwrap(), created);
        assert!(matches!(
            records.delete(created.id).await,
            Err(RecordError::NotFound(_))
        ));
    }
}
