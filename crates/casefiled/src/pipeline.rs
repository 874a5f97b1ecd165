//! Capture pipeline: raw photo → oriented bitmap → analysis → stored slot.
//!
//! A capture runs inside a session opened for one record. The session hands
//! out slots in capture order and holds a cancellation signal; closing the
//! session aborts in-flight captures before anything is written or recorded.
//!
//! A capture reserves its slot when it starts, so overlapping captures fill
//! consecutive slots. Failure at any step leaves the record's slot reference
//! untouched and hands the slot back for the next capture.

use crate::records::{RecordError, RecordHandle};
use casefile_core::contours::trace_contours;
use casefile_core::face_boxes::detect_face_boxes;
use casefile_core::mesh::draw_face_mesh;
use casefile_core::segmentation::segment_selfie;
use casefile_core::{
    AnalysisMode, BackendError, CaseRecord, SelfieSegmentation, SlotIndex, VisionBackends,
};
use casefile_media::{
    load_and_orient, scale_to_fit, unique_photo_path, AnnotatedImageWriter, DecodeError,
    WriteError,
};
use image::{ImageFormat, RgbaImage};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to decode photo: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to store photo: {0}")]
    Write(#[from] WriteError),
    #[error("record store: {0}")]
    Store(RecordError),
    #[error("no capture session open for record {0}")]
    NoSession(Uuid),
    #[error("record not found: {0}")]
    RecordNotFound(Uuid),
    #[error("record {record} has no photo in slot {slot}")]
    EmptySlot { record: Uuid, slot: SlotIndex },
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl From<RecordError> for CaptureError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::NotFound(id) => CaptureError::RecordNotFound(id),
            other => CaptureError::Store(other),
        }
    }
}

impl From<tokio::task::JoinError> for CaptureError {
    fn from(e: tokio::task::JoinError) -> Self {
        CaptureError::Worker(e.to_string())
    }
}

/// How a capture ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Photo written and referenced from the record.
    Stored {
        slot: SlotIndex,
        file_name: String,
        summary: Option<String>,
    },
    /// Segmentation found almost no foreground; nothing written.
    NonMatch { slot: SlotIndex },
    /// The vision backend failed, timed out, or is missing; nothing written.
    Skipped { slot: SlotIndex, reason: String },
    /// The session closed while the capture was in flight.
    Cancelled,
}

/// Notifications for views showing a record.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    PhotoUpdated {
        record_id: Uuid,
        slot: SlotIndex,
        file_name: String,
    },
    NonMatch {
        record_id: Uuid,
        slot: SlotIndex,
    },
    Skipped {
        record_id: Uuid,
        slot: SlotIndex,
        reason: String,
    },
}

struct Session {
    generation: u64,
    /// First slot never handed out.
    next: SlotIndex,
    /// Slots given back by captures that stored nothing.
    returned: BTreeSet<SlotIndex>,
    cancel: watch::Sender<bool>,
}

impl Session {
    fn new(generation: u64) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            generation,
            next: SlotIndex::FIRST,
            returned: BTreeSet::new(),
            cancel,
        }
    }

    /// Slot the next capture will fill.
    fn peek(&self) -> SlotIndex {
        self.returned.first().copied().unwrap_or(self.next)
    }

    fn reserve(&mut self) -> SlotIndex {
        if let Some(slot) = self.returned.pop_first() {
            return slot;
        }
        let slot = self.next;
        self.next = slot.advance();
        slot
    }

    fn release(&mut self, slot: SlotIndex) {
        self.returned.insert(slot);
    }
}

/// Result of running the record's analysis mode on a bitmap.
enum Analysis {
    Annotated {
        image: RgbaImage,
        summary: Option<String>,
    },
    NonMatch,
}

type SlotLock = Arc<tokio::sync::Mutex<()>>;

struct Inner {
    records: RecordHandle,
    backends: VisionBackends,
    writer: AnnotatedImageWriter,
    photos_dir: PathBuf,
    backend_timeout: Duration,
    sessions: Mutex<HashMap<Uuid, Session>>,
    slot_locks: Mutex<HashMap<(Uuid, SlotIndex), SlotLock>>,
    /// Serializes name selection with the write that claims the name.
    naming: Arc<Mutex<()>>,
    next_generation: AtomicU64,
    events: broadcast::Sender<CaptureEvent>,
}

/// Clone-safe handle to the capture pipeline.
#[derive(Clone)]
pub struct CapturePipeline {
    inner: Arc<Inner>,
}

impl CapturePipeline {
    pub fn new(
        records: RecordHandle,
        backends: VisionBackends,
        writer: AnnotatedImageWriter,
        photos_dir: PathBuf,
        backend_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                records,
                backends,
                writer,
                photos_dir,
                backend_timeout,
                sessions: Mutex::new(HashMap::new()),
                slot_locks: Mutex::new(HashMap::new()),
                naming: Arc::new(Mutex::new(())),
                next_generation: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn records(&self) -> &RecordHandle {
        &self.inner.records
    }

    pub fn backends(&self) -> &VisionBackends {
        &self.inner.backends
    }

    pub fn photos_dir(&self) -> &Path {
        &self.inner.photos_dir
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.inner.events.subscribe()
    }

    /// Open a capture session on `record_id`, starting at the first slot.
    ///
    /// An existing session for the record is cancelled and replaced.
    pub async fn open_session(&self, record_id: Uuid) -> Result<SlotIndex, CaptureError> {
        self.inner.records.load(record_id).await?;

        let session = Session::new(self.inner.next_generation.fetch_add(1, Ordering::Relaxed));
        if let Some(previous) = self.lock_sessions().insert(record_id, session) {
            previous.cancel.send_replace(true);
        }
        tracing::info!(record = %record_id, "capture session opened");
        Ok(SlotIndex::FIRST)
    }

    /// Close the session on `record_id`, cancelling in-flight captures.
    pub fn close_session(&self, record_id: Uuid) -> bool {
        let Some(session) = self.lock_sessions().remove(&record_id) else {
            return false;
        };
        session.cancel.send_replace(true);
        tracing::info!(record = %record_id, "capture session closed");
        true
    }

    /// Slot the next capture on `record_id` will fill.
    pub fn session_slot(&self, record_id: Uuid) -> Option<SlotIndex> {
        self.lock_sessions().get(&record_id).map(Session::peek)
    }

    /// Process the photo at `raw_path` into the next free slot of the session.
    ///
    /// The raw file is only read; the caller owns it.
    pub async fn capture(
        &self,
        record_id: Uuid,
        raw_path: &Path,
    ) -> Result<CaptureOutcome, CaptureError> {
        let (generation, slot, cancel) = {
            let mut sessions = self.lock_sessions();
            let session = sessions
                .get_mut(&record_id)
                .ok_or(CaptureError::NoSession(record_id))?;
            (session.generation, session.reserve(), session.cancel.subscribe())
        };

        let result = self.capture_into(record_id, slot, cancel, raw_path).await;
        self.prune_slot_lock(record_id, slot);
        if !matches!(result, Ok(CaptureOutcome::Stored { .. })) {
            self.release_slot(record_id, generation, slot);
        }
        result
    }

    async fn capture_into(
        &self,
        record_id: Uuid,
        slot: SlotIndex,
        mut cancel: watch::Receiver<bool>,
        raw_path: &Path,
    ) -> Result<CaptureOutcome, CaptureError> {
        let _slot_guard = self.slot_lock(record_id, slot).lock_owned().await;
        if is_cancelled(&cancel) {
            return Ok(CaptureOutcome::Cancelled);
        }

        let record = self.inner.records.load(record_id).await?;
        tracing::info!(record = %record_id, %slot, mode = %record.mode, "capture started");

        let raw = raw_path.to_path_buf();
        let source = Arc::new(tokio::task::spawn_blocking(move || load_and_orient(&raw)).await??);

        let timeout = self.inner.backend_timeout;
        let analysis = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => {
                tracing::info!(record = %record_id, %slot, "capture cancelled during analysis");
                return Ok(CaptureOutcome::Cancelled);
            }
            result = tokio::time::timeout(timeout, analyze(&self.inner.backends, record.mode, source)) => {
                result.unwrap_or(Err(BackendError::Timeout(timeout)))
            }
        };

        let (image, summary) = match analysis {
            Ok(Analysis::Annotated { image, summary }) => (image, summary),
            Ok(Analysis::NonMatch) => {
                tracing::info!(record = %record_id, %slot, "no foreground found; photo discarded");
                self.publish(CaptureEvent::NonMatch { record_id, slot });
                return Ok(CaptureOutcome::NonMatch { slot });
            }
            Err(e) => {
                tracing::warn!(record = %record_id, %slot, mode = %record.mode, error = %e, "analysis skipped");
                let reason = e.to_string();
                self.publish(CaptureEvent::Skipped {
                    record_id,
                    slot,
                    reason: reason.clone(),
                });
                return Ok(CaptureOutcome::Skipped { slot, reason });
            }
        };

        if is_cancelled(&cancel) {
            return Ok(CaptureOutcome::Cancelled);
        }

        let (file_name, path) = self.persist(image).await?;

        if is_cancelled(&cancel) {
            remove_photo(&path);
            return Ok(CaptureOutcome::Cancelled);
        }

        let stored_name = file_name.clone();
        let stored_summary = summary.clone();
        let update = match self
            .inner
            .records
            .update(record_id, move |r| {
                r.photos.set(slot, stored_name);
                if let Some(summary) = stored_summary {
                    r.detection_summary = summary;
                }
            })
            .await
        {
            Ok(update) => update,
            Err(e) => {
                remove_photo(&path);
                return Err(e.into());
            }
        };

        if let Some(old) = update.before.photos.get(slot) {
            if old != file_name {
                remove_photo(&self.inner.photos_dir.join(old));
            }
        }

        tracing::info!(record = %record_id, %slot, file = %file_name, "photo stored");
        self.publish(CaptureEvent::PhotoUpdated {
            record_id,
            slot,
            file_name: file_name.clone(),
        });

        Ok(CaptureOutcome::Stored {
            slot,
            file_name,
            summary,
        })
    }

    /// PNG of the photo in `slot`, shrunk to fit `max_width` × `max_height`.
    pub async fn preview(
        &self,
        record_id: Uuid,
        slot: SlotIndex,
        max_width: u32,
        max_height: u32,
    ) -> Result<Vec<u8>, CaptureError> {
        let record = self.inner.records.load(record_id).await?;
        let file_name = record.photos.get(slot).ok_or(CaptureError::EmptySlot {
            record: record_id,
            slot,
        })?;
        let path = self.inner.photos_dir.join(file_name);

        let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CaptureError> {
            let scaled = scale_to_fit(&path, max_width, max_height)?;
            let mut png = Vec::new();
            scaled
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(WriteError::from)?;
            Ok(png)
        })
        .await??;
        Ok(png)
    }

    /// Delete a record along with its session and photo files.
    pub async fn delete_record(&self, record_id: Uuid) -> Result<CaseRecord, CaptureError> {
        self.close_session(record_id);
        let record = self.inner.records.delete(record_id).await?;
        for (_, file_name) in record.photos.iter() {
            remove_photo(&self.inner.photos_dir.join(file_name));
        }
        Ok(record)
    }

    async fn persist(&self, image: RgbaImage) -> Result<(String, PathBuf), CaptureError> {
        let writer = self.inner.writer;
        let dir = self.inner.photos_dir.clone();
        let naming = Arc::clone(&self.inner.naming);

        let written = tokio::task::spawn_blocking(move || -> Result<_, WriteError> {
            let _claim = naming.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let (file_name, path) = unique_photo_path(&dir, &chrono::Local::now());
            let persisted = writer.persist(&image, &path)?;
            tracing::debug!(path = %persisted.path.display(), bytes = persisted.bytes, "photo written");
            Ok((file_name, path))
        })
        .await??;
        Ok(written)
    }

    /// Hand `slot` back to the session that reserved it, if still open.
    fn release_slot(&self, record_id: Uuid, generation: u64, slot: SlotIndex) {
        if let Some(session) = self.lock_sessions().get_mut(&record_id) {
            if session.generation == generation {
                session.release(slot);
            }
        }
    }

    fn slot_lock(&self, record_id: Uuid, slot: SlotIndex) -> SlotLock {
        Arc::clone(self.lock_slot_locks().entry((record_id, slot)).or_default())
    }

    /// Drop the slot's lock once no capture holds or waits on it.
    fn prune_slot_lock(&self, record_id: Uuid, slot: SlotIndex) {
        let mut locks = self.lock_slot_locks();
        let key = (record_id, slot);
        // clones are only taken under this map lock
        if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }
    }

    fn publish(&self, event: CaptureEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_slot_locks(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, SlotIndex), SlotLock>> {
        self.inner
            .slot_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run the single operation selected by `mode`.
async fn analyze(
    backends: &VisionBackends,
    mode: AnalysisMode,
    source: Arc<RgbaImage>,
) -> Result<Analysis, BackendError> {
    let annotated = |image| Analysis::Annotated {
        image,
        summary: None,
    };
    match mode {
        AnalysisMode::None => Ok(annotated(
            Arc::try_unwrap(source).unwrap_or_else(|shared| (*shared).clone()),
        )),
        AnalysisMode::Face => {
            let boxes = detect_face_boxes(backends.face()?, source).await?;
            Ok(Analysis::Annotated {
                summary: Some(boxes.summary()),
                image: boxes.image,
            })
        }
        AnalysisMode::Contour => Ok(annotated(trace_contours(backends.contour()?, source).await?)),
        AnalysisMode::Mesh => Ok(annotated(draw_face_mesh(backends.mesh()?, source).await?)),
        AnalysisMode::Selfie => match segment_selfie(backends.segmentation()?, source).await? {
            SelfieSegmentation::Foreground(image) => Ok(annotated(image)),
            SelfieSegmentation::NonMatch { .. } => Ok(Analysis::NonMatch),
        },
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    let flagged = *cancel.borrow();
    flagged || cancel.has_changed().is_err()
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    // Err means the session was dropped, which also ends the capture
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

fn remove_photo(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "photo removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove photo"),
    }
}
