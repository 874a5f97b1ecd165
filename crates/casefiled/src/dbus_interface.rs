use crate::pipeline::{CaptureError, CaptureEvent, CapturePipeline};
use crate::records::RecordError;
use casefile_core::{AnalysisMode, CaseRecord, SlotIndex};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use uuid::Uuid;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.casefile.Casefile1";
pub const OBJECT_PATH: &str = "/org/casefile/Casefile1";

/// D-Bus interface for the Casefile daemon.
///
/// Bus name: org.casefile.Casefile1
/// Object path: /org/casefile/Casefile1
pub struct CasefileService {
    pipeline: CapturePipeline,
    db_path: PathBuf,
}

impl CasefileService {
    pub fn new(pipeline: CapturePipeline, db_path: PathBuf) -> Self {
        Self { pipeline, db_path }
    }

    async fn edit(
        &self,
        id: &str,
        edit: impl FnOnce(&mut CaseRecord) + Send + 'static,
    ) -> fdo::Result<String> {
        let id = parse_id(id)?;
        let update = self
            .pipeline
            .records()
            .update(id, edit)
            .await
            .map_err(record_error)?;
        to_json(&update.after)
    }
}

#[interface(name = "org.casefile.Casefile1")]
impl CasefileService {
    /// Create an empty record dated now; returns its id.
    async fn create_record(&self, title: &str) -> fdo::Result<String> {
        let record = self
            .pipeline
            .records()
            .create(CaseRecord::new(title))
            .await
            .map_err(record_error)?;
        tracing::info!(record = %record.id, "record created");
        Ok(record.id.to_string())
    }

    /// All records as a JSON array, newest first.
    async fn list_records(&self) -> fdo::Result<String> {
        let records = self.pipeline.records().list().await.map_err(record_error)?;
        to_json(&records)
    }

    async fn get_record(&self, id: &str) -> fdo::Result<String> {
        let record = self
            .pipeline
            .records()
            .load(parse_id(id)?)
            .await
            .map_err(record_error)?;
        to_json(&record)
    }

    async fn set_title(&self, id: &str, title: &str) -> fdo::Result<String> {
        let title = title.to_string();
        self.edit(id, move |r| r.title = title).await
    }

    /// Accepts RFC 3339 or a plain `YYYY-MM-DD` (midnight UTC).
    async fn set_date(&self, id: &str, date: &str) -> fdo::Result<String> {
        let date = parse_date(date)?;
        self.edit(id, move |r| r.date = date).await
    }

    async fn set_solved(&self, id: &str, solved: bool) -> fdo::Result<String> {
        self.edit(id, move |r| r.solved = solved).await
    }

    async fn set_suspect(&self, id: &str, suspect: &str) -> fdo::Result<String> {
        let suspect = suspect.to_string();
        self.edit(id, move |r| r.suspect = suspect).await
    }

    /// Check or uncheck an analysis mode.
    async fn set_mode(&self, id: &str, mode: &str, checked: bool) -> fdo::Result<String> {
        let mode: AnalysisMode = mode
            .parse()
            .map_err(|e| fdo::Error::InvalidArgs(format!("{e}")))?;
        self.edit(id, move |r| r.set_mode_flag(mode, checked)).await
    }

    async fn report(&self, id: &str) -> fdo::Result<String> {
        let record = self
            .pipeline
            .records()
            .load(parse_id(id)?)
            .await
            .map_err(record_error)?;
        Ok(record.report())
    }

    /// Delete a record and its photos.
    async fn delete_record(&self, id: &str) -> fdo::Result<bool> {
        let id = parse_id(id)?;
        self.pipeline.delete_record(id).await.map_err(capture_error)?;
        tracing::info!(record = %id, "record deleted");
        Ok(true)
    }

    /// Open a capture session; returns the first slot index.
    async fn open_session(&self, id: &str) -> fdo::Result<u32> {
        let slot = self
            .pipeline
            .open_session(parse_id(id)?)
            .await
            .map_err(capture_error)?;
        Ok(slot.get() as u32)
    }

    async fn close_session(&self, id: &str) -> fdo::Result<bool> {
        Ok(self.pipeline.close_session(parse_id(id)?))
    }

    /// Slot the next capture will fill.
    async fn session_slot(&self, id: &str) -> fdo::Result<u32> {
        let id = parse_id(id)?;
        self.pipeline
            .session_slot(id)
            .map(|slot| slot.get() as u32)
            .ok_or_else(|| capture_error(CaptureError::NoSession(id)))
    }

    /// Process a captured photo file into the session's current slot.
    ///
    /// Returns the capture outcome as JSON.
    async fn capture(&self, id: &str, photo_path: &str) -> fdo::Result<String> {
        let outcome = self
            .pipeline
            .capture(parse_id(id)?, Path::new(photo_path))
            .await
            .map_err(capture_error)?;
        to_json(&outcome)
    }

    /// PNG bytes of a slot's photo scaled to fit the given bounds.
    async fn preview(
        &self,
        id: &str,
        slot: u32,
        max_width: u32,
        max_height: u32,
    ) -> fdo::Result<Vec<u8>> {
        let slot = SlotIndex::new(slot as usize)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("slot {slot} out of range")))?;
        self.pipeline
            .preview(parse_id(id)?, slot, max_width, max_height)
            .await
            .map_err(capture_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backends": self.pipeline.backends().available(),
            "photos_dir": self.pipeline.photos_dir().display().to_string(),
            "db_path": self.db_path.display().to_string(),
        })
        .to_string())
    }

    /// A slot now points at a newly stored photo.
    #[zbus(signal)]
    async fn photo_updated(
        emitter: &SignalEmitter<'_>,
        record_id: &str,
        slot: u32,
        file_name: &str,
    ) -> zbus::Result<()>;

    /// A capture finished without storing a photo.
    #[zbus(signal)]
    async fn capture_discarded(
        emitter: &SignalEmitter<'_>,
        record_id: &str,
        slot: u32,
        reason: &str,
    ) -> zbus::Result<()>;
}

/// Forward pipeline events as D-Bus signals until the pipeline goes away.
pub async fn forward_events(
    emitter: SignalEmitter<'static>,
    mut events: broadcast::Receiver<CaptureEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "signal forwarder lagged behind capture events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let sent = match &event {
            CaptureEvent::PhotoUpdated {
                record_id,
                slot,
                file_name,
            } => {
                CasefileService::photo_updated(
                    &emitter,
                    &record_id.to_string(),
                    slot.get() as u32,
                    file_name,
                )
                .await
            }
            CaptureEvent::NonMatch { record_id, slot } => {
                CasefileService::capture_discarded(
                    &emitter,
                    &record_id.to_string(),
                    slot.get() as u32,
                    "no foreground",
                )
                .await
            }
            CaptureEvent::Skipped {
                record_id,
                slot,
                reason,
            } => {
                CasefileService::capture_discarded(
                    &emitter,
                    &record_id.to_string(),
                    slot.get() as u32,
                    reason,
                )
                .await
            }
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, ?event, "failed to emit signal");
        }
    }
}

fn parse_id(id: &str) -> fdo::Result<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|e| fdo::Error::InvalidArgs(format!("bad record id {id:?}: {e}")))
}

fn parse_date(date: &str) -> fdo::Result<DateTime<Utc>> {
    let date = date.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(date) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| fdo::Error::InvalidArgs(format!("bad date {date:?}: expected RFC 3339 or YYYY-MM-DD")))
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn record_error(e: RecordError) -> fdo::Error {
    match e {
        RecordError::NotFound(_) => fdo::Error::InvalidArgs(e.to_string()),
        other => {
            tracing::error!(error = %other, "record request failed");
            fdo::Error::Failed(other.to_string())
        }
    }
}

fn capture_error(e: CaptureError) -> fdo::Error {
    match e {
        CaptureError::NoSession(_) | CaptureError::RecordNotFound(_) | CaptureError::EmptySlot { .. } => {
            fdo::Error::InvalidArgs(e.to_string())
        }
        other => {
            tracing::warn!(error = %other, "capture request failed");
            fdo::Error::Failed(other.to_string())
        }
    }
}
