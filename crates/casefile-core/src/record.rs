//! Case records, the user-entered incident entries photos attach to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Number of photo slots per record.
pub const PHOTO_SLOT_COUNT: usize = 4;

const REPORT_DATE_FORMAT: &str = "%a, %b, %d";

/// Which vision operation runs on newly captured photos.
///
/// A single field, so at most one analysis is ever selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    None,
    Face,
    Mesh,
    Contour,
    Selfie,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 5] = [
        AnalysisMode::None,
        AnalysisMode::Face,
        AnalysisMode::Mesh,
        AnalysisMode::Contour,
        AnalysisMode::Selfie,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::None => "none",
            AnalysisMode::Face => "face",
            AnalysisMode::Mesh => "mesh",
            AnalysisMode::Contour => "contour",
            AnalysisMode::Selfie => "selfie",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown analysis mode: {0} (expected none, face, mesh, contour, or selfie)")]
pub struct ParseModeError(String);

impl FromStr for AnalysisMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

/// Index of one of the four photo slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub const FIRST: SlotIndex = SlotIndex(0);
    pub const LAST: SlotIndex = SlotIndex(PHOTO_SLOT_COUNT as u8 - 1);

    pub fn new(index: usize) -> Option<Self> {
        (index < PHOTO_SLOT_COUNT).then_some(SlotIndex(index as u8))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Next slot, staying on the last slot once reached.
    pub fn advance(self) -> Self {
        if self == Self::LAST {
            self
        } else {
            SlotIndex(self.0 + 1)
        }
    }

    pub fn all() -> impl Iterator<Item = SlotIndex> {
        (0..PHOTO_SLOT_COUNT as u8).map(SlotIndex)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for SlotIndex {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        SlotIndex::new(value).ok_or_else(|| format!("slot {value} out of range 0..{PHOTO_SLOT_COUNT}"))
    }
}

impl From<SlotIndex> for usize {
    fn from(slot: SlotIndex) -> usize {
        slot.get()
    }
}

/// Photo file names attached to a record, one optional entry per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSlots([Option<String>; PHOTO_SLOT_COUNT]);

impl PhotoSlots {
    pub fn get(&self, slot: SlotIndex) -> Option<&str> {
        self.0[slot.get()].as_deref()
    }

    /// Point `slot` at `file_name`, returning the file it replaced.
    pub fn set(&mut self, slot: SlotIndex, file_name: impl Into<String>) -> Option<String> {
        self.0[slot.get()].replace(file_name.into())
    }

    pub fn clear(&mut self, slot: SlotIndex) -> Option<String> {
        self.0[slot.get()].take()
    }

    /// `(slot, file_name)` for every occupied slot.
    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &str)> {
        SlotIndex::all().filter_map(move |slot| self.get(slot).map(|name| (slot, name)))
    }

    pub fn as_array(&self) -> &[Option<String>; PHOTO_SLOT_COUNT] {
        &self.0
    }
}

impl From<[Option<String>; PHOTO_SLOT_COUNT]> for PhotoSlots {
    fn from(slots: [Option<String>; PHOTO_SLOT_COUNT]) -> Self {
        PhotoSlots(slots)
    }
}

/// A case record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub solved: bool,
    pub mode: AnalysisMode,
    pub suspect: String,
    pub photos: PhotoSlots,
    /// Synopsis of the most recent analysis, e.g. "2 face(s) detected".
    pub detection_summary: String,
}

impl CaseRecord {
    /// A fresh, empty record dated now.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            date: Utc::now(),
            solved: false,
            mode: AnalysisMode::None,
            suspect: String::new(),
            photos: PhotoSlots::default(),
            detection_summary: String::new(),
        }
    }

    /// Checkbox-style mode toggle.
    ///
    /// Checking a mode selects it (clearing any other); unchecking the active
    /// mode selects `None`; unchecking an inactive mode changes nothing.
    pub fn set_mode_flag(&mut self, mode: AnalysisMode, checked: bool) {
        if checked {
            self.mode = mode;
        } else if self.mode == mode {
            self.mode = AnalysisMode::None;
        }
    }

    /// Plain-text report suitable for sharing.
    pub fn report(&self) -> String {
        let solved = if self.solved {
            "The case is solved"
        } else {
            "The case is not solved"
        };
        let suspect = if self.suspect.trim().is_empty() {
            "there is no suspect.".to_string()
        } else {
            format!("the suspect is {}.", self.suspect)
        };
        format!(
            "{}! The crime was discovered on {}. {}, and {}",
            self.title,
            self.date.format(REPORT_DATE_FORMAT),
            solved,
            suspect
        )
    }
}
