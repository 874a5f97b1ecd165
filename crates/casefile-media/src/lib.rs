//! casefile-media: photo file I/O for the capture pipeline.
//!
//! Decodes captured photos with EXIF orientation applied, produces
//! display-sized previews, and persists annotated bitmaps as JPEG with
//! write-to-temp-then-rename semantics.

pub mod codec;
pub mod naming;
pub mod writer;

pub use codec::{load_and_orient, scale_to_fit, DecodeError, Rotation};
pub use naming::{photo_file_name, unique_photo_path};
pub use writer::{AnnotatedImageWriter, PersistedImage, WriteError, DEFAULT_JPEG_QUALITY};
