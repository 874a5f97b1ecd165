use casefile_media::DEFAULT_JPEG_QUALITY;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (default: $XDG_DATA_HOME/casefile).
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory annotated photos are written to.
    pub photos_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Upper bound on a single vision backend request.
    pub backend_timeout_secs: u64,
    /// JPEG quality for stored photos (1-100).
    pub jpeg_quality: u8,
    /// Whether to load the SCRFD face backend at startup.
    pub face_detection: bool,
}

impl Config {
    /// Load configuration from `CASEFILE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CASEFILE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let db_path = std::env::var("CASEFILE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("cases.db"));

        let photos_dir = std::env::var("CASEFILE_PHOTOS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("photos"));

        let model_dir = std::env::var("CASEFILE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            data_dir,
            db_path,
            photos_dir,
            model_dir,
            backend_timeout_secs: env_u64("CASEFILE_BACKEND_TIMEOUT_SECS", 10),
            jpeg_quality: env_u8("CASEFILE_JPEG_QUALITY", DEFAULT_JPEG_QUALITY),
            face_detection: std::env::var("CASEFILE_FACE_DETECTION")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn face_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("casefile")
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
