use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::worker::{
    CameraConfig, DEFAULT_CONF_THRESHOLD, DEFAULT_INFER_INTERVAL, DEFAULT_SUPPRESSION_WINDOW,
};
use crate::pipeline::DEFAULT_AGGREGATION_PERIOD;

const DEFAULT_DB_PATH: &str = "skyshield.db";
const DEFAULT_THUMBNAIL_DIR: &str = "thumbnails";
const DEFAULT_CAMERA_NAME: &str = "front";
const DEFAULT_CAMERA_SOURCE: &str = "synthetic://front";

#[derive(Debug, Deserialize, Default)]
struct SkyshieldConfigFile {
    db_path: Option<String>,
    thumbnail_dir: Option<PathBuf>,
    incident_interval_secs: Option<f64>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    id: Option<i64>,
    name: Option<String>,
    source: Option<String>,
    enabled: Option<bool>,
    conf_threshold: Option<f32>,
    infer_interval_secs: Option<f64>,
    suppression_window_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SkyshieldConfig {
    pub db_path: String,
    pub thumbnail_dir: PathBuf,
    pub incident_interval: Duration,
    pub cameras: Vec<CameraConfig>,
}

impl SkyshieldConfig {
    /// Load from the file named by `SKYSHIELD_CONFIG` (JSON, all fields
    /// optional), then apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SKYSHIELD_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SkyshieldConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SkyshieldConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let thumbnail_dir = file
            .thumbnail_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_THUMBNAIL_DIR));
        let incident_interval = match file.incident_interval_secs {
            Some(secs) => duration_from_secs("incident_interval_secs", secs)?,
            None => DEFAULT_AGGREGATION_PERIOD,
        };
        let camera_files = file.cameras.unwrap_or_else(|| {
            vec![CameraConfigFile {
                name: Some(DEFAULT_CAMERA_NAME.to_string()),
                source: Some(DEFAULT_CAMERA_SOURCE.to_string()),
                ..CameraConfigFile::default()
            }]
        });
        let mut cameras = Vec::with_capacity(camera_files.len());
        for (index, camera) in camera_files.into_iter().enumerate() {
            cameras.push(camera_from_file(index, camera)?);
        }
        Ok(Self {
            db_path,
            thumbnail_dir,
            incident_interval,
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SKYSHIELD_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SKYSHIELD_THUMBNAIL_DIR") {
            if !dir.trim().is_empty() {
                self.thumbnail_dir = PathBuf::from(dir);
            }
        }
        if let Ok(interval) = std::env::var("SKYSHIELD_INCIDENT_INTERVAL_SECS") {
            let secs: f64 = interval.parse().map_err(|_| {
                anyhow!("SKYSHIELD_INCIDENT_INTERVAL_SECS must be a number of seconds")
            })?;
            self.incident_interval = duration_from_secs("SKYSHIELD_INCIDENT_INTERVAL_SECS", secs)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(anyhow!("camera {}: name must not be empty", camera.id));
            }
            if camera.source.trim().is_empty() {
                return Err(anyhow!("camera {}: source must not be empty", camera.id));
            }
            if !(0.0..=1.0).contains(&camera.conf_threshold) {
                return Err(anyhow!(
                    "camera {}: conf_threshold must be within [0, 1], got {}",
                    camera.id,
                    camera.conf_threshold
                ));
            }
            if !seen.insert(camera.id) {
                return Err(anyhow!("duplicate camera id {}", camera.id));
            }
        }
        Ok(())
    }

    /// Cameras the daemon should actually run.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|camera| camera.enabled)
    }
}

fn camera_from_file(index: usize, file: CameraConfigFile) -> Result<CameraConfig> {
    // Ids default to the 1-based position in the camera list.
    let id = file.id.unwrap_or(index as i64 + 1);
    let name = file.name.unwrap_or_else(|| format!("camera-{}", id));
    let source = file
        .source
        .ok_or_else(|| anyhow!("camera {}: source is required", id))?;
    let mut camera = CameraConfig::new(id, &name, &source);
    camera.enabled = file.enabled.unwrap_or(true);
    camera.conf_threshold = file.conf_threshold.unwrap_or(DEFAULT_CONF_THRESHOLD);
    camera.infer_interval = match file.infer_interval_secs {
        Some(secs) => duration_from_secs("infer_interval_secs", secs)?,
        None => DEFAULT_INFER_INTERVAL,
    };
    camera.suppression_window = match file.suppression_window_secs {
        Some(secs) => duration_from_secs("suppression_window_secs", secs)?,
        None => DEFAULT_SUPPRESSION_WINDOW,
    };
    Ok(camera)
}

fn duration_from_secs(field: &str, secs: f64) -> Result<Duration> {
    if secs <= 0.0 {
        return Err(anyhow!("{} must be a positive number of seconds", field));
    }
    // try_from rejects the rest: NaN, infinities, out-of-range magnitudes.
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("{}: {} is not a representable duration: {}", field, secs, e))
}

fn read_config_file(path: &Path) -> Result<SkyshieldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_a_file() -> Result<()> {
        let cfg = SkyshieldConfig::from_file(SkyshieldConfigFile::default())?;
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.incident_interval, DEFAULT_AGGREGATION_PERIOD);
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.cameras[0].id, 1);
        assert_eq!(cfg.cameras[0].source, DEFAULT_CAMERA_SOURCE);
        Ok(())
    }

    #[test]
    fn file_overrides_and_camera_list() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
              "db_path": "cams.db",
              "incident_interval_secs": 0.25,
              "cameras": [
                {{"id": 10, "name": "gate", "source": "synthetic://gate",
                  "conf_threshold": 0.6, "infer_interval_secs": 0.1,
                  "suppression_window_secs": 2.0}},
                {{"source": "rtsp://cam.local/side", "enabled": false}}
              ]
            }}"#
        )?;
        let cfg = SkyshieldConfig::load_from(Some(file.path()))?;
        assert_eq!(cfg.db_path, "cams.db");
        assert_eq!(cfg.incident_interval, Duration::from_millis(250));
        assert_eq!(cfg.cameras.len(), 2);
        assert_eq!(cfg.cameras[0].id, 10);
        assert!((cfg.cameras[0].conf_threshold - 0.6).abs() < 1e-6);
        assert_eq!(cfg.cameras[0].suppression_window, Duration::from_secs(2));
        assert_eq!(cfg.cameras[1].id, 2);
        assert!(!cfg.cameras[1].enabled);
        assert_eq!(cfg.enabled_cameras().count(), 1);
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let bad_threshold = SkyshieldConfigFile {
            cameras: Some(vec![CameraConfigFile {
                source: Some("synthetic://x".to_string()),
                conf_threshold: Some(1.5),
                ..CameraConfigFile::default()
            }]),
            ..SkyshieldConfigFile::default()
        };
        let cfg = SkyshieldConfig::from_file(bad_threshold)
            .and_then(|cfg| cfg.validate().map(|_| cfg));
        assert!(cfg.is_err());

        let bad_interval = SkyshieldConfigFile {
            incident_interval_secs: Some(0.0),
            ..SkyshieldConfigFile::default()
        };
        assert!(SkyshieldConfig::from_file(bad_interval).is_err());

        // Finite but not representable as a Duration: error, not panic.
        let huge_interval = SkyshieldConfigFile {
            incident_interval_secs: Some(1e300),
            ..SkyshieldConfigFile::default()
        };
        assert!(SkyshieldConfig::from_file(huge_interval).is_err());

        let nan_interval = SkyshieldConfigFile {
            incident_interval_secs: Some(f64::NAN),
            ..SkyshieldConfigFile::default()
        };
        assert!(SkyshieldConfig::from_file(nan_interval).is_err());
    }

    #[test]
    fn duplicate_camera_ids_rejected() -> Result<()> {
        let file = SkyshieldConfigFile {
            cameras: Some(vec![
                CameraConfigFile {
                    id: Some(1),
                    source: Some("synthetic://a".to_string()),
                    ..CameraConfigFile::default()
                },
                CameraConfigFile {
                    id: Some(1),
                    source: Some("synthetic://b".to_string()),
                    ..CameraConfigFile::default()
                },
            ]),
            ..SkyshieldConfigFile::default()
        };
        let cfg = SkyshieldConfig::from_file(file)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn missing_source_is_an_error() {
        let file = SkyshieldConfigFile {
            cameras: Some(vec![CameraConfigFile {
                name: Some("gate".to_string()),
                ..CameraConfigFile::default()
            }]),
            ..SkyshieldConfigFile::default()
        };
        assert!(SkyshieldConfig::from_file(file).is_err());
    }
}
