use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::presenter::PresenterKind;

const DEFAULT_INTERVAL_MS: u64 = 800;
const DEFAULT_STILL_WIDTH: u32 = 224;
const DEFAULT_STILL_HEIGHT: u32 = 224;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_WINDOW: usize = crate::smoothing::DEFAULT_WINDOW;
const DEFAULT_DEVICE_SOURCE: &str = "stub://camera";
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 15;
const DEFAULT_FALLBACK_DEVICE: &str = "/dev/video0";
const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:5000/predict";
const DEFAULT_ENDPOINT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HTML_PATH: &str = "results.html";

#[derive(Debug, Deserialize, Default)]
struct RankerdConfigFile {
    capture: Option<CaptureConfigFile>,
    smoothing: Option<SmoothingConfigFile>,
    device: Option<DeviceConfigFile>,
    endpoint: Option<EndpointConfigFile>,
    presenter: Option<PresenterConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    interval_ms: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    source: Option<String>,
    prefer_back: Option<bool>,
    environment: Option<String>,
    user: Option<String>,
    fallback: Option<Vec<String>>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PresenterConfigFile {
    kind: Option<String>,
    html_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RankerdConfig {
    pub capture: CaptureSettings,
    pub window: usize,
    pub device: DeviceSettings,
    pub endpoint: EndpointSettings,
    pub presenter: PresenterSettings,
}

/// Sampling cadence and still format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub interval: Duration,
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            width: DEFAULT_STILL_WIDTH,
            height: DEFAULT_STILL_HEIGHT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Which devices exist and how they are opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// `stub://<name>[?facing=...]` or `v4l2`.
    pub source: String,
    pub prefer_back: bool,
    /// Device node of the environment-facing camera (v4l2).
    pub environment: Option<String>,
    /// Device node of the user-facing camera (v4l2).
    pub user: Option<String>,
    /// Device nodes tried in order for an unconstrained request (v4l2).
    pub fallback: Vec<String>,
    /// Native capture size requested from the device.
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_DEVICE_SOURCE.to_string(),
            prefer_back: true,
            environment: None,
            user: None,
            fallback: vec![DEFAULT_FALLBACK_DEVICE.to_string()],
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            target_fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// `http(s)://.../predict` or `stub://<name>`.
    pub url: String,
    pub timeout: Duration,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_ENDPOINT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenterSettings {
    pub kind: PresenterKind,
    pub html_path: PathBuf,
}

impl Default for PresenterSettings {
    fn default() -> Self {
        Self {
            kind: PresenterKind::Console,
            html_path: PathBuf::from(DEFAULT_HTML_PATH),
        }
    }
}

impl Default for RankerdConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            window: DEFAULT_WINDOW,
            device: DeviceSettings::default(),
            endpoint: EndpointSettings::default(),
            presenter: PresenterSettings::default(),
        }
    }
}

impl RankerdConfig {
    /// Load from `RANKER_CONFIG` (when set), apply `RANKER_*` overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RANKER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RankerdConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            interval: capture_file
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.capture.interval),
            width: capture_file.width.unwrap_or(defaults.capture.width),
            height: capture_file.height.unwrap_or(defaults.capture.height),
            jpeg_quality: capture_file
                .jpeg_quality
                .unwrap_or(defaults.capture.jpeg_quality),
        };

        let window = file
            .smoothing
            .and_then(|smoothing| smoothing.window)
            .unwrap_or(defaults.window);

        let device_file = file.device.unwrap_or_default();
        let device = DeviceSettings {
            source: device_file.source.unwrap_or(defaults.device.source),
            prefer_back: device_file
                .prefer_back
                .unwrap_or(defaults.device.prefer_back),
            environment: device_file.environment,
            user: device_file.user,
            fallback: device_file.fallback.unwrap_or(defaults.device.fallback),
            width: device_file.width.unwrap_or(defaults.device.width),
            height: device_file.height.unwrap_or(defaults.device.height),
            target_fps: device_file
                .target_fps
                .unwrap_or(defaults.device.target_fps),
        };

        let endpoint_file = file.endpoint.unwrap_or_default();
        let endpoint = EndpointSettings {
            url: endpoint_file.url.unwrap_or(defaults.endpoint.url),
            timeout: endpoint_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.endpoint.timeout),
        };

        let presenter_file = file.presenter.unwrap_or_default();
        let presenter = PresenterSettings {
            kind: match presenter_file.kind.as_deref() {
                Some(kind) => PresenterKind::parse(kind)?,
                None => defaults.presenter.kind,
            },
            html_path: presenter_file
                .html_path
                .unwrap_or(defaults.presenter.html_path),
        };

        Ok(Self {
            capture,
            window,
            device,
            endpoint,
            presenter,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("RANKER_ENDPOINT") {
            if !url.trim().is_empty() {
                self.endpoint.url = url;
            }
        }
        if let Ok(source) = std::env::var("RANKER_DEVICE") {
            if !source.trim().is_empty() {
                self.device.source = source;
            }
        }
        if let Ok(interval) = std::env::var("RANKER_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("RANKER_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.capture.interval = Duration::from_millis(millis);
        }
        if let Ok(window) = std::env::var("RANKER_WINDOW") {
            self.window = window
                .trim()
                .parse()
                .map_err(|_| anyhow!("RANKER_WINDOW must be a positive integer"))?;
        }
        if let Ok(prefer_back) = std::env::var("RANKER_PREFER_BACK") {
            self.device.prefer_back = parse_bool(&prefer_back)
                .ok_or_else(|| anyhow!("RANKER_PREFER_BACK must be true or false"))?;
        }
        if let Ok(kind) = std::env::var("RANKER_PRESENTER") {
            if !kind.trim().is_empty() {
                self.presenter.kind = PresenterKind::parse(&kind)?;
            }
        }
        if let Ok(path) = std::env::var("RANKER_HTML_PATH") {
            if !path.trim().is_empty() {
                self.presenter.html_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&mut self) -> Result<()> {
        if self.capture.interval.is_zero() {
            return Err(anyhow!("capture interval must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("still dimensions must be greater than zero"));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be within 1..=100, got {}",
                self.capture.jpeg_quality
            ));
        }
        if self.window == 0 {
            return Err(anyhow!("smoothing window must be at least 1"));
        }
        if self.device.width == 0 || self.device.height == 0 {
            return Err(anyhow!("device capture dimensions must be greater than zero"));
        }
        self.device.source = self.device.source.trim().to_string();
        self.device.fallback = self
            .device
            .fallback
            .iter()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();

        self.endpoint.url = self.endpoint.url.trim().to_string();
        let url = url::Url::parse(&self.endpoint.url)
            .map_err(|e| anyhow!("invalid endpoint url {}: {}", self.endpoint.url, e))?;
        if !matches!(url.scheme(), "http" | "https" | "stub") {
            return Err(anyhow!(
                "unsupported endpoint scheme '{}'; expected http(s) or stub",
                url.scheme()
            ));
        }
        if self.endpoint.timeout.is_zero() {
            return Err(anyhow!("endpoint timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RankerdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_contract() {
        let cfg = RankerdConfig::default();
        assert_eq!(cfg.capture.interval, Duration::from_millis(800));
        assert_eq!((cfg.capture.width, cfg.capture.height), (224, 224));
        assert_eq!(cfg.capture.jpeg_quality, 80);
        assert_eq!(cfg.window, 5);
        assert!(cfg.device.prefer_back);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = RankerdConfig::default();
        cfg.window = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RankerdConfig::default();
        cfg.capture.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RankerdConfig::default();
        cfg.endpoint.url = "ftp://example.com/predict".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RankerdConfig::default();
        cfg.capture.interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
