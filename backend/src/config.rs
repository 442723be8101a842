use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub classifier: ClassifierConfig,
    pub labels: LabelConfig,
    pub actuator: ActuatorConfig,
    pub artifacts: ArtifactConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Onnx,
    Torch,
}

impl FromStr for ClassifierBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(ClassifierBackend::Onnx),
            "torch" => Ok(ClassifierBackend::Torch),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub top_k: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelMatching {
    /// Exact membership in the curated sets, with a "dog" substring fallback.
    Curated,
    /// Case-insensitive "dog" / "cat" substrings only.
    Substring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub matching: LabelMatching,
    pub cat: Vec<String>,
    pub dog: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub settle_ms: u64,
    pub write_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub sweep_on_startup: bool,
}

const DEFAULT_CAT_LABELS: [&str; 5] = [
    "tabby",
    "tiger_cat",
    "Persian_cat",
    "Siamese_cat",
    "Egyptian_cat",
];

const DEFAULT_DOG_LABELS: [&str; 5] = [
    "golden_retriever",
    "Labrador_retriever",
    "Chihuahua",
    "pug",
    "German_shepherd",
];

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Onnx,
            model_path: PathBuf::from("models/mobilenet_v2.onnx"),
            labels_path: PathBuf::from("models/imagenet_labels.txt"),
            top_k: 5,
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            matching: LabelMatching::Curated,
            cat: DEFAULT_CAT_LABELS.iter().map(|s| s.to_string()).collect(),
            dog: DEFAULT_DOG_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            settle_ms: 2000,
            write_timeout_ms: 500,
            reconnect_backoff_ms: 5000,
        }
    }
}

impl ActuatorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("petsort"),
            sweep_on_startup: true,
        }
    }
}

impl AppConfig {
    /// Loads `.env`, then the YAML file named by `PETSORT_CONFIG` (if any),
    /// then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("PETSORT_CONFIG") {
            Ok(path) => {
                log::info!("Loading configuration from {}", path);
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(top_k) = lookup("TOP_K") {
            self.classifier.top_k = parse_env("TOP_K", &top_k)?;
        }
        if let Some(backend) = lookup("CLASSIFIER_BACKEND") {
            self.classifier.backend = parse_env("CLASSIFIER_BACKEND", &backend)?;
        }
        if let Some(model_path) = lookup("MODEL_PATH") {
            self.classifier.model_path = PathBuf::from(model_path);
        }
        if let Some(labels_path) = lookup("LABELS_PATH") {
            self.classifier.labels_path = PathBuf::from(labels_path);
        }
        if let Some(enabled) = lookup("ACTUATOR_ENABLED") {
            self.actuator.enabled = parse_bool("ACTUATOR_ENABLED", &enabled)?;
        }
        if let Some(port) = lookup("SERIAL_PORT") {
            self.actuator.port = port;
        }
        if let Some(baud) = lookup("SERIAL_BAUD") {
            self.actuator.baud_rate = parse_env("SERIAL_BAUD", &baud)?;
        }
        if let Some(dir) = lookup("ARTIFACT_DIR") {
            self.artifacts.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifier.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".into()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_upload_bytes must be greater than zero".into(),
            ));
        }
        if self.actuator.enabled && self.actuator.port.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "actuator is enabled but no serial port is configured".into(),
            ));
        }
        if let Some(label) = self.labels.cat.iter().find(|l| self.labels.dog.contains(l)) {
            return Err(ConfigError::Invalid(format!(
                "label '{}' is listed as both cat and dog",
                label
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            value: value.to_string(),
        }),
    }
}
