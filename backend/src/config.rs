use oct_shared::RetinalLayer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_MODEL_SERVER_URL: &str = "http://127.0.0.1:8501/v1/models/oct_classifier:predict";
const DEFAULT_MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

const DEFAULT_CLASSES: [(&str, &str); 8] = [
    ("AMD", "AMD (Age-Related Macular Degeneration)"),
    ("CNV", "CNV (Choroidal Neovascularization)"),
    ("CSR", "CSR (Central Serous Retinopathy)"),
    ("DME", "DME (Diabetic Macular Edema)"),
    ("DR", "DR (Diabetic Retinopathy)"),
    ("DRUSEN", "DRUSEN (Drusen Deposits)"),
    ("MH", "MH (Macular Hole)"),
    ("NORMAL", "NORMAL (Normal)"),
];

// Reference thickness values in micrometres, used until layer segmentation
// reports measured values.
const REFERENCE_THICKNESS: [(RetinalLayer, f32); 6] = [
    (RetinalLayer::Rnfl, 76.4),
    (RetinalLayer::Gcl, 31.9),
    (RetinalLayer::Ipl, 21.7),
    (RetinalLayer::Opl, 19.4),
    (RetinalLayer::Inl, 18.1),
    (RetinalLayer::Onl, 85.2),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Invalid URL for {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to read analysis config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse analysis config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Analysis config is invalid: {0}")]
    InvalidAnalysis(String),
}

/// Model-facing settings, optionally loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub class_names: Vec<String>,
    pub input_size: u32,
    pub disease_names: HashMap<String, String>,
    pub layer_thickness: BTreeMap<RetinalLayer, f32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            class_names: DEFAULT_CLASSES.iter().map(|(c, _)| c.to_string()).collect(),
            input_size: 299,
            disease_names: DEFAULT_CLASSES
                .iter()
                .map(|(c, name)| (c.to_string(), name.to_string()))
                .collect(),
            layer_thickness: REFERENCE_THICKNESS.into_iter().collect(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_yaml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.class_names.is_empty() {
            return Err(ConfigError::InvalidAnalysis(
                "class_names must not be empty".into(),
            ));
        }
        if self.input_size == 0 {
            return Err(ConfigError::InvalidAnalysis(
                "input_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Long display name for a class label, falling back to the label itself.
    pub fn full_name(&self, class_name: &str) -> String {
        self.disease_names
            .get(class_name)
            .cloned()
            .unwrap_or_else(|| class_name.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upload_folder: PathBuf,
    pub results_folder: PathBuf,
    pub reports_folder: PathBuf,
    pub max_content_length: usize,
    /// Public base URL used when building links. `None` means derive it from
    /// the incoming request.
    pub server_base_url: Option<String>,
    pub model_server_url: Url,
    pub segmentation_url: Option<Url>,
    pub model_timeout: Duration,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so tests do not
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(&non_empty, "PORT", 5000u16)?;
        let max_content_length =
            parse_or(&non_empty, "MAX_CONTENT_LENGTH", DEFAULT_MAX_CONTENT_LENGTH)?;
        let timeout_secs = parse_or(&non_empty, "MODEL_TIMEOUT_SECS", 30u64)?;

        let model_server_url = non_empty("MODEL_SERVER_URL")
            .unwrap_or_else(|| DEFAULT_MODEL_SERVER_URL.to_string());
        let model_server_url = Url::parse(&model_server_url).map_err(|source| {
            ConfigError::InvalidUrl {
                key: "MODEL_SERVER_URL",
                source,
            }
        })?;
        let segmentation_url = non_empty("SEGMENTATION_URL")
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|source| ConfigError::InvalidUrl {
                key: "SEGMENTATION_URL",
                source,
            })?;

        let server_base_url = non_empty("SERVER_BASE_URL")
            .map(|base| base.trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());

        let analysis = match non_empty("ANALYSIS_CONFIG") {
            Some(path) => AnalysisConfig::load(Path::new(&path))?,
            None => AnalysisConfig::default(),
        };

        Ok(Self {
            port,
            upload_folder: PathBuf::from(non_empty("UPLOAD_FOLDER").unwrap_or_else(|| "uploads".into())),
            results_folder: PathBuf::from(non_empty("RESULTS_FOLDER").unwrap_or_else(|| "results".into())),
            reports_folder: PathBuf::from(non_empty("REPORTS_FOLDER").unwrap_or_else(|| "reports".into())),
            max_content_length,
            server_base_url,
            model_server_url,
            segmentation_url,
            model_timeout: Duration::from_secs(timeout_secs),
            analysis,
        })
    }

    pub fn storage_dirs(&self) -> [&Path; 3] {
        [
            self.upload_folder.as_path(),
            self.results_folder.as_path(),
            self.reports_folder.as_path(),
        ]
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
