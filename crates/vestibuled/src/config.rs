use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use vestibule_core::session::{PolicyError, DEFAULT_MIN_FACE_CONFIDENCE, DEFAULT_THRESHOLD};
use vestibule_core::{DuplicatePolicy, MatchPolicy, RegistryOptions};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("unknown embedding model {0:?} — set embedding_dim explicitly")]
    UnknownModel(String),
    #[error("embedding_dim must be positive")]
    ZeroDimension,
    #[error("process_every_n_frames must be at least 1")]
    ZeroSampling,
}

/// Which message bus the D-Bus service registers on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => Err(format!("unknown bus: {other}")),
        }
    }
}

/// Daemon configuration.
///
/// Sources, lowest precedence first: built-in defaults, the TOML file named
/// by `VESTIBULE_CONFIG`, then `VESTIBULE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// JSON Lines extraction feed; `-` reads stdin.
    pub feed_path: String,
    /// Path to the SQLite member database.
    pub db_path: PathBuf,
    /// Cosine similarity needed to grant access.
    pub threshold: f64,
    /// Run a recognition cycle on every Nth frame.
    pub process_every_n_frames: u64,
    /// Extractions below this detector confidence are ignored.
    pub min_face_confidence: f64,
    /// Extractor model name; selects the expected embedding length.
    pub embedding_model: String,
    /// Overrides the length implied by `embedding_model`.
    pub embedding_dim: Option<usize>,
    pub duplicate_policy: DuplicatePolicy,
    /// Delay between frames pulled from the feed.
    pub tick_interval_ms: u64,
    pub bus: BusKind,
    /// Start monitoring as soon as the daemon is up.
    pub autostart: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_path: "-".to_string(),
            db_path: default_data_dir().join("members.db"),
            threshold: DEFAULT_THRESHOLD,
            process_every_n_frames: 5,
            min_face_confidence: DEFAULT_MIN_FACE_CONFIDENCE,
            embedding_model: "VGG-Face".to_string(),
            embedding_dim: None,
            duplicate_policy: DuplicatePolicy::Accumulate,
            tick_interval_ms: 10,
            bus: BusKind::Session,
            autostart: true,
        }
    }
}

impl Config {
    /// Load from the optional config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("VESTIBULE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `VESTIBULE_*` overrides. Unparseable values keep the current
    /// setting.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("VESTIBULE_FEED") {
            self.feed_path = v;
        }
        if let Some(v) = get("VESTIBULE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.threshold = parsed(&get, "VESTIBULE_THRESHOLD", self.threshold);
        self.process_every_n_frames =
            parsed(&get, "VESTIBULE_PROCESS_EVERY_N_FRAMES", self.process_every_n_frames);
        self.min_face_confidence =
            parsed(&get, "VESTIBULE_MIN_FACE_CONFIDENCE", self.min_face_confidence);
        if let Some(v) = get("VESTIBULE_EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(dim) = get("VESTIBULE_EMBEDDING_DIM").and_then(|v| v.parse().ok()) {
            self.embedding_dim = Some(dim);
        }
        self.duplicate_policy = parsed(&get, "VESTIBULE_DUPLICATE_POLICY", self.duplicate_policy);
        self.tick_interval_ms = parsed(&get, "VESTIBULE_TICK_INTERVAL_MS", self.tick_interval_ms);
        self.bus = parsed(&get, "VESTIBULE_BUS", self.bus);
        if let Some(v) = get("VESTIBULE_AUTOSTART") {
            self.autostart = v != "0";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.match_policy().validate()?;
        if self.process_every_n_frames == 0 {
            return Err(ConfigError::ZeroSampling);
        }
        if self.embedding_dim == Some(0) {
            return Err(ConfigError::ZeroDimension);
        }
        if self.expected_dim().is_none() {
            return Err(ConfigError::UnknownModel(self.embedding_model.clone()));
        }
        Ok(())
    }

    /// Embedding length every enrollment must have.
    pub fn expected_dim(&self) -> Option<usize> {
        self.embedding_dim
            .or_else(|| model_dimension(&self.embedding_model))
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            threshold: self.threshold,
            min_face_confidence: self.min_face_confidence,
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            expected_dim: self.expected_dim(),
            duplicate_policy: self.duplicate_policy,
        }
    }
}

/// Output length of the DeepFace model family, by model name.
pub fn model_dimension(model: &str) -> Option<usize> {
    let dim = match model {
        "VGG-Face" => 4096,
        "Facenet" => 128,
        "Facenet512" => 512,
        "OpenFace" => 128,
        "DeepFace" => 4096,
        "DeepID" => 160,
        "ArcFace" => 512,
        "Dlib" => 128,
        "SFace" => 128,
        "GhostFaceNet" => 512,
        _ => return None,
    };
    Some(dim)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vestibule")
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match get(key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable override");
                current
            }
        },
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.threshold, 0.68);
        assert_eq!(c.process_every_n_frames, 5);
        assert_eq!(c.min_face_confidence, 0.6);
        assert_eq!(c.expected_dim(), Some(4096));
        assert_eq!(c.duplicate_policy, DuplicatePolicy::Accumulate);
        assert!(c.db_path.ends_with("vestibule/members.db"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let c = Config::from_toml_str(
            r#"
            threshold = 0.72
            embedding_model = "Facenet512"
            duplicate_policy = "replace"
            bus = "system"
            "#,
        )
        .unwrap();
        assert_eq!(c.threshold, 0.72);
        assert_eq!(c.expected_dim(), Some(512));
        assert_eq!(c.duplicate_policy, DuplicatePolicy::Replace);
        assert_eq!(c.bus, BusKind::System);
        assert_eq!(c.process_every_n_frames, 5);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(matches!(
            Config::from_toml_str("treshold = 0.5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut c = Config::from_toml_str("threshold = 0.5").unwrap();
        c.apply_overrides(env(&[
            ("VESTIBULE_THRESHOLD", "0.8"),
            ("VESTIBULE_PROCESS_EVERY_N_FRAMES", "3"),
            ("VESTIBULE_EMBEDDING_DIM", "2622"),
            ("VESTIBULE_DUPLICATE_POLICY", "replace"),
            ("VESTIBULE_AUTOSTART", "0"),
            ("VESTIBULE_FEED", "/run/vestibule/feed.jsonl"),
        ]));
        assert_eq!(c.threshold, 0.8);
        assert_eq!(c.process_every_n_frames, 3);
        assert_eq!(c.expected_dim(), Some(2622));
        assert_eq!(c.duplicate_policy, DuplicatePolicy::Replace);
        assert!(!c.autostart);
        assert_eq!(c.feed_path, "/run/vestibule/feed.jsonl");
    }

    #[test]
    fn test_unparseable_override_keeps_value() {
        let mut c = Config::default();
        c.apply_overrides(env(&[("VESTIBULE_THRESHOLD", "high"), ("VESTIBULE_BUS", "tcp")]));
        assert_eq!(c.threshold, 0.68);
        assert_eq!(c.bus, BusKind::Session);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let c = Config { threshold: 1.2, ..Config::default() };
        assert!(matches!(c.validate(), Err(ConfigError::Policy(PolicyError::Threshold(_)))));

        let c = Config { process_every_n_frames: 0, ..Config::default() };
        assert!(matches!(c.validate(), Err(ConfigError::ZeroSampling)));

        let c = Config { embedding_dim: Some(0), ..Config::default() };
        assert!(matches!(c.validate(), Err(ConfigError::ZeroDimension)));
    }

    #[test]
    fn test_unknown_model_needs_explicit_dim() {
        let c = Config { embedding_model: "homebrew-v2".into(), ..Config::default() };
        assert!(matches!(c.validate(), Err(ConfigError::UnknownModel(_))));
        let c = Config { embedding_dim: Some(256), ..c };
        assert!(c.validate().is_ok());
        assert_eq!(c.registry_options().expected_dim, Some(256));
    }
}
