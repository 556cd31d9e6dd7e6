use crate::session::{ApiKeys, Credentials, UsState};
use serde::Deserialize;
use std::{fs, path::Path};
use toml_edit::{DocumentMut, value};
use tracing::info;

/// Prediction endpoint of the document recognition service.
pub const DEFAULT_RECOGNITION_ENDPOINT: &str =
    "https://api.mindee.net/v1/products/mindee/invoices/v4/predict";

/// Sent when no key was configured; the service rejects it and the
/// recognition adapter falls back.
const PLACEHOLDER_KEY: &str = "your_key";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recognition: RecognitionSection,
    pub valuation: ValuationSection,
    pub dv_service: DvSection,
    pub session: SessionSection,
    pub claim: ClaimSection,
    pub report: ReportSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionSection {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Predictions below this are treated as unreadable.
    pub min_confidence: f64,
    /// `None` leaves the HTTP client's default in place.
    pub timeout_secs: Option<u64>,
}

impl Default for RecognitionSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RECOGNITION_ENDPOINT.to_string(),
            api_key: None,
            min_confidence: 0.7,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationBackend {
    #[default]
    Fixed,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValuationSection {
    pub backend: ValuationBackend,
    pub pre_loss_acv: f64,
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for ValuationSection {
    fn default() -> Self {
        Self {
            backend: ValuationBackend::Fixed,
            pre_loss_acv: 16_000.0,
            base_url: String::new(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DvSection {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub default_state: UsState,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            default_state: UsState::MO,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimSection {
    pub vin: String,
    pub loss_range: f64,
}

impl Default for ClaimSection {
    fn default() -> Self {
        Self {
            vin: "1GYKNCRS4NZ155289".to_string(),
            loss_range: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub title: String,
    pub file_name: String,
    pub disclaimer: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            title: "Diminished Value Report".to_string(),
            file_name: "dv_report.pdf".to_string(),
            disclaimer: "This report is generated for informational purposes only.".to_string(),
        }
    }
}

/// Services whose key can be stored in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedService {
    Recognition,
    Valuation,
    Dv,
}

impl KeyedService {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "recognition" => Some(Self::Recognition),
            "valuation" => Some(Self::Valuation),
            "dv" => Some(Self::Dv),
            _ => None,
        }
    }

    fn section(self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Valuation => "valuation",
            Self::Dv => "dv_service",
        }
    }

    fn env_var(self) -> &'static str {
        match self {
            Self::Recognition => "RECOGNITION_API_KEY",
            Self::Valuation => "VALUATION_API_KEY",
            Self::Dv => "DV_API_KEY",
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Environment first, then the config file, then the placeholder.
    pub fn api_keys(&self) -> ApiKeys {
        ApiKeys {
            recognition: resolve_key(KeyedService::Recognition, &self.recognition.api_key),
            valuation: resolve_key(KeyedService::Valuation, &self.valuation.api_key),
            dv: resolve_key(KeyedService::Dv, &self.dv_service.api_key),
        }
    }

    /// Write a key into the config file in place, keeping comments and layout.
    pub fn update_api_key(
        path: impl AsRef<Path>,
        service: KeyedService,
        new_key: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = if path.as_ref().exists() {
            fs::read_to_string(&path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let section = service.section();
        if !doc.contains_key(section) {
            doc[section] = toml_edit::table();
        }
        doc[section]["api_key"] = value(new_key);

        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}

fn resolve_key(service: KeyedService, configured: &Option<String>) -> String {
    std::env::var(service.env_var())
        .ok()
        .filter(|k| !k.is_empty())
        .or_else(|| configured.clone())
        .unwrap_or_else(|| PLACEHOLDER_KEY.to_string())
}
