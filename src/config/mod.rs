use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub find: FindConfig,
	pub store: StoreConfig,
}

impl AppConfig {
	/// Loads the configuration from the built-in defaults, an optional `config.toml` in the
	/// working directory, the file given by `path` and `DICOM_FIND_*` environment variables,
	/// in that order of precedence.
	pub fn new(path: Option<&Path>) -> Result<Self, config::ConfigError> {
		use config::Config;
		let mut builder = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false));

		if let Some(path) = path {
			builder = builder.add_source(config::File::from(path));
		}

		builder
			.add_source(config::Environment::with_prefix("DICOM_FIND").separator("_"))
			.build()?
			.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Configurable logging level. Also configurable via RUST_LOG and DICOM_FIND_TELEMETRY_LEVEL
	#[serde(deserialize_with = "deserialize_level")]
	pub level: Level,
	/// Sentry DSN. Error tracking is disabled if not set.
	pub sentry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindConfig {
	/// Milliseconds the document store may take to answer a find query.
	pub timeout: u64,
}

impl FindConfig {
	pub const fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
	/// Records are loaded from a JSON file into memory.
	Memory { path: PathBuf },
	/// Records live in a MongoDB collection.
	Mongodb {
		uri: String,
		database: String,
		collection: String,
	},
}

fn deserialize_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
	let level = String::deserialize(deserializer)?;
	Level::from_str(&level).map_err(serde::de::Error::custom)
}
