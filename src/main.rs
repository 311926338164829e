use anyhow::{bail, Context};
use clap::Parser;
use dicom::object::InMemDicomObject;
use dicom_find::config::{AppConfig, StoreConfig};
use dicom_find::{DocumentStore, FindResponseGenerator, MemoryStore, QueryRequest};
use dicom_json::DicomJson;
use futures::StreamExt;
use std::path::PathBuf;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Runs a C-FIND query against the configured document store and prints every match as
/// DICOM JSON, one data set per line.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
	/// The query identifier as a DICOM JSON data set (use '-' for stdin)
	#[arg(short, long)]
	query: String,

	/// An additional configuration file
	#[arg(short, long)]
	config: Option<PathBuf>,
}

fn init_logger(level: tracing::Level) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false)
				.with_writer(std::io::stderr),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	};

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let cli = Cli::parse();
	let config = AppConfig::new(cli.config.as_deref())?;
	init_logger(config.telemetry.level);

	// The Sentry client must exist before the Tokio runtime is created.
	let _sentry = init_sentry(&config);

	let result = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(run(config, &cli.query));

	if let Err(error) = result {
		error!("{error:#}");
		std::process::exit(1);
	}
	Ok(())
}

async fn run(config: AppConfig, query: &str) -> anyhow::Result<()> {
	let store = open_store(&config.store).await?;
	let identifier = read_identifier(query).await?;
	let request = QueryRequest::from_identifier(&identifier);
	info!(
		level = request.query_level(),
		keys = request.attributes().len(),
		"Received find request"
	);

	let generator = match FindResponseGenerator::new(&request, store.as_ref(), config.find.timeout()).await {
		Ok(generator) => generator,
		Err(err) => bail!("Find operation failed with status {:#06X}: {err}", err.code()),
	};

	let cancel = generator.cancel_handle();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("Received interrupt, canceling find operation");
			cancel.cancel();
		}
	});

	let mut responses = Box::pin(generator.into_responses());
	let mut matches = 0usize;
	while let Some(response) = responses.next().await {
		match response.identifier {
			Some(identifier) => {
				matches += 1;
				println!("{}", serde_json::to_string(&DicomJson::from(identifier))?);
			}
			None => info!(
				status = %response.status,
				code = %format!("{:#06X}", response.status.code()),
				matches,
				"Find operation finished"
			),
		}
	}

	Ok(())
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<Box<dyn DocumentStore>> {
	match config {
		StoreConfig::Memory { path } => {
			let store = MemoryStore::load(path)
				.await
				.with_context(|| format!("Failed to load records from {}", path.display()))?;
			info!("Loaded {} records into memory", store.len());
			Ok(Box::new(store))
		}
		#[cfg(feature = "mongodb")]
		StoreConfig::Mongodb {
			uri,
			database,
			collection,
		} => {
			let store = dicom_find::store::MongoStore::connect(uri, database, collection).await?;
			Ok(Box::new(store))
		}
		#[cfg(not(feature = "mongodb"))]
		StoreConfig::Mongodb { .. } => {
			bail!("The MongoDB backend requires the `mongodb` feature")
		}
	}
}

async fn read_identifier(query: &str) -> anyhow::Result<InMemDicomObject> {
	let content = if query == "-" {
		let mut content = String::new();
		tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut content).await?;
		content
	} else {
		tokio::fs::read_to_string(query)
			.await
			.with_context(|| format!("Failed to read query from {query}"))?
	};

	let identifier = dicom_json::from_str(&content).context("Query is not a valid DICOM JSON data set")?;
	Ok(identifier)
}
