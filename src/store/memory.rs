use crate::query::{Filter, ProjectionSet};
use crate::store::{DocumentStore, Record, StoreError};
use crate::types::AttributeCode;
use async_trait::async_trait;
use dicom::object::InMemDicomObject;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, instrument, trace};

/// A document store that keeps its records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	records: Vec<Record>,
}

impl MemoryStore {
	pub const fn new(records: Vec<Record>) -> Self {
		Self { records }
	}

	pub fn from_datasets<'a>(datasets: impl IntoIterator<Item = &'a InMemDicomObject>) -> Self {
		Self::new(datasets.into_iter().map(Record::from_dataset).collect())
	}

	/// Loads a JSON file holding an array of data sets in the DICOM JSON model.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let path = path.as_ref();
		let content = tokio::fs::read_to_string(path).await?;
		let datasets: Vec<serde_json::Value> = serde_json::from_str(&content)
			.map_err(|err| StoreError::Malformed(format!("{}: {err}", path.display())))?;

		let mut records = Vec::with_capacity(datasets.len());
		for (index, dataset) in datasets.into_iter().enumerate() {
			let dataset: InMemDicomObject = dicom_json::from_value(dataset)
				.map_err(|err| StoreError::Malformed(format!("data set #{index}: {err}")))?;
			records.push(Record::from_dataset(&dataset));
		}

		debug!("Loaded {} records from {}", records.len(), path.display());
		Ok(Self::new(records))
	}

	pub fn insert(&mut self, record: Record) {
		self.records.push(record);
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}

#[async_trait]
impl DocumentStore for MemoryStore {
	#[instrument(skip_all)]
	async fn find(
		&self,
		filter: &Filter,
		projection: &ProjectionSet,
	) -> Result<Vec<Record>, StoreError> {
		let predicate = Predicate::compile(filter)?;

		let mut seen = HashSet::new();
		let mut matches = Vec::new();
		for record in self.records.iter().filter(|record| predicate.matches(record)) {
			let projected = projection.apply(record);
			if seen.insert(projected.clone()) {
				matches.push(projected);
			}
		}

		trace!("{} of {} records match", matches.len(), self.records.len());
		Ok(matches)
	}
}

/// A [Filter] with its regular expressions compiled.
enum Predicate<'a> {
	Eq {
		field: &'a AttributeCode,
		value: &'a str,
	},
	Regex {
		field: &'a AttributeCode,
		regex: Regex,
	},
	Range {
		field: &'a AttributeCode,
		lower: Option<&'a str>,
		upper: Option<&'a str>,
	},
	Or(Vec<Predicate<'a>>),
	And(Vec<Predicate<'a>>),
}

impl<'a> Predicate<'a> {
	fn compile(filter: &'a Filter) -> Result<Self, StoreError> {
		let predicate = match filter {
			Filter::Eq { field, value } => Self::Eq { field, value },
			Filter::Regex {
				field,
				pattern,
				case_insensitive,
			} => {
				let regex = RegexBuilder::new(pattern)
					.case_insensitive(*case_insensitive)
					.build()
					.map_err(|err| StoreError::InvalidFilter(err.to_string()))?;
				Self::Regex { field, regex }
			}
			Filter::Range {
				field,
				lower,
				upper,
			} => Self::Range {
				field,
				lower: lower.as_deref(),
				upper: upper.as_deref(),
			},
			Filter::Or(filters) => Self::Or(Self::compile_all(filters)?),
			Filter::And(filters) => Self::And(Self::compile_all(filters)?),
		};
		Ok(predicate)
	}

	fn compile_all(filters: &'a [Filter]) -> Result<Vec<Self>, StoreError> {
		filters.iter().map(Self::compile).collect()
	}

	/// A field predicate holds if any value of the field satisfies it.
	/// Missing fields and sequences satisfy none.
	fn matches(&self, record: &Record) -> bool {
		let any_value = |field: &AttributeCode, test: &dyn Fn(&str) -> bool| {
			record
				.get(field)
				.is_some_and(|element| element.strings().iter().any(|value| test(value.as_str())))
		};

		match self {
			Self::Eq { field, value } => any_value(field, &|stored: &str| stored == *value),
			Self::Regex { field, regex } => any_value(field, &|stored: &str| regex.is_match(stored)),
			Self::Range {
				field,
				lower,
				upper,
			} => any_value(field, &|stored: &str| {
				lower.is_none_or(|lower| stored >= lower) && upper.is_none_or(|upper| stored <= upper)
			}),
			Self::Or(predicates) => predicates.iter().any(|predicate| predicate.matches(record)),
			Self::And(predicates) => predicates.iter().all(|predicate| predicate.matches(record)),
		}
	}
}
