use crate::query::QueryRequest;
use crate::store::Record;
use crate::types::{AttributeCode, QueryRetrieveLevel};
use dicom::dictionary_std::tags;
use std::collections::BTreeSet;

/// The fields every record returned for a query must carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectionSet(BTreeSet<AttributeCode>);

impl ProjectionSet {
	/// Every queried key (universal keys included), Specific Character Set, and the
	/// Patient ID for patient level queries.
	pub fn for_request(request: &QueryRequest) -> Self {
		let mut fields: BTreeSet<AttributeCode> = request
			.attributes()
			.iter()
			.map(|attribute| attribute.code.clone())
			.collect();

		fields.insert(AttributeCode::from(tags::SPECIFIC_CHARACTER_SET));
		if request.level() == Some(QueryRetrieveLevel::Patient) {
			fields.insert(AttributeCode::from(tags::PATIENT_ID));
		}

		Self(fields)
	}

	pub fn contains(&self, code: &AttributeCode) -> bool {
		self.0.contains(code)
	}

	pub fn iter(&self) -> impl Iterator<Item = &AttributeCode> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Keeps the projected fields of a record and drops the rest.
	pub fn apply(&self, record: &Record) -> Record {
		record
			.iter()
			.filter(|(code, _)| self.contains(code))
			.map(|(code, element)| (code.clone(), element.clone()))
			.collect()
	}
}

impl FromIterator<AttributeCode> for ProjectionSet {
	fn from_iter<T: IntoIterator<Item = AttributeCode>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}
