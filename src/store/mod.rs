//! Document stores that hold the records find operations search.
//! - [memory] keeps records in process and evaluates filters itself.
//! - [mongo] delegates to a MongoDB collection (feature `mongodb`).

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

use crate::query::{Filter, ProjectionSet};
use crate::types::{parse_tag, AttributeCode};
use async_trait::async_trait;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, VR};
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Provides the records matching a filter.
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Returns the records matching `filter`, reduced to the fields in `projection`.
	///
	/// Records that are equal on every projected field are returned once, in the order the
	/// store encounters them.
	async fn find(
		&self,
		filter: &Filter,
		projection: &ProjectionSet,
	) -> Result<Vec<Record>, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Failed to read records: {0}")]
	Io(#[from] std::io::Error),
	#[error("Malformed record: {0}")]
	Malformed(String),
	#[error("Invalid filter: {0}")]
	InvalidFilter(String),
	#[error(transparent)]
	Backend {
		source: Box<dyn std::error::Error + Send + Sync>,
	},
}

/// A stored data set, keyed by attribute code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<AttributeCode, StoredElement>);

impl Record {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, code: &AttributeCode) -> Option<&StoredElement> {
		self.0.get(code)
	}

	pub fn insert(&mut self, code: AttributeCode, element: StoredElement) {
		self.0.insert(code, element);
	}

	pub fn iter(&self) -> impl Iterator<Item = (&AttributeCode, &StoredElement)> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Converts a data set into a record. Encapsulated pixel data is not stored.
	pub fn from_dataset(dataset: &InMemDicomObject) -> Self {
		let mut record = Self::new();
		for element in dataset {
			let header = element.header();
			let value = match element.value() {
				Value::Primitive(PrimitiveValue::Tags(tags)) => StoredValue::Strings(
					tags.iter().map(|tag| AttributeCode::from(*tag).to_string()).collect(),
				),
				Value::Primitive(value) => StoredValue::Strings(
					value
						.to_multi_str()
						.iter()
						.map(|value| value.trim_end_matches([' ', '\0']).to_owned())
						.collect(),
				),
				Value::Sequence(sequence) => {
					StoredValue::Items(sequence.items().iter().map(Self::from_dataset).collect())
				}
				Value::PixelSequence(_) => continue,
			};
			record.insert(
				AttributeCode::from(header.tag),
				StoredElement::new(header.vr, value),
			);
		}
		record
	}

	/// Converts the record back into a data set. Fields whose code is not a tag are skipped.
	pub fn to_dataset(&self) -> InMemDicomObject {
		let mut dataset = InMemDicomObject::new_empty();
		for (code, element) in &self.0 {
			let Some(tag) = code.tag() else {
				warn!("Skipped stored field {code} that does not name a tag");
				continue;
			};
			let value = match &element.value {
				StoredValue::Strings(values) if values.is_empty() => {
					Value::Primitive(PrimitiveValue::Empty)
				}
				StoredValue::Strings(values) => match typed_value(element.vr, values) {
					Some(value) => Value::Primitive(value),
					None => {
						warn!("Stored values of {code} do not fit VR {}, kept as text", vr_name(element.vr));
						Value::Primitive(PrimitiveValue::Strs(values.iter().cloned().collect()))
					}
				},
				StoredValue::Items(items) => Value::Sequence(DataSetSequence::new(
					items.iter().map(Self::to_dataset).collect::<Vec<_>>(),
					Length::UNDEFINED,
				)),
			};
			let element: InMemElement = DataElement::new(tag, element.vr, value);
			dataset.put(element);
		}
		dataset
	}
}

impl FromIterator<(AttributeCode, StoredElement)> for Record {
	fn from_iter<T: IntoIterator<Item = (AttributeCode, StoredElement)>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

/// A stored element: its VR and its values. Serialized like the DICOM JSON model,
/// e.g. `{"vr": "CS", "Value": ["CT"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredElement {
	#[serde(serialize_with = "serialize_vr", deserialize_with = "deserialize_vr")]
	pub vr: VR,
	#[serde(rename = "Value", default)]
	pub value: StoredValue,
}

impl StoredElement {
	pub const fn new(vr: VR, value: StoredValue) -> Self {
		Self { vr, value }
	}

	/// The string values of the element. Sequences have none.
	pub fn strings(&self) -> &[String] {
		match &self.value {
			StoredValue::Strings(values) => values,
			StoredValue::Items(_) => &[],
		}
	}
}

impl Hash for StoredElement {
	fn hash<H: Hasher>(&self, state: &mut H) {
		vr_name(self.vr).hash(state);
		self.value.hash(state);
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
	Strings(Vec<String>),
	Items(Vec<Record>),
}

impl Default for StoredValue {
	fn default() -> Self {
		Self::Strings(Vec::new())
	}
}

/// Rebuilds the value of a VR from its stored text.
/// Binary and numeric VRs are parsed, returning [None] if a value does not parse.
fn typed_value(vr: VR, values: &[String]) -> Option<PrimitiveValue> {
	fn parse<T: FromStr>(values: &[String]) -> Option<Vec<T>> {
		values.iter().map(|value| value.trim().parse().ok()).collect()
	}

	let value = match vr {
		VR::OB | VR::UN => PrimitiveValue::U8(parse(values)?.into()),
		VR::US | VR::OW => PrimitiveValue::U16(parse(values)?.into()),
		VR::UL | VR::OL => PrimitiveValue::U32(parse(values)?.into()),
		VR::UV | VR::OV => PrimitiveValue::U64(parse(values)?.into()),
		VR::SS => PrimitiveValue::I16(parse(values)?.into()),
		VR::SL => PrimitiveValue::I32(parse(values)?.into()),
		VR::SV => PrimitiveValue::I64(parse(values)?.into()),
		VR::FL | VR::OF => PrimitiveValue::F32(parse(values)?.into()),
		VR::FD | VR::OD => PrimitiveValue::F64(parse(values)?.into()),
		VR::AT => PrimitiveValue::Tags(
			values
				.iter()
				.map(|value| parse_tag(value))
				.collect::<Option<Vec<_>>>()?
				.into(),
		),
		_ => PrimitiveValue::Strs(values.iter().cloned().collect()),
	};
	Some(value)
}

/// The two-letter name of a VR, as used in the DICOM JSON model.
fn vr_name(vr: VR) -> &'static str {
	vr.to_string()
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_vr<S: Serializer>(vr: &VR, serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(vr_name(*vr))
}

fn deserialize_vr<'de, D: Deserializer<'de>>(deserializer: D) -> Result<VR, D::Error> {
	let name = String::deserialize(deserializer)?;
	let vr = match name.as_bytes() {
		[first, second] => VR::from_binary([*first, *second]),
		_ => None,
	};
	vr.ok_or_else(|| serde::de::Error::custom(format!("unknown VR `{name}`")))
}
