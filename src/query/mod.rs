//! The query side of a find operation.
//! - [matching] decides which matching rule applies to a query key.
//! - [filter] compiles query keys into a store filter.
//! - [projection] decides which fields every match must return.

pub mod filter;
pub mod matching;
pub mod projection;

pub use filter::{compile, compile_request, Filter};
pub use matching::{classify, MatchError, MatchType};
pub use projection::ProjectionSet;

use crate::types::{AttributeCode, QueryRetrieveLevel};
use dicom::core::value::Value;
use dicom::core::{PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use tracing::warn;

/// The value of a query key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
	/// Zero-length value.
	Absent,
	Scalar(String),
	/// A multi-valued key. Never contains empty entries.
	List(Vec<String>),
	/// The items of a sequence key, each being a nested set of query keys.
	Items(Vec<Vec<QueryAttribute>>),
}

impl AttributeValue {
	/// Converts the value of a primitive element, splitting multi-values and dropping padding.
	pub fn from_primitive(vr: VR, value: &PrimitiveValue) -> Self {
		let splittable = !matches!(vr, VR::LT | VR::ST | VR::UT | VR::UR);
		let mut values: Vec<String> = value
			.to_multi_str()
			.iter()
			.flat_map(|value| {
				if splittable {
					value.split('\\').collect::<Vec<_>>()
				} else {
					vec![value.as_str()]
				}
			})
			.map(trim_padding)
			.filter(|value| !value.is_empty())
			.map(str::to_owned)
			.collect();

		match values.len() {
			0 => Self::Absent,
			1 => Self::Scalar(values.remove(0)),
			_ => Self::List(values),
		}
	}
}

/// A single query key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAttribute {
	pub code: AttributeCode,
	pub vr: VR,
	pub value: AttributeValue,
}

impl QueryAttribute {
	pub fn new(code: impl Into<AttributeCode>, vr: VR, value: AttributeValue) -> Self {
		Self {
			code: code.into(),
			vr,
			value,
		}
	}
}

/// The identifier of a find request, split into query keys and the query/retrieve level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
	attributes: Vec<QueryAttribute>,
	query_level: String,
}

impl QueryRequest {
	pub fn new(attributes: Vec<QueryAttribute>, query_level: impl Into<String>) -> Self {
		Self {
			attributes,
			query_level: query_level.into(),
		}
	}

	/// Builds a request from a C-FIND identifier.
	///
	/// The Query/Retrieve Level becomes the query level and Specific Character Set is dropped,
	/// as neither is a matching key. All other elements become query keys in tag order.
	pub fn from_identifier(identifier: &InMemDicomObject) -> Self {
		let mut query_level = String::new();
		let mut attributes = Vec::new();

		for element in identifier {
			let header = element.header();
			match header.tag {
				tags::QUERY_RETRIEVE_LEVEL => {
					if let Value::Primitive(value) = element.value() {
						query_level = trim_padding(&value.to_str()).to_owned();
					}
				}
				tags::SPECIFIC_CHARACTER_SET => {}
				tag => {
					if let Some(value) = convert_value(header.vr, element.value()) {
						attributes.push(QueryAttribute::new(tag, header.vr, value));
					} else {
						warn!("Skipped query key {tag} with encapsulated pixel data");
					}
				}
			}
		}

		Self {
			attributes,
			query_level,
		}
	}

	pub fn attributes(&self) -> &[QueryAttribute] {
		&self.attributes
	}

	/// The query level as given in the request, without padding.
	pub fn query_level(&self) -> &str {
		trim_padding(&self.query_level)
	}

	pub fn level(&self) -> Option<QueryRetrieveLevel> {
		self.query_level().parse().ok()
	}
}

fn convert_value<P>(vr: VR, value: &Value<InMemDicomObject, P>) -> Option<AttributeValue> {
	match value {
		Value::Primitive(value) => Some(AttributeValue::from_primitive(vr, value)),
		Value::Sequence(sequence) => {
			let items: Vec<Vec<QueryAttribute>> = sequence
				.items()
				.iter()
				.map(|item| QueryRequest::from_identifier(item).attributes)
				.collect();
			if items.is_empty() {
				Some(AttributeValue::Absent)
			} else {
				Some(AttributeValue::Items(items))
			}
		}
		Value::PixelSequence(_) => None,
	}
}

/// Removes the space and NUL padding DICOM puts around string values.
pub(crate) fn trim_padding(value: &str) -> &str {
	value.trim_matches(|c| c == ' ' || c == '\0')
}
