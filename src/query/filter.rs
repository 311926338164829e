use crate::query::matching::{classify, classify_scalar, MatchError, MatchType};
use crate::query::{AttributeValue, QueryAttribute, QueryRequest};
use crate::types::AttributeCode;
use dicom::core::VR;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt::{Display, Formatter};

/// A predicate over stored records.
///
/// Each leaf tests a single field. A multi-valued field satisfies a leaf if any of its values does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
	/// The field holds exactly this value.
	Eq { field: AttributeCode, value: String },
	/// The field holds a value matching the (anchored) regular expression.
	Regex {
		field: AttributeCode,
		pattern: String,
		case_insensitive: bool,
	},
	/// The field holds a value within the inclusive bounds. Missing bounds are open.
	Range {
		field: AttributeCode,
		lower: Option<String>,
		upper: Option<String>,
	},
	Or(Vec<Filter>),
	/// Every sub-filter holds. An empty conjunction matches every record.
	And(Vec<Filter>),
}

impl Filter {
	/// Renders the filter as a MongoDB query document.
	///
	/// Each field addresses the value list of the stored element, i.e. `<code>.Value`.
	pub fn to_document(&self) -> JsonValue {
		match self {
			Self::Eq { field, value } => json!({ value_path(field): value }),
			Self::Regex {
				field,
				pattern,
				case_insensitive,
			} => {
				let options = if *case_insensitive { "i" } else { "" };
				json!({ value_path(field): { "$regex": pattern, "$options": options } })
			}
			Self::Range {
				field,
				lower,
				upper,
			} => {
				let mut bounds = Map::new();
				if let Some(lower) = lower {
					bounds.insert(String::from("$gte"), JsonValue::from(lower.as_str()));
				}
				if let Some(upper) = upper {
					bounds.insert(String::from("$lte"), JsonValue::from(upper.as_str()));
				}
				// Both bounds must hold for the same value of a multi-valued field
				if bounds.len() > 1 {
					json!({ value_path(field): { "$elemMatch": bounds } })
				} else {
					json!({ value_path(field): bounds })
				}
			}
			Self::Or(filters) => {
				let terms: Vec<JsonValue> = filters.iter().map(Self::to_document).collect();
				json!({ "$or": terms })
			}
			Self::And(filters) if filters.is_empty() => json!({}),
			Self::And(filters) => {
				let terms: Vec<JsonValue> = filters.iter().map(Self::to_document).collect();
				json!({ "$and": terms })
			}
		}
	}
}

impl Display for Filter {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.to_document())
	}
}

fn value_path(field: &AttributeCode) -> String {
	format!("{field}.Value")
}

/// Compiles the query keys of a request into the conjunction of their filter fragments.
/// Universal keys do not contribute a fragment.
pub fn compile_request(request: &QueryRequest) -> Result<Filter, MatchError> {
	let mut fragments = Vec::with_capacity(request.attributes().len());
	for attribute in request.attributes() {
		let QueryAttribute { code, vr, value } = attribute;
		let match_type = classify(*vr, value);
		if let Some(fragment) = compile(code, *vr, value, match_type)? {
			fragments.push(fragment);
		}
	}
	Ok(Filter::And(fragments))
}

/// Compiles a single query key into a filter fragment.
///
/// `match_type` must be the result of [classify] for the same VR and value.
/// Returns [None] for keys that match every record.
pub fn compile(
	code: &AttributeCode,
	vr: VR,
	value: &AttributeValue,
	match_type: MatchType,
) -> Result<Option<Filter>, MatchError> {
	let inconsistent = || MatchError::Inconsistent {
		code: code.clone(),
		match_type,
	};

	let fragment = match (match_type, value) {
		(MatchType::Universal, _) => None,
		(MatchType::SingleValue | MatchType::Unknown, AttributeValue::Scalar(value)) => {
			Some(Filter::Eq {
				field: code.clone(),
				value: value.clone(),
			})
		}
		(MatchType::WildCard, AttributeValue::Scalar(value)) => Some(Filter::Regex {
			field: code.clone(),
			pattern: wildcard_to_regex(value),
			case_insensitive: vr == VR::PN,
		}),
		(MatchType::Range, AttributeValue::Scalar(value)) => {
			compile_range(code, value).ok_or_else(inconsistent)?
		}
		(MatchType::ListOfUID, AttributeValue::List(values)) => {
			let terms = values
				.iter()
				.map(|value| Filter::Eq {
					field: code.clone(),
					value: value.clone(),
				})
				.collect();
			Some(Filter::Or(terms))
		}
		(MatchType::MultipleValues, AttributeValue::List(values)) => {
			let mut terms = Vec::with_capacity(values.len());
			for value in values {
				let scalar = AttributeValue::Scalar(value.clone());
				let match_type = classify_scalar(vr, value);
				// A term without a fragment matches everything, and so does the disjunction.
				match compile(code, vr, &scalar, match_type)? {
					Some(term) => terms.push(term),
					None => return Ok(None),
				}
			}
			Some(Filter::Or(terms))
		}
		(MatchType::Sequence, AttributeValue::Items(items)) => {
			if items.iter().flatten().all(is_return_key) {
				None
			} else {
				return Err(MatchError::SequenceMatching { code: code.clone() });
			}
		}
		(MatchType::Sequence, AttributeValue::List(_)) => {
			return Err(MatchError::SequenceMatching { code: code.clone() });
		}
		_ => return Err(inconsistent()),
	};

	Ok(fragment)
}

/// Whether a key only asks for a value to be returned, without constraining the match.
fn is_return_key(attribute: &QueryAttribute) -> bool {
	match &attribute.value {
		AttributeValue::Absent => true,
		AttributeValue::Items(items) => items.iter().flatten().all(is_return_key),
		AttributeValue::Scalar(_) | AttributeValue::List(_) => false,
	}
}

/// Splits `begin-end` at the first hyphen. Returns [None] if there is no hyphen.
/// A range without either bound compiles to no fragment.
fn compile_range(code: &AttributeCode, value: &str) -> Option<Option<Filter>> {
	let (begin, end) = value.split_once('-')?;
	if begin.is_empty() && end.is_empty() {
		return Some(None);
	}

	let bound = |value: &str| (!value.is_empty()).then(|| value.to_owned());
	Some(Some(Filter::Range {
		field: code.clone(),
		lower: bound(begin),
		upper: bound(end),
	}))
}

/// Converts a DICOM wild card pattern into an anchored regular expression.
///
/// `*` matches any sequence of characters and `?` matches a single character.
/// Every other character matches itself.
pub fn wildcard_to_regex(pattern: &str) -> String {
	let mut regex = pattern.replace('\\', "\\\\");
	regex = regex.replace('.', "\\.");
	regex = regex.replace('*', ".*");
	regex = regex.replace('?', ".");
	for metacharacter in ['^', '$', '[', ']', '(', ')', '+', '{', '}', '|'] {
		regex = regex.replace(metacharacter, &format!("\\{metacharacter}"));
	}
	format!("^{regex}$")
}
