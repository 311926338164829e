use dicom::core::{PrimitiveValue, Tag};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// US (Unsigned Short) value representation.
pub type US = u16;

/// Identifies a queried attribute and the store field that holds it.
///
/// The code is the tag rendered as eight upper-case hex digits (group followed by element),
/// e.g. `00100010` for Patient Name. Codes order the same way the tags they came from do.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeCode(String);

impl AttributeCode {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Parses the code back into a tag. Returns [None] for codes that are not eight hex digits.
	pub fn tag(&self) -> Option<Tag> {
		parse_tag(&self.0)
	}
}

/// Parses a tag written as eight hex digits, e.g. `00280010`.
pub(crate) fn parse_tag(code: &str) -> Option<Tag> {
	if code.len() != 8 || !code.is_ascii() {
		return None;
	}
	let group = u16::from_str_radix(&code[..4], 16).ok()?;
	let element = u16::from_str_radix(&code[4..], 16).ok()?;
	Some(Tag(group, element))
}

impl From<Tag> for AttributeCode {
	fn from(tag: Tag) -> Self {
		Self(format!("{:04X}{:04X}", tag.0, tag.1))
	}
}

impl Display for AttributeCode {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// The level of the entity a query searches for.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_C.6.html>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueryRetrieveLevel {
	Patient,
	Study,
	Series,
	Image,
	Frame,
}

impl Display for QueryRetrieveLevel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Patient => write!(f, "PATIENT"),
			Self::Study => write!(f, "STUDY"),
			Self::Series => write!(f, "SERIES"),
			Self::Image => write!(f, "IMAGE"),
			Self::Frame => write!(f, "FRAME"),
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown query/retrieve level `{0}`")]
pub struct ParseLevelError(String);

impl FromStr for QueryRetrieveLevel {
	type Err = ParseLevelError;

	/// Leading and trailing padding is ignored, so `"PATIENT "` parses like `"PATIENT"`.
	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim_matches(|c| c == ' ' || c == '\0') {
			"PATIENT" => Ok(Self::Patient),
			"STUDY" => Ok(Self::Study),
			"SERIES" => Ok(Self::Series),
			"IMAGE" => Ok(Self::Image),
			"FRAME" => Ok(Self::Frame),
			_ => Err(ParseLevelError(value.to_owned())),
		}
	}
}

impl From<QueryRetrieveLevel> for PrimitiveValue {
	fn from(level: QueryRetrieveLevel) -> Self {
		Self::Str(level.to_string())
	}
}

/// Status of a find operation as seen by the driving protocol layer.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_C.4.html#sect_C.4.1.1.4>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
	/// Matches are continuing.
	Pending,
	/// Matching is complete. No further responses follow.
	Success,
	/// Matching terminated due to a cancel request.
	Canceled,
}

impl Status {
	/// The DIMSE status word a C-FIND-RSP carries for this status.
	pub const fn code(self) -> US {
		match self {
			Self::Pending => 0xFF00,
			Self::Success => 0x0000,
			Self::Canceled => 0xFE00,
		}
	}

	pub const fn is_final(self) -> bool {
		!matches!(self, Self::Pending)
	}
}

impl From<Status> for US {
	fn from(status: Status) -> Self {
		status.code()
	}
}

impl Display for Status {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Pending => write!(f, "Pending"),
			Self::Success => write!(f, "Success"),
			Self::Canceled => write!(f, "Canceled"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::dictionary_std::tags;

	#[test]
	fn attribute_code_from_tag() {
		let code = AttributeCode::from(tags::PATIENT_NAME);
		assert_eq!(code.as_str(), "00100010");
		assert_eq!(code.tag(), Some(tags::PATIENT_NAME));

		let code = AttributeCode::from(tags::SPECIFIC_CHARACTER_SET);
		assert_eq!(code.to_string(), "00080005");
	}

	#[test]
	fn attribute_code_orders_like_tags() {
		let mut codes = vec![
			AttributeCode::from(tags::STUDY_DATE),
			AttributeCode::from(tags::PATIENT_ID),
			AttributeCode::from(tags::MODALITY),
		];
		codes.sort();
		assert_eq!(
			codes,
			vec![
				AttributeCode::from(tags::STUDY_DATE),
				AttributeCode::from(tags::MODALITY),
				AttributeCode::from(tags::PATIENT_ID),
			]
		);
	}

	#[test]
	fn attribute_code_rejects_malformed_tags() {
		let code: AttributeCode = serde_json::from_str("\"0010001\"").unwrap();
		assert_eq!(code.tag(), None);
		let code: AttributeCode = serde_json::from_str("\"0010XXXX\"").unwrap();
		assert_eq!(code.tag(), None);
	}

	#[test]
	fn parse_padded_query_level() {
		assert_eq!("PATIENT ".parse(), Ok(QueryRetrieveLevel::Patient));
		assert_eq!("STUDY".parse(), Ok(QueryRetrieveLevel::Study));
		assert_eq!("IMAGE\0".parse(), Ok(QueryRetrieveLevel::Image));
		assert!("INSTANCE".parse::<QueryRetrieveLevel>().is_err());
	}

	#[test]
	fn status_codes() {
		assert_eq!(Status::Pending.code(), 0xFF00);
		assert_eq!(US::from(Status::Success), 0x0000);
		assert_eq!(Status::Canceled.code(), 0xFE00);
		assert!(!Status::Pending.is_final());
		assert!(Status::Canceled.is_final());
	}
}
