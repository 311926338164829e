use crate::query::AttributeValue;
use crate::types::AttributeCode;
use dicom::core::VR;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// The matching rules of the Query/Retrieve service.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_C.2.2.2.html>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MatchType {
	/// C.2.2.2.3: a zero-length value matches every stored value.
	Universal,
	/// C.2.2.2.1
	SingleValue,
	/// C.2.2.2.4
	WildCard,
	/// C.2.2.2.5
	Range,
	/// C.2.2.2.2
	ListOfUID,
	/// C.2.2.2.8
	MultipleValues,
	/// C.2.2.2.6
	Sequence,
	/// The value does not fit its VR. Matched as a plain string.
	Unknown,
}

impl Display for MatchType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Universal => "universal",
			Self::SingleValue => "single value",
			Self::WildCard => "wild card",
			Self::Range => "range",
			Self::ListOfUID => "list of UID",
			Self::MultipleValues => "multiple values",
			Self::Sequence => "sequence",
			Self::Unknown => "unknown",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
	#[error("Sequence matching is not supported for {code}")]
	SequenceMatching { code: AttributeCode },
	#[error("Value of {code} cannot be matched as {match_type}")]
	Inconsistent {
		code: AttributeCode,
		match_type: MatchType,
	},
}

const fn is_date_or_time(vr: VR) -> bool {
	matches!(vr, VR::DA | VR::DT | VR::TM)
}

/// VRs whose values may contain the wild card characters `*` and `?`.
const fn has_wildcard_matching(vr: VR) -> bool {
	!is_date_or_time(vr)
		&& !matches!(
			vr,
			VR::SL
				| VR::SS | VR::UL
				| VR::FD | VR::FL
				| VR::OB | VR::OF
				| VR::OW | VR::UN
				| VR::DS | VR::US
				| VR::UI
		)
}

/// Decides which matching rule applies to a query key with the given VR and value.
pub fn classify(vr: VR, value: &AttributeValue) -> MatchType {
	match value {
		AttributeValue::Absent => MatchType::Universal,
		AttributeValue::Scalar(_) if vr == VR::SQ => MatchType::Unknown,
		AttributeValue::Scalar(value) => classify_scalar(vr, value),
		AttributeValue::List(_) => match vr {
			VR::UI => MatchType::ListOfUID,
			VR::SQ => MatchType::Sequence,
			_ => MatchType::MultipleValues,
		},
		AttributeValue::Items(_) => MatchType::Sequence,
	}
}

pub(crate) fn classify_scalar(vr: VR, value: &str) -> MatchType {
	if is_date_or_time(vr) && value.contains('-') {
		MatchType::Range
	} else if has_wildcard_matching(vr) && value.contains(['*', '?']) {
		MatchType::WildCard
	} else {
		MatchType::SingleValue
	}
}
