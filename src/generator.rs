use crate::query::{compile_request, MatchError, ProjectionSet, QueryRequest};
use crate::store::{DocumentStore, Record, StoreError};
use crate::types::{Status, US};
use async_stream::stream;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use futures::Stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

/// Answers a single find request.
///
/// The generator runs the query once when it is created and then hands out one response per
/// distinct match. It starts [Status::Pending] and ends either [Status::Success] once every
/// match was returned or [Status::Canceled] after [FindResponseGenerator::cancel].
///
/// Responses are taken with [Iterator::next]. A [None] ends the operation, and
/// [FindResponseGenerator::status] tells how.
#[derive(Debug)]
pub struct FindResponseGenerator {
	query_level: String,
	results: VecDeque<Record>,
	status: Status,
	canceled: CancelHandle,
}

impl FindResponseGenerator {
	/// Compiles the request and runs it against the store.
	///
	/// Fails if a key cannot be matched, if the store fails, or if the store does not answer
	/// within `timeout`.
	#[instrument(skip_all, fields(level = request.query_level()))]
	pub async fn new<S>(
		request: &QueryRequest,
		store: &S,
		timeout: Duration,
	) -> Result<Self, FindError>
	where
		S: DocumentStore + ?Sized,
	{
		let filter = compile_request(request)?;
		let projection = ProjectionSet::for_request(request);
		debug!(%filter, fields = projection.len(), "Running find query");

		let results = tokio::time::timeout(timeout, store.find(&filter, &projection))
			.await
			.map_err(|_| FindError::Timeout(timeout))??;
		debug!("Found {} distinct matches", results.len());

		Ok(Self {
			query_level: request.query_level().to_owned(),
			results: VecDeque::from(results),
			status: Status::Pending,
			canceled: CancelHandle::default(),
		})
	}

	pub fn status(&self) -> Status {
		if self.status == Status::Pending && self.canceled.is_canceled() {
			Status::Canceled
		} else {
			self.status
		}
	}

	/// Ends the operation. No further responses are returned.
	/// Canceling a completed operation has no effect.
	pub fn cancel(&mut self) {
		self.canceled.cancel();
		self.finish();
	}

	/// A handle that cancels this generator from elsewhere, e.g. from the task that receives
	/// the C-CANCEL request while responses are being sent.
	pub fn cancel_handle(&self) -> CancelHandle {
		self.canceled.clone()
	}

	/// The number of matches not yet returned.
	pub fn remaining(&self) -> usize {
		if self.status().is_final() {
			0
		} else {
			self.results.len()
		}
	}

	/// Moves into the final state and releases the remaining matches.
	fn finish(&mut self) {
		if self.status != Status::Pending {
			return;
		}
		self.status = if self.canceled.is_canceled() {
			info!(dropped = self.results.len(), "Find operation canceled");
			Status::Canceled
		} else {
			Status::Success
		};
		self.results = VecDeque::new();
	}

	/// Turns the generator into the responses of a C-FIND operation: a pending response per
	/// match, followed by a single final response without identifier.
	pub fn into_responses(self) -> impl Stream<Item = FindResponse> {
		let mut generator = self;
		stream! {
			while let Some(identifier) = generator.next() {
				yield FindResponse {
					status: Status::Pending,
					identifier: Some(identifier),
				};
			}
			yield FindResponse {
				status: generator.status(),
				identifier: None,
			};
		}
	}
}

impl Iterator for FindResponseGenerator {
	type Item = InMemDicomObject;

	fn next(&mut self) -> Option<Self::Item> {
		if self.canceled.is_canceled() {
			self.finish();
		}
		if self.status != Status::Pending {
			return None;
		}

		let Some(record) = self.results.pop_front() else {
			self.finish();
			return None;
		};

		let mut identifier = record.to_dataset();
		identifier.put(DataElement::new(
			tags::QUERY_RETRIEVE_LEVEL,
			VR::CS,
			PrimitiveValue::from(self.query_level.as_str()),
		));
		trace!(remaining = self.results.len(), "Returning match");
		Some(identifier)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let remaining = self.remaining();
		(remaining, Some(remaining))
	}
}

/// Cancels a [FindResponseGenerator] it was taken from.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
	pub fn cancel(&self) {
		self.0.store(true, Ordering::Release);
	}

	pub fn is_canceled(&self) -> bool {
		self.0.load(Ordering::Acquire)
	}
}

/// A response of a find operation.
#[derive(Debug, Clone)]
pub struct FindResponse {
	pub status: Status,
	/// The matching data set. Only pending responses carry one.
	pub identifier: Option<InMemDicomObject>,
}

#[derive(Debug, Error)]
pub enum FindError {
	#[error(transparent)]
	Match(#[from] MatchError),
	#[error("Document store failed: {0}")]
	Store(#[from] StoreError),
	#[error("Document store did not answer within {0:?}")]
	Timeout(Duration),
}

impl FindError {
	/// The DIMSE status word for the failed operation ("Unable to process").
	pub const fn code(&self) -> US {
		0xC000
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::query::{AttributeValue, Filter, QueryAttribute};
	use crate::store::{MemoryStore, StoredElement, StoredValue};
	use crate::types::AttributeCode;
	use async_trait::async_trait;
	use dicom::core::Tag;
	use futures::StreamExt;
	use serde_json::json;
	use std::sync::atomic::AtomicUsize;
	use std::sync::Mutex;

	const TIMEOUT: Duration = Duration::from_secs(5);

	fn record(elements: &[(Tag, VR, &str)]) -> Record {
		elements
			.iter()
			.map(|(tag, vr, value)| {
				(
					AttributeCode::from(*tag),
					StoredElement::new(*vr, StoredValue::Strings(vec![String::from(*value)])),
				)
			})
			.collect()
	}

	fn study(name: &str, modality: &str, date: &str, series: &str) -> Record {
		record(&[
			(tags::SPECIFIC_CHARACTER_SET, VR::CS, "ISO_IR 100"),
			(tags::QUERY_RETRIEVE_LEVEL, VR::CS, "IMAGE"),
			(tags::PATIENT_NAME, VR::PN, name),
			(tags::PATIENT_ID, VR::LO, "P1"),
			(tags::MODALITY, VR::CS, modality),
			(tags::STUDY_DATE, VR::DA, date),
			(tags::SERIES_INSTANCE_UID, VR::UI, series),
		])
	}

	fn store() -> MemoryStore {
		MemoryStore::new(vec![
			study("Johnson^Jon", "CT", "20200105", "1.1"),
			study("Johnson^Jon", "CT", "20200105", "1.2"),
			study("Jordan^Evan", "MR", "20200120", "2.1"),
			study("Jon", "US", "20200110", "3.1"),
			study("Joan", "MR", "20200301", "4.1"),
		])
	}

	fn scalar(value: &str) -> AttributeValue {
		AttributeValue::Scalar(String::from(value))
	}

	fn study_request() -> QueryRequest {
		QueryRequest::new(
			vec![
				QueryAttribute::new(tags::PATIENT_NAME, VR::PN, scalar("jo*n")),
				QueryAttribute::new(
					tags::MODALITY,
					VR::CS,
					AttributeValue::List(vec![String::from("CT"), String::from("MR")]),
				),
				QueryAttribute::new(tags::STUDY_DATE, VR::DA, scalar("20200101-20200131")),
			],
			"STUDY",
		)
	}

	/// Records every filter it receives and answers from an inner store.
	#[derive(Default)]
	struct RecordingStore {
		inner: MemoryStore,
		calls: AtomicUsize,
		filters: Mutex<Vec<serde_json::Value>>,
	}

	#[async_trait]
	impl DocumentStore for RecordingStore {
		async fn find(
			&self,
			filter: &Filter,
			projection: &ProjectionSet,
		) -> Result<Vec<Record>, StoreError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.filters.lock().unwrap().push(filter.to_document());
			self.inner.find(filter, projection).await
		}
	}

	struct FailingStore;

	#[async_trait]
	impl DocumentStore for FailingStore {
		async fn find(&self, _: &Filter, _: &ProjectionSet) -> Result<Vec<Record>, StoreError> {
			Err(StoreError::Malformed(String::from("broken")))
		}
	}

	struct SlowStore;

	#[async_trait]
	impl DocumentStore for SlowStore {
		async fn find(&self, _: &Filter, _: &ProjectionSet) -> Result<Vec<Record>, StoreError> {
			tokio::time::sleep(Duration::from_secs(60)).await;
			Ok(Vec::new())
		}
	}

	#[tokio::test]
	async fn study_query() {
		let store = RecordingStore {
			inner: store(),
			..Default::default()
		};
		let mut generator = FindResponseGenerator::new(&study_request(), &store, TIMEOUT)
			.await
			.unwrap();

		assert_eq!(
			store.filters.lock().unwrap()[0],
			json!({
				"$and": [
					{ "00100010.Value": { "$regex": "^jo.*n$", "$options": "i" } },
					{ "$or": [ { "00080060.Value": "CT" }, { "00080060.Value": "MR" } ] },
					{ "00080020.Value": { "$elemMatch": { "$gte": "20200101", "$lte": "20200131" } } },
				]
			})
		);

		assert_eq!(generator.status(), Status::Pending);
		let first = generator.next().unwrap();
		assert_eq!(generator.status(), Status::Pending);
		assert_eq!(first.element(tags::PATIENT_NAME).unwrap().to_str().unwrap(), "Johnson^Jon");
		assert_eq!(first.element(tags::MODALITY).unwrap().to_str().unwrap(), "CT");
		assert_eq!(first.element(tags::SPECIFIC_CHARACTER_SET).unwrap().to_str().unwrap(), "ISO_IR 100");
		assert_eq!(first.element(tags::QUERY_RETRIEVE_LEVEL).unwrap().to_str().unwrap(), "STUDY");
		assert!(first.element(tags::PATIENT_ID).is_err());
		assert!(first.element(tags::SERIES_INSTANCE_UID).is_err());

		let second = generator.next().unwrap();
		assert_eq!(second.element(tags::PATIENT_NAME).unwrap().to_str().unwrap(), "Jordan^Evan");

		assert!(generator.next().is_none());
		assert_eq!(generator.status(), Status::Success);
		assert!(generator.next().is_none());
		assert_eq!(generator.status(), Status::Success);
		assert_eq!(store.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn duplicates_yield_a_single_response() {
		let request = QueryRequest::new(
			vec![QueryAttribute::new(tags::PATIENT_NAME, VR::PN, scalar("Johnson^Jon"))],
			"STUDY",
		);
		let generator = FindResponseGenerator::new(&request, &store(), TIMEOUT).await.unwrap();
		assert_eq!(generator.remaining(), 1);
		assert_eq!(generator.count(), 1);
	}

	#[tokio::test]
	async fn patient_level_returns_patient_id() {
		let request = QueryRequest::new(
			vec![QueryAttribute::new(tags::PATIENT_NAME, VR::PN, scalar("Jon"))],
			"PATIENT ",
		);
		let mut generator = FindResponseGenerator::new(&request, &store(), TIMEOUT).await.unwrap();
		let identifier = generator.next().unwrap();
		assert_eq!(identifier.element(tags::PATIENT_ID).unwrap().to_str().unwrap(), "P1");
		assert_eq!(identifier.element(tags::QUERY_RETRIEVE_LEVEL).unwrap().to_str().unwrap(), "PATIENT");
	}

	#[tokio::test]
	async fn yields_every_match_then_success() {
		let request = QueryRequest::new(
			vec![QueryAttribute::new(tags::SERIES_INSTANCE_UID, VR::UI, AttributeValue::Absent)],
			"SERIES",
		);
		let mut generator = FindResponseGenerator::new(&request, &store(), TIMEOUT).await.unwrap();
		let total = generator.remaining();
		assert_eq!(total, 5);

		for _ in 0..total {
			assert!(generator.next().is_some());
			assert_eq!(generator.status(), Status::Pending);
		}
		assert!(generator.next().is_none());
		assert_eq!(generator.status(), Status::Success);
	}

	#[tokio::test]
	async fn cancel_stops_responses() {
		let store = RecordingStore {
			inner: store(),
			..Default::default()
		};
		let request = QueryRequest::new(
			vec![QueryAttribute::new(tags::SERIES_INSTANCE_UID, VR::UI, AttributeValue::Absent)],
			"SERIES",
		);
		let mut generator = FindResponseGenerator::new(&request, &store, TIMEOUT).await.unwrap();

		assert!(generator.next().is_some());
		assert!(generator.next().is_some());
		generator.cancel();
		assert_eq!(generator.status(), Status::Canceled);
		assert_eq!(generator.remaining(), 0);
		assert!(generator.next().is_none());
		assert!(generator.next().is_none());
		assert_eq!(generator.status(), Status::Canceled);
		assert_eq!(store.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn cancel_after_success_is_ignored() {
		let request = QueryRequest::new(
			vec![QueryAttribute::new(tags::PATIENT_NAME, VR::PN, scalar("Nobody"))],
			"STUDY",
		);
		let mut generator = FindResponseGenerator::new(&request, &store(), TIMEOUT).await.unwrap();
		assert!(generator.next().is_none());
		generator.cancel();
		assert_eq!(generator.status(), Status::Success);
	}

	#[tokio::test]
	async fn cancel_handle() {
		let request = QueryRequest::new(
			vec![QueryAttribute::new(tags::SERIES_INSTANCE_UID, VR::UI, AttributeValue::Absent)],
			"SERIES",
		);
		let generator = FindResponseGenerator::new(&request, &store(), TIMEOUT).await.unwrap();
		let handle = generator.cancel_handle();

		let mut responses = Box::pin(generator.into_responses());
		let first = responses.next().await.unwrap();
		assert_eq!(first.status, Status::Pending);
		assert!(first.identifier.is_some());

		handle.cancel();
		let last = responses.next().await.unwrap();
		assert_eq!(last.status, Status::Canceled);
		assert!(last.identifier.is_none());
		assert!(responses.next().await.is_none());
	}

	#[tokio::test]
	async fn responses_end_with_success() {
		let responses: Vec<FindResponse> = FindResponseGenerator::new(&study_request(), &store(), TIMEOUT)
			.await
			.unwrap()
			.into_responses()
			.collect()
			.await;

		let statuses: Vec<US> = responses.iter().map(|response| response.status.code()).collect();
		assert_eq!(statuses, vec![0xFF00, 0xFF00, 0x0000]);
		assert!(responses[2].identifier.is_none());
	}

	#[tokio::test]
	async fn store_failures_are_fatal() {
		let result = FindResponseGenerator::new(&study_request(), &FailingStore, TIMEOUT).await;
		let err = result.unwrap_err();
		assert!(matches!(err, FindError::Store(StoreError::Malformed(_))));
		assert_eq!(err.code(), 0xC000);
	}

	#[tokio::test(start_paused = true)]
	async fn store_timeouts_are_fatal() {
		let result =
			FindResponseGenerator::new(&study_request(), &SlowStore, Duration::from_secs(1)).await;
		assert!(matches!(result, Err(FindError::Timeout(_))));
	}

	#[tokio::test]
	async fn sequence_matching_is_rejected() {
		let store = RecordingStore::default();
		let item = vec![QueryAttribute::new(tags::REQUESTED_PROCEDURE_ID, VR::SH, scalar("RP1"))];
		let request = QueryRequest::new(
			vec![QueryAttribute::new(
				tags::REQUEST_ATTRIBUTES_SEQUENCE,
				VR::SQ,
				AttributeValue::Items(vec![item]),
			)],
			"SERIES",
		);

		let result = FindResponseGenerator::new(&request, &store, TIMEOUT).await;
		assert!(matches!(
			result,
			Err(FindError::Match(MatchError::SequenceMatching { .. }))
		));
		assert_eq!(store.calls.load(Ordering::SeqCst), 0);
	}
}
