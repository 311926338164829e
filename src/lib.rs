//! Query matching and response generation for DICOM C-FIND style queries against a document
//! store.
//!
//! A [QueryRequest] is compiled into a store [Filter] and a [ProjectionSet]. The
//! [FindResponseGenerator] runs the query and hands out one response per distinct match,
//! following the Pending / Success / Canceled protocol of the Query/Retrieve service.
//!
//! ```no_run
//! # async fn run(identifier: dicom::object::InMemDicomObject) -> Result<(), dicom_find::FindError> {
//! use dicom_find::{FindResponseGenerator, MemoryStore, QueryRequest};
//! use std::time::Duration;
//!
//! let store = MemoryStore::load("datasets.json").await?;
//! let request = QueryRequest::from_identifier(&identifier);
//! let generator = FindResponseGenerator::new(&request, &store, Duration::from_secs(30)).await?;
//! for response in generator {
//! 	// send a pending C-FIND-RSP carrying `response`
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod generator;
pub mod query;
pub mod store;
pub mod types;

pub use generator::{CancelHandle, FindError, FindResponse, FindResponseGenerator};
pub use query::{
	AttributeValue, Filter, MatchError, MatchType, ProjectionSet, QueryAttribute, QueryRequest,
};
pub use store::{DocumentStore, MemoryStore, Record, StoreError};
pub use types::{AttributeCode, QueryRetrieveLevel, Status};
