use crate::query::{Filter, ProjectionSet};
use crate::store::{DocumentStore, Record, StoreError};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Client, Collection};
use tracing::{debug, instrument};

/// A document store backed by a MongoDB collection holding one document per record.
pub struct MongoStore {
	collection: Collection<Document>,
}

impl MongoStore {
	pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, StoreError> {
		let client = Client::with_uri_str(uri).await.map_err(backend)?;
		debug!(database, collection, "Connected to MongoDB");
		Ok(Self::new(client.database(database).collection(collection)))
	}

	pub const fn new(collection: Collection<Document>) -> Self {
		Self { collection }
	}

	/// Matches the filter, then groups by every projected field so that records equal on all of
	/// them are returned once.
	fn pipeline(filter: &Filter, projection: &ProjectionSet) -> Result<Vec<Document>, StoreError> {
		let filter = bson::to_document(&filter.to_document()).map_err(backend)?;
		let key: Document = projection
			.iter()
			.map(|code| (code.to_string(), Bson::String(format!("${code}"))))
			.collect();

		Ok(vec![
			doc! { "$match": filter },
			doc! { "$group": { "_id": key } },
			doc! { "$replaceRoot": { "newRoot": "$_id" } },
		])
	}
}

#[async_trait]
impl DocumentStore for MongoStore {
	#[instrument(skip_all)]
	async fn find(
		&self,
		filter: &Filter,
		projection: &ProjectionSet,
	) -> Result<Vec<Record>, StoreError> {
		let pipeline = Self::pipeline(filter, projection)?;
		let mut cursor = self.collection.aggregate(pipeline).await.map_err(backend)?;

		let mut records = Vec::new();
		while let Some(document) = cursor.try_next().await.map_err(backend)? {
			// Fields missing from a record are grouped as null
			let document: Document = document
				.into_iter()
				.filter(|(_, value)| !matches!(value, Bson::Null))
				.collect();
			let record = bson::from_document(document)
				.map_err(|err| StoreError::Malformed(err.to_string()))?;
			records.push(record);
		}
		Ok(records)
	}
}

fn backend<E>(err: E) -> StoreError
where
	E: std::error::Error + Send + Sync + 'static,
{
	StoreError::Backend {
		source: Box::new(err),
	}
}
