use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryConfigStore;
pub use sqlite_store::SqliteConfigStore;

pub async fn init() -> anyhow::Result<SqlitePool> {
	let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

	let pool = SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect(&database_url)
		.await
		.context("failed to connect to database")?;

	sqlx::migrate!()
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	Ok(pool)
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("store unavailable: {0}")]
	Unavailable(String),
}

/// Two-part key: partition (`pk`) plus sort key (`sk`) within the partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
	pub pk: String,
	pub sk: String,
}

impl StoreKey {
	pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
		Self {
			pk: pk.into(),
			sk: sk.into(),
		}
	}
}

/// Well-known keys and partitions.
pub mod keys {
	use super::StoreKey;

	pub const CONFIG_PARTITION: &str = "CONFIG";
	pub const TEMP_ACCESS_PARTITION: &str = "TEMP_ACCESS";
	pub const AUDIT_DENIAL_PARTITION: &str = "AUDIT#PERMISSION_DENIAL";
	pub const AUDIT_BYPASS_PARTITION: &str = "AUDIT#PERMISSION_BYPASS";
	pub const AUDIT_CONFIG_CHANGE_PARTITION: &str = "AUDIT#CONFIG_CHANGE";

	pub fn system_config() -> StoreKey {
		StoreKey::new(CONFIG_PARTITION, "SYSTEM")
	}

	pub fn permission_matrix() -> StoreKey {
		StoreKey::new(CONFIG_PARTITION, "PERMISSIONS")
	}

	pub fn temporary_access(user_id: &str) -> StoreKey {
		StoreKey::new(TEMP_ACCESS_PARTITION, user_id)
	}
}

/// Bounds for a sort-key range query. `from`/`to` are inclusive, `after` is exclusive.
/// `limit` caps the number of items returned, taken from the low end.
#[derive(Debug, Clone, Default)]
pub struct SortKeyRange {
	pub from: Option<String>,
	pub to: Option<String>,
	pub after: Option<String>,
	pub limit: Option<usize>,
}

impl SortKeyRange {
	pub fn all() -> Self {
		Self::default()
	}

	pub fn contains(&self, sk: &str) -> bool {
		self.from.as_deref().map_or(true, |from| sk >= from)
			&& self.to.as_deref().map_or(true, |to| sk <= to)
			&& self.after.as_deref().map_or(true, |after| sk > after)
	}
}

#[derive(Debug, Clone)]
pub struct StoredItem {
	pub key: StoreKey,
	pub data: Value,
}

/// Generic key-value store with conditional writes and range queries.
#[async_trait]
pub trait ConfigStore: Send + Sync {
	async fn get(&self, key: &StoreKey) -> StoreResult<Option<Value>>;

	/// Create or overwrite.
	async fn put(&self, key: &StoreKey, data: &Value) -> StoreResult<()>;

	/// Write only when no item exists under `key`. Returns `false` when the key was taken.
	async fn put_if_absent(&self, key: &StoreKey, data: &Value) -> StoreResult<bool>;

	/// Overwrite only while the stored item still equals `expected`. Returns `false`
	/// when the item changed or is gone.
	async fn put_if_match(&self, key: &StoreKey, expected: &Value, data: &Value) -> StoreResult<bool>;

	/// Items of one partition whose sort key lies in `range`, ascending by sort key.
	async fn query(&self, pk: &str, range: &SortKeyRange) -> StoreResult<Vec<StoredItem>>;
}

pub async fn load<T: DeserializeOwned>(store: &dyn ConfigStore, key: &StoreKey) -> StoreResult<Option<T>> {
	match store.get(key).await? {
		Some(value) => Ok(Some(serde_json::from_value(value)?)),
		None => Ok(None),
	}
}

pub async fn save<T: Serialize + ?Sized>(store: &dyn ConfigStore, key: &StoreKey, item: &T) -> StoreResult<()> {
	let value = serde_json::to_value(item)?;
	store.put(key, &value).await
}
