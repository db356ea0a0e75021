use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{ConfigStore, SortKeyRange, StoreError, StoreKey, StoreResult, StoredItem};

/// In-process `ConfigStore`. Failures can be switched on to exercise fail-closed paths.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
	items: Mutex<BTreeMap<StoreKey, Value>>,
	unavailable: AtomicBool,
	failing_partition_prefix: Mutex<Option<String>>,
}

impl MemoryConfigStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every operation fails while set.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.unavailable.store(unavailable, Ordering::SeqCst);
	}

	/// Writes to partitions starting with `prefix` fail; reads keep working.
	pub fn fail_writes_to(&self, prefix: Option<&str>) {
		*self.lock_prefix() = prefix.map(str::to_string);
	}

	pub fn len(&self) -> usize {
		self.lock_items().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lock_items(&self) -> std::sync::MutexGuard<'_, BTreeMap<StoreKey, Value>> {
		self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn lock_prefix(&self) -> std::sync::MutexGuard<'_, Option<String>> {
		self.failing_partition_prefix
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn check_available(&self) -> StoreResult<()> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(StoreError::Unavailable("memory store switched off".to_string()));
		}
		Ok(())
	}

	fn check_writable(&self, key: &StoreKey) -> StoreResult<()> {
		self.check_available()?;
		if let Some(prefix) = self.lock_prefix().as_deref() {
			if key.pk.starts_with(prefix) {
				return Err(StoreError::Unavailable(format!("writes to {} are failing", key.pk)));
			}
		}
		Ok(())
	}
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
	async fn get(&self, key: &StoreKey) -> StoreResult<Option<Value>> {
		self.check_available()?;
		Ok(self.lock_items().get(key).cloned())
	}

	async fn put(&self, key: &StoreKey, data: &Value) -> StoreResult<()> {
		self.check_writable(key)?;
		self.lock_items().insert(key.clone(), data.clone());
		Ok(())
	}

	async fn put_if_absent(&self, key: &StoreKey, data: &Value) -> StoreResult<bool> {
		self.check_writable(key)?;
		let mut items = self.lock_items();
		if items.contains_key(key) {
			return Ok(false);
		}
		items.insert(key.clone(), data.clone());
		Ok(true)
	}

	async fn put_if_match(&self, key: &StoreKey, expected: &Value, data: &Value) -> StoreResult<bool> {
		self.check_writable(key)?;
		let mut items = self.lock_items();
		match items.get_mut(key) {
			Some(current) if current == expected => {
				*current = data.clone();
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn query(&self, pk: &str, range: &SortKeyRange) -> StoreResult<Vec<StoredItem>> {
		self.check_available()?;
		Ok(self
			.lock_items()
			.iter()
			.filter(|(key, _)| key.pk == pk && range.contains(&key.sk))
			.take(range.limit.unwrap_or(usize::MAX))
			.map(|(key, data)| StoredItem {
				key: key.clone(),
				data: data.clone(),
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn put_if_absent_refuses_existing_key() {
		let store = MemoryConfigStore::new();
		let key = StoreKey::new("AUDIT#X", "2025-01-01T00:00:00.000000Z#u1");

		assert!(store.put_if_absent(&key, &json!({"n": 1})).await.unwrap());
		assert!(!store.put_if_absent(&key, &json!({"n": 2})).await.unwrap());
		assert_eq!(store.get(&key).await.unwrap(), Some(json!({"n": 1})));
	}

	#[tokio::test]
	async fn put_if_match_requires_unchanged_item() {
		let store = MemoryConfigStore::new();
		let key = StoreKey::new("TEMP_ACCESS", "tm-1");

		assert!(!store.put_if_match(&key, &json!({"v": 1}), &json!({"v": 2})).await.unwrap());
		store.put(&key, &json!({"v": 1})).await.unwrap();
		assert!(store.put_if_match(&key, &json!({"v": 1}), &json!({"v": 2})).await.unwrap());
		assert!(!store.put_if_match(&key, &json!({"v": 1}), &json!({"v": 3})).await.unwrap());
		assert_eq!(store.get(&key).await.unwrap(), Some(json!({"v": 2})));
	}

	#[tokio::test]
	async fn query_respects_partition_and_range() {
		let store = MemoryConfigStore::new();
		for sk in ["a", "b", "c", "d"] {
			store.put(&StoreKey::new("P", sk), &json!(sk)).await.unwrap();
		}
		store.put(&StoreKey::new("Q", "b"), &json!("other")).await.unwrap();

		let range = SortKeyRange {
			from: Some("b".into()),
			to: Some("d".into()),
			after: Some("b".into()),
			limit: None,
		};
		let items = store.query("P", &range).await.unwrap();
		let sks: Vec<_> = items.iter().map(|i| i.key.sk.as_str()).collect();
		assert_eq!(sks, vec!["c", "d"]);

		let first = SortKeyRange {
			limit: Some(1),
			..range
		};
		let items = store.query("P", &first).await.unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0].key.sk, "c");
	}

	#[tokio::test]
	async fn failing_prefix_blocks_only_matching_writes() {
		let store = MemoryConfigStore::new();
		store.fail_writes_to(Some("AUDIT#"));

		assert!(store.put(&StoreKey::new("AUDIT#PERMISSION_DENIAL", "x"), &json!(1)).await.is_err());
		assert!(store.put(&StoreKey::new("CONFIG", "SYSTEM"), &json!(1)).await.is_ok());
	}
}
