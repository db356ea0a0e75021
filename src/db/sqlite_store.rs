use async_trait::async_trait;
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{ConfigStore, SortKeyRange, StoreKey, StoreResult, StoredItem};
use crate::utils::utc_now;

/// `ConfigStore` over the single `config_items` table.
#[derive(Debug, Clone)]
pub struct SqliteConfigStore {
	pool: SqlitePool,
}

impl SqliteConfigStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
	async fn get(&self, key: &StoreKey) -> StoreResult<Option<Value>> {
		let row = sqlx::query("SELECT data FROM config_items WHERE pk = ? AND sk = ?")
			.bind(&key.pk)
			.bind(&key.sk)
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => {
				let raw: String = row.try_get("data")?;
				Ok(Some(serde_json::from_str(&raw)?))
			}
			None => Ok(None),
		}
	}

	async fn put(&self, key: &StoreKey, data: &Value) -> StoreResult<()> {
		let raw = serde_json::to_string(data)?;
		sqlx::query(
			r#"
			INSERT INTO config_items (pk, sk, data, updated_at) VALUES (?, ?, ?, ?)
			ON CONFLICT (pk, sk) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
			"#,
		)
		.bind(&key.pk)
		.bind(&key.sk)
		.bind(raw)
		.bind(utc_now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn put_if_absent(&self, key: &StoreKey, data: &Value) -> StoreResult<bool> {
		let raw = serde_json::to_string(data)?;
		let result = sqlx::query("INSERT OR IGNORE INTO config_items (pk, sk, data, updated_at) VALUES (?, ?, ?, ?)")
			.bind(&key.pk)
			.bind(&key.sk)
			.bind(raw)
			.bind(utc_now().to_rfc3339())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	async fn put_if_match(&self, key: &StoreKey, expected: &Value, data: &Value) -> StoreResult<bool> {
		let expected = serde_json::to_string(expected)?;
		let raw = serde_json::to_string(data)?;
		let result = sqlx::query("UPDATE config_items SET data = ?, updated_at = ? WHERE pk = ? AND sk = ? AND data = ?")
			.bind(raw)
			.bind(utc_now().to_rfc3339())
			.bind(&key.pk)
			.bind(&key.sk)
			.bind(expected)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	async fn query(&self, pk: &str, range: &SortKeyRange) -> StoreResult<Vec<StoredItem>> {
		let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT pk, sk, data FROM config_items WHERE pk = ");
		builder.push_bind(pk);
		if let Some(from) = &range.from {
			builder.push(" AND sk >= ").push_bind(from.clone());
		}
		if let Some(to) = &range.to {
			builder.push(" AND sk <= ").push_bind(to.clone());
		}
		if let Some(after) = &range.after {
			builder.push(" AND sk > ").push_bind(after.clone());
		}
		builder.push(" ORDER BY sk ASC");
		if let Some(limit) = range.limit {
			builder.push(" LIMIT ").push_bind(limit as i64);
		}

		let rows = builder.build().fetch_all(&self.pool).await?;

		rows.iter()
			.map(|row| {
				let raw: String = row.try_get("data")?;
				Ok(StoredItem {
					key: StoreKey::new(row.try_get::<String, _>("pk")?, row.try_get::<String, _>("sk")?),
					data: serde_json::from_str(&raw)?,
				})
			})
			.collect()
	}
}
