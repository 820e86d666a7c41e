use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use landcost_core::domain::tariff::TariffCode;
use landcost_core::errors::ApplicationError;
use landcost_core::tariff::{IndexSearchOptions, TariffIndex, TariffIndexEntry};
use landcost_core::text;

use super::{format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Minimum token length used for full-text queries.
pub const MIN_QUERY_TOKEN_LEN: usize = 3;

pub struct SqlTariffIndex {
    pool: DbPool,
}

impl SqlTariffIndex {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_entries(&self, entries: &[TariffIndexEntry]) -> Result<(), RepositoryError> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let breadcrumb = serde_json::to_string(&entry.breadcrumb)
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO tariff_index (code, heading, label, breadcrumb_json, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(code) DO UPDATE SET
                    label = excluded.label,
                    breadcrumb_json = excluded.breadcrumb_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(entry.code.as_str())
            .bind(entry.code.heading())
            .bind(&entry.label)
            .bind(&breadcrumb)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM tariff_index_fts WHERE code = ?")
                .bind(entry.code.as_str())
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO tariff_index_fts (code, search_text) VALUES (?, ?)")
                .bind(entry.code.as_str())
                .bind(text::normalize(&entry.searchable_text()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn search_entries(
        &self,
        query: &str,
        options: &IndexSearchOptions,
    ) -> Result<Vec<TariffIndexEntry>, RepositoryError> {
        let Some(match_expression) = match_expression(query) else {
            return Ok(Vec::new());
        };
        let limit = i64::try_from(options.limit.max(1)).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT t.code, t.label, t.breadcrumb_json, t.updated_at
            FROM tariff_index_fts
            JOIN tariff_index t ON t.code = tariff_index_fts.code
            WHERE tariff_index_fts MATCH ?
              AND (? IS NULL OR t.heading = ?)
            ORDER BY t.updated_at DESC, t.code ASC
            LIMIT ?
            "#,
        )
        .bind(&match_expression)
        .bind(options.heading_filter.as_deref())
        .bind(options.heading_filter.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn get_entry(&self, code: &TariffCode) -> Result<Option<TariffIndexEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT code, label, breadcrumb_json, updated_at FROM tariff_index WHERE code = ?",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| entry_from_row(&row)).transpose()
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM tariff_index").fetch_one(&self.pool).await?;
        Ok(row.try_get("count")?)
    }
}

/// Prefix-match FTS5 expression: every token of at least three characters as `"tok"*`,
/// AND-combined. `None` when the query has no such token.
pub fn match_expression(query: &str) -> Option<String> {
    let tokens = text::tokens(query, MIN_QUERY_TOKEN_LEN);
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.iter().map(|token| format!("\"{token}\"*")).collect::<Vec<_>>().join(" AND "))
}

fn entry_from_row(row: &SqliteRow) -> Result<TariffIndexEntry, RepositoryError> {
    let code: String = row.try_get("code")?;
    let breadcrumb_json: String = row.try_get("breadcrumb_json")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(TariffIndexEntry {
        code: TariffCode::parse(&code)
            .map_err(|e| RepositoryError::Decode(format!("invalid code `{code}`: {e}")))?,
        label: row.try_get("label")?,
        breadcrumb: serde_json::from_str(&breadcrumb_json)
            .map_err(|e| RepositoryError::Decode(format!("invalid breadcrumb for `{code}`: {e}")))?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl TariffIndex for SqlTariffIndex {
    async fn upsert(&self, entries: &[TariffIndexEntry]) -> Result<(), ApplicationError> {
        Ok(self.upsert_entries(entries).await?)
    }

    async fn search(
        &self,
        query: &str,
        options: &IndexSearchOptions,
    ) -> Result<Vec<TariffIndexEntry>, ApplicationError> {
        Ok(self.search_entries(query, options).await?)
    }

    async fn get(&self, code: &TariffCode) -> Result<Option<TariffIndexEntry>, ApplicationError> {
        Ok(self.get_entry(code).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use landcost_core::domain::tariff::TariffCode;
    use landcost_core::tariff::{IndexSearchOptions, TariffIndex, TariffIndexEntry};

    use super::{match_expression, SqlTariffIndex};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn entry(code: &str, label: &str) -> TariffIndexEntry {
        TariffIndexEntry::new(
            TariffCode::parse(code).expect("code"),
            label,
            vec!["Sección XVII".to_string(), "Capítulo 87".to_string()],
        )
    }

    #[test]
    fn builds_prefix_match_expression() {
        assert_eq!(
            match_expression("Camión Volcador de 5t").as_deref(),
            Some("\"camion\"* AND \"volcador\"*")
        );
        assert_eq!(match_expression("a de 5"), None);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_search_matches_prefixes() {
        let index = SqlTariffIndex::new(setup_pool().await);
        let entries = vec![
            entry("8704.21.10", "Camiones volcadores de peso total inferior o igual a 5 t"),
            entry("8427.10.19", "Carretillas apiladoras con motor eléctrico"),
        ];
        index.upsert(&entries).await.expect("first upsert");
        index.upsert(&entries).await.expect("second upsert");
        assert_eq!(index.count().await.expect("count"), 2);

        let hits = index.search("camion volc", &IndexSearchOptions::default()).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].code.as_str(), "8704.21.10");
        assert_eq!(hits[0].breadcrumb.len(), 2);

        let accents = index.search("eléctrico", &IndexSearchOptions::default()).await.expect("search");
        assert_eq!(accents.len(), 1);
        assert_eq!(accents[0].code.as_str(), "8427.10.19");

        assert!(index.search("de a", &IndexSearchOptions::default()).await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn search_filters_heading_and_orders_by_recency() {
        let index = SqlTariffIndex::new(setup_pool().await);
        index.upsert(&[entry("8704.22.10", "Camiones volcadores hasta 20 t")]).await.expect("upsert");
        tokio::time::sleep(Duration::from_millis(5)).await;
        index.upsert(&[entry("8716.39.00", "Semirremolques volcadores")]).await.expect("upsert");

        let all = index.search("volcadores", &IndexSearchOptions::default()).await.expect("search");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].code.as_str(), "8716.39.00");

        let filtered = index
            .search(
                "volcadores",
                &IndexSearchOptions { limit: 8, heading_filter: Some("8704".to_string()) },
            )
            .await
            .expect("search");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].code.as_str(), "8704.22.10");
    }

    #[tokio::test]
    async fn upsert_replaces_label_in_full_text_table() {
        let index = SqlTariffIndex::new(setup_pool().await);
        index.upsert(&[entry("8428.10.00", "Ascensores")]).await.expect("upsert");
        index.upsert(&[entry("8428.10.00", "Montacargas de obra")]).await.expect("upsert");

        assert!(index.search("ascensores", &IndexSearchOptions::default()).await.expect("search").is_empty());
        let fetched = index
            .get(&TariffCode::parse("8428.10.00").expect("code"))
            .await
            .expect("get")
            .expect("present");
        assert_eq!(fetched.label, "Montacargas de obra");
    }
}
