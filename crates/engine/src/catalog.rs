//! Article catalog introspection.
//!
//! The catalog is owned by the ingestion side and its optional columns vary
//! between deployments. Each run reads `information_schema` once and builds
//! its queries from whatever columns actually exist, so a missing optional
//! column narrows the search instead of failing it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use newswire_common::error::DispatchError;
use newswire_common::types::SavedSearch;

/// Columns without which no article can be matched or rendered.
const REQUIRED_ARTICLE_COLUMNS: &[&str] = &["id", "title", "url", "created_at"];

/// Tables the dispatcher writes to.
const DELIVERY_TABLES: &[&str] = &["alert_deliveries", "alert_delivery_cursors"];

/// Longest slice of full content pulled in when an article has no summary.
const CONTENT_PREVIEW_CHARS: u32 = 1000;

/// Snapshot of which optional catalog columns exist.
#[derive(Debug, Clone, Default)]
pub struct CatalogSchema {
    columns: HashSet<String>,
    sources_table: bool,
}

impl CatalogSchema {
    /// Read the `articles` columns and check for a `sources` table.
    pub async fn introspect(pool: &PgPool) -> Result<Self, DispatchError> {
        let columns: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = 'articles'
            "#,
        )
        .fetch_all(pool)
        .await?;

        let sources_table = table_exists(pool, "sources").await?;
        let schema = Self::from_columns(columns.into_iter().map(|(c,)| c), sources_table);
        schema.ensure_required()?;

        tracing::info!(
            columns = schema.columns.len(),
            search_tsv = schema.has("search_tsv"),
            published_at = schema.has("published_at"),
            sources_table = schema.sources_table,
            "Article catalog introspected"
        );

        Ok(schema)
    }

    pub fn from_columns<I, S>(columns: I, sources_table: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            sources_table,
        }
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn ensure_required(&self) -> Result<(), DispatchError> {
        for column in REQUIRED_ARTICLE_COLUMNS {
            if !self.has(column) {
                return Err(DispatchError::Schema(format!("articles.{} missing", column)));
            }
        }
        Ok(())
    }

    /// Publication time, falling back to ingestion time.
    fn ts_expr(&self) -> &'static str {
        if self.has("published_at") {
            "COALESCE(a.published_at, a.created_at)"
        } else {
            "a.created_at"
        }
    }

    fn joins_sources(&self) -> bool {
        self.sources_table && self.has("source_id")
    }

    fn category_expr(&self) -> Option<&'static str> {
        if self.has("category_guess") {
            Some("a.category_guess")
        } else if self.has("category") {
            Some("a.category")
        } else {
            None
        }
    }

    fn summary_expr(&self) -> String {
        let mut parts = Vec::new();
        if self.has("summary") {
            parts.push("a.summary".to_string());
        }
        for column in ["content_clean", "content"] {
            if self.has(column) {
                parts.push(format!("LEFT(a.{}, {})", column, CONTENT_PREVIEW_CHARS));
            }
        }
        coalesce(parts)
    }

    fn source_name_expr(&self) -> String {
        let mut parts = Vec::new();
        if self.joins_sources() {
            parts.push("s.name".to_string());
        }
        for column in ["source_name", "source"] {
            if self.has(column) {
                parts.push(format!("a.{}", column));
            }
        }
        coalesce(parts)
    }

    /// Columns searched by substring when no full-text index exists.
    fn text_search_columns(&self) -> Vec<&'static str> {
        let mut cols = vec!["a.title"];
        for (column, expr) in [
            ("summary", "a.summary"),
            ("content_clean", "a.content_clean"),
            ("content", "a.content"),
            ("translated_content", "a.translated_content"),
        ] {
            if self.has(column) {
                cols.push(expr);
            }
        }
        cols
    }

    fn source_filter_exprs(&self) -> Vec<&'static str> {
        let mut exprs = Vec::new();
        if self.has("source_name") {
            exprs.push("a.source_name");
        }
        if self.has("source") {
            exprs.push("a.source");
        }
        if self.has("source_id") {
            exprs.push("a.source_id::text");
        }
        if self.joins_sources() {
            exprs.push("s.name");
        }
        exprs
    }

    fn push_select(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push("SELECT a.id::bigint AS id, a.title::text AS title, a.url::text AS url, ");
        qb.push(self.summary_expr());
        qb.push(" AS summary, ");
        qb.push(self.category_expr().unwrap_or("NULL::text"));
        qb.push(" AS category, ");
        qb.push(self.source_name_expr());
        qb.push(" AS source_name, (");
        qb.push(self.ts_expr());
        qb.push(")::timestamptz AS published_at FROM articles a ");
        if self.joins_sources() {
            qb.push("LEFT JOIN sources s ON s.id::text = a.source_id::text ");
        }
    }

    /// Query for a saved search's matches newer than `resume`, newest first.
    ///
    /// Without a resume point the search's own lookback window applies.
    pub fn match_query(
        &self,
        search: &SavedSearch,
        resume: Option<DateTime<Utc>>,
        limit: i64,
    ) -> QueryBuilder<'static, Postgres> {
        let ts = self.ts_expr();
        let mut qb = QueryBuilder::new("");
        self.push_select(&mut qb);

        qb.push("WHERE ");
        qb.push(ts);
        match resume {
            Some(start) => {
                qb.push(" >= ");
                qb.push_bind(start);
            }
            None => {
                qb.push(" >= now() - make_interval(days => ");
                qb.push_bind(search.days.max(1));
                qb.push(")");
            }
        }

        let query = search.query.trim();
        if !query.is_empty() {
            if self.has("search_tsv") {
                qb.push(" AND a.search_tsv @@ websearch_to_tsquery('english', ");
                qb.push_bind(query.to_string());
                qb.push(")");
            } else {
                let pattern = like_pattern(query);
                qb.push(" AND (");
                {
                    let mut any = qb.separated(" OR ");
                    for column in self.text_search_columns() {
                        any.push(format!("{} ILIKE ", column));
                        any.push_bind_unseparated(pattern.clone());
                    }
                }
                qb.push(")");
            }
        }

        // Category equality ignores case: ingestion writes "Energy" and
        // "energy" alike, and a search for either must see both.
        if let Some(category) = non_blank(search.category.as_deref()) {
            match self.category_expr() {
                Some(expr) => {
                    qb.push(format!(" AND lower({}) = lower(", expr));
                    qb.push_bind(category.to_string());
                    qb.push(")");
                }
                None => tracing::debug!(
                    saved_search_id = %search.id,
                    "Catalog has no category column, category filter ignored"
                ),
            }
        }

        if let Some(source) = non_blank(search.source.as_deref()) {
            let exprs = self.source_filter_exprs();
            if exprs.is_empty() {
                tracing::debug!(
                    saved_search_id = %search.id,
                    "Catalog has no source column, source filter ignored"
                );
            } else {
                let pattern = like_pattern(source);
                qb.push(" AND (");
                {
                    let mut any = qb.separated(" OR ");
                    for expr in exprs {
                        any.push(format!("{} ILIKE ", expr));
                        any.push_bind_unseparated(pattern.clone());
                    }
                }
                qb.push(")");
            }
        }

        qb.push(" ORDER BY ");
        qb.push(ts);
        qb.push(" DESC, a.id DESC LIMIT ");
        qb.push_bind(limit);
        qb
    }

    /// Query for a single article by id.
    pub fn article_query(&self, article_id: i64) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("");
        self.push_select(&mut qb);
        qb.push("WHERE a.id = ");
        qb.push_bind(article_id);
        qb
    }
}

/// Fail the run early when the delivery tables have not been migrated.
pub async fn ensure_delivery_tables(pool: &PgPool) -> Result<(), DispatchError> {
    for table in DELIVERY_TABLES {
        if !table_exists(pool, table).await? {
            return Err(DispatchError::Schema(format!(
                "{} table missing (run migrations)",
                table
            )));
        }
    }
    Ok(())
}

async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, DispatchError> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

fn coalesce(parts: Vec<String>) -> String {
    match parts.len() {
        0 => "NULL::text".to_string(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("COALESCE({})", parts.join(", ")),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Wrap a user string for a substring `ILIKE`, escaping its wildcards.
pub fn like_pattern(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn minimal() -> CatalogSchema {
        CatalogSchema::from_columns(["id", "title", "url", "created_at"], false)
    }

    fn full() -> CatalogSchema {
        CatalogSchema::from_columns(
            [
                "id",
                "title",
                "url",
                "created_at",
                "published_at",
                "summary",
                "content",
                "category_guess",
                "source_id",
                "source_name",
            ],
            true,
        )
    }

    fn search(query: &str, category: Option<&str>, source: Option<&str>) -> SavedSearch {
        SavedSearch {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: Some("Energy".to_string()),
            query: query.to_string(),
            days: 7,
            category: category.map(str::to_string),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn test_required_columns() {
        assert!(minimal().ensure_required().is_ok());
        let broken = CatalogSchema::from_columns(["id", "title", "url"], false);
        assert!(matches!(
            broken.ensure_required(),
            Err(DispatchError::Schema(msg)) if msg.contains("created_at")
        ));
    }

    #[test]
    fn test_minimal_schema_degrades() {
        let qb = minimal().match_query(&search("oil", Some("energy"), Some("reuters")), None, 50);
        let sql = qb.sql();
        assert!(sql.contains("NULL::text AS summary"));
        assert!(sql.contains("NULL::text AS category"));
        assert!(sql.contains("a.created_at >= now() - make_interval(days => $1)"));
        assert!(sql.contains("a.title ILIKE $2"));
        assert!(!sql.contains("lower("));
        assert!(!sql.contains("LEFT JOIN sources"));
        assert!(sql.ends_with("LIMIT $3"));
    }

    #[test]
    fn test_full_schema_uses_every_column() {
        let resume = Utc::now();
        let qb = full().match_query(&search("oil", Some("energy"), Some("reuters")), Some(resume), 50);
        let sql = qb.sql();
        assert!(sql.contains("COALESCE(a.published_at, a.created_at) >= $1"));
        assert!(sql.contains("a.summary ILIKE $3"));
        assert!(sql.contains("a.content ILIKE $4"));
        assert!(sql.contains("lower(a.category_guess) = lower($5)"));
        assert!(sql.contains("s.name ILIKE"));
        assert!(sql.contains("LEFT JOIN sources s"));
        assert!(sql.contains("COALESCE(s.name, a.source_name) AS source_name"));
    }

    #[test]
    fn test_category_match_ignores_case() {
        let qb = full().match_query(&search("", Some("Energy"), None), None, 10);
        let sql = qb.sql();
        assert!(sql.contains("AND lower(a.category_guess) = lower($"));
        assert!(!sql.contains("a.category_guess = $"));
    }

    #[test]
    fn test_full_text_index_preferred() {
        let schema = CatalogSchema::from_columns(
            ["id", "title", "url", "created_at", "search_tsv", "summary"],
            false,
        );
        let qb = schema.match_query(&search("oil tender", None, None), None, 10);
        let sql = qb.sql();
        assert!(sql.contains("websearch_to_tsquery('english', $2)"));
        assert!(!sql.contains("ILIKE"));
        assert!(sql.contains("ORDER BY a.created_at DESC"));
    }

    #[test]
    fn test_empty_query_matches_all() {
        let qb = full().match_query(&search("  ", None, None), None, 10);
        let sql = qb.sql();
        assert!(!sql.contains("ILIKE"));
        assert!(!sql.contains("tsquery"));
    }

    #[test]
    fn test_article_query() {
        let qb = full().article_query(7);
        assert!(qb.sql().ends_with("WHERE a.id = $1"));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("oil"), "%oil%");
    }
}
