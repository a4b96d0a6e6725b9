//! Article matcher: finds catalog articles newly matching a saved search.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use newswire_common::error::DispatchError;
use newswire_common::types::{Article, SavedSearch};

use crate::catalog::CatalogSchema;
use crate::cursor::resume_point;

/// Runs saved-search predicates against the introspected catalog.
pub struct ArticleMatcher {
    schema: CatalogSchema,
    overlap_sec: i64,
}

impl ArticleMatcher {
    pub fn new(schema: CatalogSchema, overlap_sec: i64) -> Self {
        Self {
            schema,
            overlap_sec,
        }
    }

    pub fn schema(&self) -> &CatalogSchema {
        &self.schema
    }

    /// Matches for `search` newer than the cursor (minus the overlap margin),
    /// newest first, at most `limit` rows.
    pub async fn find_matches(
        &self,
        pool: &PgPool,
        search: &SavedSearch,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Article>, DispatchError> {
        let resume = resume_point(cursor, self.overlap_sec);
        let mut query = self.schema.match_query(search, resume, limit);
        let articles: Vec<Article> = query.build_query_as().fetch_all(pool).await?;

        tracing::debug!(
            saved_search_id = %search.id,
            resume = ?resume,
            matches = articles.len(),
            "Saved search evaluated"
        );

        Ok(articles)
    }

    /// Re-fetch one article for rendering. `None` when it no longer exists.
    pub async fn fetch_article(
        &self,
        pool: &PgPool,
        article_id: i64,
    ) -> Result<Option<Article>, DispatchError> {
        let mut query = self.schema.article_query(article_id);
        let article = query.build_query_as().fetch_optional(pool).await?;
        Ok(article)
    }
}
