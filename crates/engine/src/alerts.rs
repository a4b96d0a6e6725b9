//! Active alert catalog: alerts joined with their saved searches.
//!
//! Both tables are written by the query API; the dispatcher only reads them.

use sqlx::PgPool;
use uuid::Uuid;

use newswire_common::error::DispatchError;
use newswire_common::types::{Alert, SavedSearch};

/// An active alert together with the search it subscribes to.
#[derive(Debug, Clone)]
pub struct ActiveAlert {
    pub alert: Alert,
    pub search: SavedSearch,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveAlertRow {
    alert_id: Uuid,
    user_id: Uuid,
    channel: String,
    target: String,
    saved_search_id: Uuid,
    name: Option<String>,
    query: String,
    days: i32,
    category: Option<String>,
    source: Option<String>,
}

impl From<ActiveAlertRow> for ActiveAlert {
    fn from(row: ActiveAlertRow) -> Self {
        Self {
            alert: Alert {
                id: row.alert_id,
                user_id: row.user_id,
                channel: row.channel,
                target: row.target,
                saved_search_id: row.saved_search_id,
                active: true,
            },
            search: SavedSearch {
                id: row.saved_search_id,
                user_id: row.user_id,
                name: row.name,
                query: row.query,
                days: row.days,
                category: row.category,
                source: row.source,
            },
        }
    }
}

/// Read-side access to alerts.
pub struct AlertCatalog;

impl AlertCatalog {
    /// All active alerts, in a stable order.
    pub async fn load_active(pool: &PgPool) -> Result<Vec<ActiveAlert>, DispatchError> {
        let rows: Vec<ActiveAlertRow> = sqlx::query_as(
            r#"
            SELECT
              a.id AS alert_id,
              a.user_id,
              a.channel,
              a.target,
              a.saved_search_id,
              ss.name,
              COALESCE(ss.query, '') AS query,
              COALESCE(ss.days, 7) AS days,
              NULLIF(ss.category, '') AS category,
              NULLIF(ss.source, '') AS source
            FROM alerts a
            JOIN saved_searches ss ON ss.id = a.saved_search_id
            WHERE a.active = true
            ORDER BY a.id
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(ActiveAlert::from).collect())
    }
}
