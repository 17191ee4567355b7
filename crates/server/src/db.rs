use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub type DbPool = Pool<Sqlite>;

pub async fn connect(database_url: &str) -> anyhow::Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    // An in-memory database exists per connection; more than one in the pool
    // would each see their own empty schema.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_migrate() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let result =
            sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='apps'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn test_events_table_has_sequence_index() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let result = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='index' AND name='idx_events_app_sequence'",
        )
        .fetch_optional(&pool)
        .await
        .unwrap();
        assert!(result.is_some());
    }
}
