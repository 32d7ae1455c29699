use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use crate::export::Sink;

pub const DEFAULT_DB_PATH: &str = "data/feed.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS items (
            link        TEXT PRIMARY KEY,
            parent_link TEXT,
            name        TEXT,
            handle      TEXT,
            date        TEXT,
            message     TEXT,
            likes       INTEGER NOT NULL DEFAULT 0,
            reposts     INTEGER NOT NULL DEFAULT 0,
            replies     INTEGER NOT NULL DEFAULT 0,
            bookmarks   INTEGER NOT NULL DEFAULT 0,
            views       INTEGER NOT NULL DEFAULT 0,
            buzz        REAL,
            keep        REAL,
            raw         TEXT NOT NULL,
            exported_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_items_buzz ON items(buzz);
        CREATE INDEX IF NOT EXISTS idx_items_keep ON items(keep);
        ",
    )?;
    Ok(())
}

fn text(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

fn count(item: &Value, key: &str) -> i64 {
    item.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Upsert exported items. A re-export of the same link replaces the row, so
/// the table always holds the latest scores.
pub fn save_items(conn: &Connection, items: &[Value]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut saved = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO items
             (link, parent_link, name, handle, date, message,
              likes, reposts, replies, bookmarks, views, buzz, keep, raw)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
        )?;
        for item in items {
            let Some(link) = text(item, "link").filter(|l| !l.is_empty()) else {
                continue;
            };
            saved += stmt.execute(rusqlite::params![
                link,
                text(item, "parent_link"),
                text(item, "name"),
                text(item, "handle"),
                text(item, "date"),
                text(item, "message"),
                count(item, "likes"),
                count(item, "reposts"),
                count(item, "replies"),
                count(item, "bookmarks"),
                count(item, "views"),
                item.get("buzz").and_then(Value::as_f64),
                item.get("keep").and_then(Value::as_f64),
                item.to_string(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(saved)
}

// ── Export sink ──

/// Writes each export into a SQLite table.
pub struct SqliteSink {
    path: PathBuf,
}

impl SqliteSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Sink for SqliteSink {
    fn name(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    async fn deliver(&self, payload: &str) -> Result<()> {
        let items: Vec<Value> = serde_json::from_str(payload).context("Export is not a JSON array")?;
        let path = self.path.clone();
        let saved = tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = connect(&path)?;
            init_schema(&conn)?;
            save_items(&conn, &items)
        })
        .await
        .context("SQLite writer panicked")??;
        info!("Saved {} items to {}", saved, self.path.display());
        Ok(())
    }
}

// ── Queries ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Axis {
    Buzz,
    Keep,
}

impl Axis {
    fn column(self) -> &'static str {
        match self {
            Axis::Buzz => "buzz",
            Axis::Keep => "keep",
        }
    }
}

#[derive(Debug)]
pub struct TopRow {
    pub link: String,
    pub handle: String,
    pub date: String,
    pub message: String,
    pub likes: i64,
    pub views: i64,
    pub buzz: Option<f64>,
    pub keep: Option<f64>,
}

pub fn fetch_top(conn: &Connection, by: Axis, limit: usize) -> Result<Vec<TopRow>> {
    let sql = format!(
        "SELECT link, COALESCE(handle,''), COALESCE(date,''), COALESCE(message,''),
                likes, views, buzz, keep
         FROM items
         WHERE {col} IS NOT NULL
         ORDER BY {col} DESC, link
         LIMIT {limit}",
        col = by.column(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TopRow {
                link: row.get(0)?,
                handle: row.get(1)?,
                date: row.get(2)?,
                message: row.get(3)?,
                likes: row.get(4)?,
                views: row.get(5)?,
                buzz: row.get(6)?,
                keep: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_items(conn: &Connection) -> Result<usize> {
    Ok(conn.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn exported() -> Vec<Value> {
        vec![
            json!({"link": "a", "handle": "ann", "likes": 10, "views": 100, "buzz": 100.0, "keep": 0.0}),
            json!({"link": "b", "handle": "bo", "parent_link": "a", "likes": 2, "buzz": 0.0, "keep": 100.0}),
            json!({"link": "c", "buzz": 40.5, "keep": 55.0, "custom": [1, 2]}),
            json!({"name": "no link"}),
        ]
    }

    #[test]
    fn upsert_replaces_rows() {
        let conn = memory();
        assert_eq!(save_items(&conn, &exported()).unwrap(), 3);
        assert_eq!(save_items(&conn, &exported()[..1]).unwrap(), 1);
        assert_eq!(count_items(&conn).unwrap(), 3);

        let raw: String = conn
            .query_row("SELECT raw FROM items WHERE link = 'c'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&raw).unwrap()["custom"], json!([1, 2]));
    }

    #[test]
    fn top_by_axis() {
        let conn = memory();
        save_items(&conn, &exported()).unwrap();

        let buzz: Vec<String> = fetch_top(&conn, Axis::Buzz, 10).unwrap().into_iter().map(|r| r.link).collect();
        assert_eq!(buzz, ["a", "c", "b"]);

        let keep = fetch_top(&conn, Axis::Keep, 1).unwrap();
        assert_eq!(keep.len(), 1);
        assert_eq!(keep[0].link, "b");
        assert_eq!(keep[0].handle, "bo");
        assert_eq!(keep[0].likes, 2);
    }

    #[test]
    fn unscored_rows_skipped_by_top() {
        let conn = memory();
        save_items(&conn, &[json!({"link": "x", "likes": 5})]).unwrap();
        assert_eq!(count_items(&conn).unwrap(), 1);
        assert!(fetch_top(&conn, Axis::Buzz, 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_writes_file() {
        let path = std::env::temp_dir().join(format!("feed_capture_sink_{}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let payload = serde_json::to_string_pretty(&exported()).unwrap();
        SqliteSink::new(&path).deliver(&payload).await.unwrap();

        let conn = connect(&path).unwrap();
        assert_eq!(count_items(&conn).unwrap(), 3);
        drop(conn);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn sink_rejects_non_array() {
        let sink = SqliteSink::new(std::env::temp_dir().join("feed_capture_never.sqlite"));
        assert!(sink.deliver("{\"link\": \"a\"}").await.is_err());
    }
}
