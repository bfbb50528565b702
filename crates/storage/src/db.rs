use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use std::path::Path;
use std::time::Duration;
use tally_core::{
    Category, CategoryId, NewTransaction, StorageError, Transaction, TransactionId,
    TransactionKind,
};
use tokio::sync::Mutex;
use uuid::Uuid;

pub type DbPool = Pool<Sqlite>;

/// Rows per multi-row INSERT / IN list. Keeps the bind count (7 per
/// transaction row) far below SQLite's variable limit.
const CHUNK_ROWS: usize = 500;

type TransactionRow = (
    String,
    Option<String>,
    String,
    i64,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    tracing::debug!("Database ready: {}", path.display());

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            title TEXT,
            value INTEGER NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('income', 'outcome')),
            category_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (category_id) REFERENCES categories(id)
                ON DELETE SET NULL ON UPDATE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) fn map_err(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Conflict(db.message().to_string())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("bad id '{raw}': {e}")))
}

fn row_to_transaction(r: TransactionRow) -> Result<Transaction, StorageError> {
    let kind = r
        .2
        .parse::<TransactionKind>()
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let category_id = r.4.as_deref().map(parse_uuid).transpose()?.map(CategoryId);
    Ok(Transaction {
        id: TransactionId(parse_uuid(&r.0)?),
        title: r.1,
        kind,
        value: r.3,
        category_id,
        created_at: r.5,
        updated_at: r.6,
    })
}

// ── Statements shared by the pooled gateway and the unit of work ─────────────

pub(crate) async fn select_categories(
    conn: &mut SqliteConnection,
    titles: &[String],
) -> Result<Vec<Category>, StorageError> {
    let mut found = Vec::new();
    for chunk in titles.chunks(CHUNK_ROWS) {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, title FROM categories WHERE title IN (");
        let mut list = qb.separated(", ");
        for title in chunk {
            list.push_bind(title.clone());
        }
        list.push_unseparated(")");

        let rows = qb
            .build_query_as::<(String, String)>()
            .fetch_all(&mut *conn)
            .await
            .map_err(map_err)?;
        for (id, title) in rows {
            found.push(Category {
                id: CategoryId(parse_uuid(&id)?),
                title,
            });
        }
    }
    Ok(found)
}

pub(crate) async fn insert_categories(
    conn: &mut SqliteConnection,
    titles: &[String],
) -> Result<Vec<Category>, StorageError> {
    let now = Utc::now();
    let created: Vec<Category> = titles.iter().map(|t| Category::new(t)).collect();
    for chunk in created.chunks(CHUNK_ROWS) {
        let mut qb =
            QueryBuilder::<Sqlite>::new("INSERT INTO categories (id, title, created_at, updated_at) ");
        qb.push_values(chunk, |mut row, category| {
            row.push_bind(category.id.to_string())
                .push_bind(category.title.clone())
                .push_bind(now)
                .push_bind(now);
        });
        qb.build().execute(&mut *conn).await.map_err(map_err)?;
    }
    tracing::debug!(count = created.len(), "Inserted categories");
    Ok(created)
}

pub(crate) async fn insert_transactions(
    conn: &mut SqliteConnection,
    records: &[NewTransaction],
) -> Result<Vec<Transaction>, StorageError> {
    let now = Utc::now();
    let created: Vec<Transaction> = records
        .iter()
        .cloned()
        .map(|r| Transaction::from_new(r, now))
        .collect();
    for chunk in created.chunks(CHUNK_ROWS) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT INTO transactions (id, title, value, type, category_id, created_at, updated_at) ",
        );
        qb.push_values(chunk, |mut row, tx| {
            row.push_bind(tx.id.to_string())
                .push_bind(tx.title.clone())
                .push_bind(tx.value)
                .push_bind(tx.kind.as_str())
                .push_bind(tx.category_id.map(|c| c.to_string()))
                .push_bind(tx.created_at)
                .push_bind(tx.updated_at);
        });
        qb.build().execute(&mut *conn).await.map_err(map_err)?;
    }
    Ok(created)
}

pub(crate) async fn remove_transaction(
    conn: &mut SqliteConnection,
    id: TransactionId,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(map_err)?;
    Ok(())
}

pub(crate) async fn select_transactions(
    conn: &mut SqliteConnection,
) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT id, title, type, value, category_id, created_at, updated_at FROM transactions ORDER BY created_at, rowid",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(map_err)?;

    rows.into_iter().map(row_to_transaction).collect()
}

// ── Gateways ──────────────────────────────────────────────────────────────────

/// Pool-backed gateway. Each call runs on its own connection; bulk creates
/// are wrapped in their own database transaction.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: DbPool,
}

impl SqliteGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Open a unit of work. Nothing written through it is visible to other
    /// connections until [`SqliteUnitOfWork::commit`].
    pub async fn begin(&self) -> Result<SqliteUnitOfWork, StorageError> {
        let tx = self.pool.begin().await.map_err(map_err)?;
        Ok(SqliteUnitOfWork {
            tx: Mutex::new(tx),
        })
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(map_err)?;
        select_transactions(&mut conn).await
    }
}

impl tally_core::StorageGateway for SqliteGateway {
    async fn find_categories_by_titles(
        &self,
        titles: &[String],
    ) -> Result<Vec<Category>, StorageError> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await.map_err(map_err)?;
        select_categories(&mut conn, titles).await
    }

    async fn create_categories(&self, titles: &[String]) -> Result<Vec<Category>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let created = insert_categories(&mut tx, titles).await?;
        tx.commit().await.map_err(map_err)?;
        Ok(created)
    }

    async fn create_transactions(
        &self,
        records: &[NewTransaction],
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let created = insert_transactions(&mut tx, records).await?;
        tx.commit().await.map_err(map_err)?;
        Ok(created)
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(map_err)?;
        remove_transaction(&mut conn, id).await
    }
}

/// A gateway bound to one open database transaction. Dropping it without
/// calling [`commit`](Self::commit) rolls everything back.
pub struct SqliteUnitOfWork {
    tx: Mutex<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteUnitOfWork {
    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.into_inner().commit().await.map_err(map_err)
    }

    pub async fn rollback(self) -> Result<(), StorageError> {
        self.tx.into_inner().rollback().await.map_err(map_err)
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        let mut tx = self.tx.lock().await;
        select_transactions(&mut tx).await
    }
}

impl tally_core::StorageGateway for SqliteUnitOfWork {
    async fn find_categories_by_titles(
        &self,
        titles: &[String],
    ) -> Result<Vec<Category>, StorageError> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.tx.lock().await;
        select_categories(&mut tx, titles).await
    }

    async fn create_categories(&self, titles: &[String]) -> Result<Vec<Category>, StorageError> {
        let mut tx = self.tx.lock().await;
        insert_categories(&mut tx, titles).await
    }

    async fn create_transactions(
        &self,
        records: &[NewTransaction],
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut tx = self.tx.lock().await;
        insert_transactions(&mut tx, records).await
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), StorageError> {
        let mut tx = self.tx.lock().await;
        remove_transaction(&mut tx, id).await
    }
}
