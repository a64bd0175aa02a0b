//! SQLite durable store.
//!
//! Each unit of work is one SQL transaction. Decimals are stored as their
//! canonical text form so no value ever passes through a float, and sums
//! are computed in Rust for the same reason.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use tracing::{debug, instrument};

use paycore_common::{
    parse_timestamp, AccountId, LedgerError, Result, Timestamp, TransactionId, TransactionStatus,
};

use crate::account::{Account, AccountProfile};
use crate::balance::BalanceChange;
use crate::config::LedgerConfig;
use crate::store::{AccountDirectory, DurableStore, UnitOfWork};
use crate::transaction::{NewTransaction, Transaction};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        email       TEXT NOT NULL UNIQUE,
        balance     TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id    INTEGER NOT NULL REFERENCES accounts(id),
        receiver_id  INTEGER NOT NULL REFERENCES accounts(id),
        amount       TEXT NOT NULL,
        status       TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        reversed_at  TEXT,
        CHECK (sender_id <> receiver_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions(sender_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_receiver ON transactions(receiver_id)",
];

const ACCOUNT_COLUMNS: &str = "id, name, email, balance, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "id, sender_id, receiver_id, amount, status, created_at, reversed_at";

/// Durable store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if needed.
    ///
    /// SQLite has a single writer; keep `max_connections` at 1 unless the
    /// database runs in WAL mode with low write contention.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(LedgerError::storage)?
            .create_if_missing(true);

        // An in-memory database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(LedgerError::storage)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Validate the configuration, then connect with it.
    pub async fn from_config(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        Self::connect(&config.database_url, config.max_connections).await
    }

    /// Create tables and indexes.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(LedgerError::storage)?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| LedgerError::storage(format!("bad decimal {raw:?}: {e}")))
}

fn parse_time(raw: &str) -> Result<Timestamp> {
    parse_timestamp(raw).map_err(|e| LedgerError::storage(format!("bad timestamp {raw:?}: {e}")))
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let balance: String = row.try_get("balance").map_err(LedgerError::storage)?;
    let created_at: String = row.try_get("created_at").map_err(LedgerError::storage)?;
    let updated_at: String = row.try_get("updated_at").map_err(LedgerError::storage)?;

    Ok(Account {
        id: AccountId::new(row.try_get("id").map_err(LedgerError::storage)?),
        name: row.try_get("name").map_err(LedgerError::storage)?,
        email: row.try_get("email").map_err(LedgerError::storage)?,
        balance: parse_decimal(&balance)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let amount: String = row.try_get("amount").map_err(LedgerError::storage)?;
    let status: String = row.try_get("status").map_err(LedgerError::storage)?;
    let created_at: String = row.try_get("created_at").map_err(LedgerError::storage)?;
    let reversed_at: Option<String> = row.try_get("reversed_at").map_err(LedgerError::storage)?;

    Ok(Transaction {
        id: TransactionId::new(row.try_get("id").map_err(LedgerError::storage)?),
        sender_id: AccountId::new(row.try_get("sender_id").map_err(LedgerError::storage)?),
        receiver_id: AccountId::new(row.try_get("receiver_id").map_err(LedgerError::storage)?),
        amount: parse_decimal(&amount)?,
        status: status.parse::<TransactionStatus>().map_err(LedgerError::storage)?,
        created_at: parse_time(&created_at)?,
        reversed_at: reversed_at.as_deref().map(parse_time).transpose()?,
    })
}

#[async_trait]
impl AccountDirectory for SqliteStore {
    #[instrument(skip(self))]
    async fn register(&self, name: &str, email: &str) -> Result<AccountProfile> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::storage)?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(&mut *tx)
            .await
            .map_err(LedgerError::storage)?;
        if existing.is_some() {
            return Err(LedgerError::DuplicateAccount(email.to_string()));
        }

        let now = paycore_common::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO accounts (name, email, balance, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(email)
        .bind(Decimal::ZERO.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(LedgerError::storage)?;

        tx.commit().await.map_err(LedgerError::storage)?;

        Ok(AccountProfile {
            id: AccountId::new(result.last_insert_rowid()),
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    async fn profile(&self, id: AccountId) -> Result<Option<AccountProfile>> {
        Ok(self.account(id).await?.map(|a| a.profile()))
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(LedgerError::storage)?;
        Ok(Box::new(SqliteUnit { tx: Some(tx) }))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::storage)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::storage)?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE sender_id = ? OR receiver_id = ? ORDER BY id"
        ))
        .bind(account_id.value())
        .bind(account_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::storage)?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::storage)?;
        rows.iter().map(row_to_account).collect()
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::storage)?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn total_balance(&self) -> Result<Decimal> {
        let balances: Vec<String> = sqlx::query_scalar("SELECT balance FROM accounts")
            .fetch_all(&self.pool)
            .await
            .map_err(LedgerError::storage)?;

        let mut total = Decimal::ZERO;
        for raw in &balances {
            total = total
                .checked_add(parse_decimal(raw)?)
                .ok_or(LedgerError::TotalOverflow)?;
        }
        Ok(total)
    }
}

/// Unit of work over a [`SqliteStore`]; one SQL transaction.
pub struct SqliteUnit {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteUnit {
    fn conn(&mut self) -> Result<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| LedgerError::storage("unit of work already committed"))
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn account(&mut self, id: AccountId) -> Result<Option<Account>> {
        let tx = self.conn()?;
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id.value())
            .fetch_optional(&mut **tx)
            .await
            .map_err(LedgerError::storage)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn adjust_balance(&mut self, id: AccountId, delta: Decimal) -> Result<BalanceChange> {
        let tx = self.conn()?;
        let raw: Option<String> = sqlx::query_scalar("SELECT balance FROM accounts WHERE id = ?")
            .bind(id.value())
            .fetch_optional(&mut **tx)
            .await
            .map_err(LedgerError::storage)?;
        let balance = parse_decimal(&raw.ok_or(LedgerError::AccountNotFound(id))?)?;

        let change = BalanceChange::compute(id, balance, delta)?;
        sqlx::query("UPDATE accounts SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(change.balance_after.to_string())
            .bind(change.timestamp.to_rfc3339())
            .bind(id.value())
            .execute(&mut **tx)
            .await
            .map_err(LedgerError::storage)?;
        Ok(change)
    }

    async fn insert_transaction(&mut self, record: NewTransaction) -> Result<Transaction> {
        let created_at = paycore_common::now();
        let tx = self.conn()?;
        let result = sqlx::query(
            "INSERT INTO transactions (sender_id, receiver_id, amount, status, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.sender_id.value())
        .bind(record.receiver_id.value())
        .bind(record.amount.to_string())
        .bind(record.status.as_str())
        .bind(created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(LedgerError::storage)?;

        Ok(record.into_transaction(TransactionId::new(result.last_insert_rowid()), created_at))
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>> {
        let tx = self.conn()?;
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
        ))
        .bind(id.value())
        .fetch_optional(&mut **tx)
        .await
        .map_err(LedgerError::storage)?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn set_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        let reversed_at =
            (status == TransactionStatus::Reversed).then(|| paycore_common::now().to_rfc3339());

        let tx = self.conn()?;
        let result = sqlx::query("UPDATE transactions SET status = ?, reversed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(reversed_at)
            .bind(id.value())
            .execute(&mut **tx)
            .await
            .map_err(LedgerError::storage)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::TransactionNotFound(id));
        }

        self.transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| LedgerError::storage("unit of work already committed"))?;
        tx.commit().await.map_err(LedgerError::storage)
    }
}
