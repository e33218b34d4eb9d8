//! SQLite backend implementing the remote data service
//!
//! Stands in for the hosted database during local use and integration tests.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{
    Activity, ActivityPatch, Category, NewActivity, NewCategory, NewTodo, Profile, TodoItem,
    TodoPatch,
};
use crate::remote::{RemoteDataService, RemoteResult};

/// Thread-safe database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

/// A row from the `users` table
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;
        Self::with_connection(conn)
    }

    /// Fresh in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init().context("Failed to initialize schema")?;
        Ok(db)
    }

    /// Initialize the database schema
    fn init(&self) -> RemoteResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                avatar_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                icon_name TEXT,
                created_at TEXT NOT NULL
            );

            -- Activities go away with their category
            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                name TEXT NOT NULL,
                image_url TEXT,
                icon_name TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );

            -- activity_id is a weak back-reference
            CREATE TABLE IF NOT EXISTS todos (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                due_date TEXT,
                activity_id TEXT,
                FOREIGN KEY (activity_id) REFERENCES activities(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_todos_user ON todos(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_activities_category ON activities(category_id, created_at);
            "#,
        )?;

        Ok(())
    }

    pub(crate) fn lock(&self) -> RemoteResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RemoteError::backend("database lock poisoned"))
    }

    pub fn insert_account(
        &self,
        email: &str,
        full_name: &str,
        password_hash: &str,
    ) -> RemoteResult<Account> {
        let conn = self.lock()?;
        let id = Uuid::new_v4();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (id, email, full_name, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                email,
                full_name,
                password_hash,
                timestamp(Utc::now())
            ],
        )?;

        if inserted == 0 {
            return Err(RemoteError::rejected("an account with this email already exists"));
        }

        Ok(Account {
            id,
            email: email.to_string(),
            full_name: full_name.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    pub fn find_account(&self, email: &str) -> RemoteResult<Option<Account>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, email, full_name, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok(Account {
                    id: uuid_col(row, 0)?,
                    email: row.get(1)?,
                    full_name: row.get(2)?,
                    password_hash: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_profile(&self, id: Uuid) -> RemoteResult<Option<Profile>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, email, full_name, avatar_url, created_at, updated_at
             FROM users WHERE id = ?1",
            params![id.to_string()],
            profile_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Overwrite the editable profile fields and stamp `updated_at`
    pub fn update_profile(
        &self,
        id: Uuid,
        full_name: &str,
        avatar_url: Option<&str>,
    ) -> RemoteResult<Profile> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET full_name = ?1, avatar_url = ?2, updated_at = ?3 WHERE id = ?4",
            params![full_name, avatar_url, timestamp(now()), id.to_string()],
        )?;
        if updated == 0 {
            return Err(RemoteError::rejected("no such account"));
        }

        conn.query_row(
            "SELECT id, email, full_name, avatar_url, created_at, updated_at
             FROM users WHERE id = ?1",
            params![id.to_string()],
            profile_from_row,
        )
        .map_err(Into::into)
    }

    pub fn account_exists(&self, id: Uuid) -> RemoteResult<bool> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl RemoteDataService for Database {
    async fn list_todos(&self, owner: Uuid) -> RemoteResult<Vec<TodoItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, is_completed, created_at, due_date, activity_id
             FROM todos WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![owner.to_string()], todo_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn insert_todo(&self, todo: NewTodo) -> RemoteResult<TodoItem> {
        let conn = self.lock()?;
        let item = TodoItem {
            id: Uuid::new_v4(),
            title: todo.title,
            is_completed: todo.is_completed,
            created_at: now(),
            due_date: todo.due_date,
            activity_id: todo.activity_id,
        };

        conn.execute(
            r#"INSERT INTO todos (id, user_id, title, is_completed, created_at, due_date, activity_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                item.id.to_string(),
                todo.user_id.to_string(),
                &item.title,
                item.is_completed as i32,
                timestamp(item.created_at),
                item.due_date.map(|d| d.to_string()),
                item.activity_id.map(|id| id.to_string()),
            ],
        )?;

        Ok(item)
    }

    async fn update_todo(&self, id: Uuid, owner: Uuid, patch: TodoPatch) -> RemoteResult<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM todos WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(RemoteError::rejected(format!("todo {id} not found")));
        }

        if let Some(title) = &patch.title {
            tx.execute(
                "UPDATE todos SET title = ?3 WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner.to_string(), title],
            )?;
        }
        if let Some(done) = patch.is_completed {
            tx.execute(
                "UPDATE todos SET is_completed = ?3 WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner.to_string(), done as i32],
            )?;
        }
        if let Some(due) = patch.due_date {
            tx.execute(
                "UPDATE todos SET due_date = ?3 WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner.to_string(), due.map(|d| d.to_string())],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn delete_todo(&self, id: Uuid, owner: Uuid) -> RemoteResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM todos WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner.to_string()],
        )?;
        Ok(())
    }

    async fn list_categories(&self, owner: Uuid) -> RemoteResult<Vec<Category>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, icon_name, created_at
             FROM categories WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![owner.to_string()], |row| {
            Ok(Category {
                id: uuid_col(row, 0)?,
                user_id: uuid_col(row, 1)?,
                name: row.get(2)?,
                icon_name: row.get(3)?,
                created_at: timestamp_col(row, 4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn insert_category(&self, category: NewCategory) -> RemoteResult<Category> {
        let conn = self.lock()?;
        let row = Category {
            id: Uuid::new_v4(),
            user_id: category.user_id,
            name: category.name,
            icon_name: category.icon_name,
            created_at: now(),
        };

        conn.execute(
            "INSERT INTO categories (id, user_id, name, icon_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id.to_string(),
                row.user_id.to_string(),
                &row.name,
                &row.icon_name,
                timestamp(row.created_at),
            ],
        )?;

        Ok(row)
    }

    async fn update_category(
        &self,
        id: Uuid,
        owner: Uuid,
        name: String,
        icon_name: Option<String>,
    ) -> RemoteResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE categories SET name = ?3, icon_name = ?4 WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner.to_string(), name, icon_name],
        )?;
        if changed == 0 {
            return Err(RemoteError::rejected(format!("category {id} not found")));
        }
        Ok(())
    }

    async fn delete_category(&self, id: Uuid, owner: Uuid) -> RemoteResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM categories WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner.to_string()],
        )?;
        Ok(())
    }

    async fn list_activities(&self, category_id: Uuid, owner: Uuid) -> RemoteResult<Vec<Activity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, category_id, name, image_url, icon_name, created_at
             FROM activities WHERE category_id = ?1 AND user_id = ?2
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(
            params![category_id.to_string(), owner.to_string()],
            activity_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn insert_activity(&self, activity: NewActivity) -> RemoteResult<Activity> {
        let conn = self.lock()?;

        let owned: Option<String> = conn
            .query_row(
                "SELECT id FROM categories WHERE id = ?1 AND user_id = ?2",
                params![activity.category_id.to_string(), activity.user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(RemoteError::rejected(format!(
                "category {} not found",
                activity.category_id
            )));
        }

        let row = Activity {
            id: Uuid::new_v4(),
            user_id: activity.user_id,
            category_id: activity.category_id,
            name: activity.name,
            image_url: activity.image_url,
            icon_name: activity.icon_name,
            created_at: now(),
        };

        conn.execute(
            r#"INSERT INTO activities (id, user_id, category_id, name, image_url, icon_name, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                row.id.to_string(),
                row.user_id.to_string(),
                row.category_id.to_string(),
                &row.name,
                &row.image_url,
                &row.icon_name,
                timestamp(row.created_at),
            ],
        )?;

        Ok(row)
    }

    async fn update_activity(&self, id: Uuid, owner: Uuid, patch: ActivityPatch) -> RemoteResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE activities SET name = ?3, icon_name = ?4, image_url = ?5
             WHERE id = ?1 AND user_id = ?2",
            params![
                id.to_string(),
                owner.to_string(),
                patch.name,
                patch.icon_name,
                patch.image_url
            ],
        )?;
        if changed == 0 {
            return Err(RemoteError::rejected(format!("activity {id} not found")));
        }
        Ok(())
    }

    async fn delete_activity(&self, id: Uuid, owner: Uuid) -> RemoteResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM activities WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner.to_string()],
        )?;
        Ok(())
    }
}

fn todo_from_row(row: &Row<'_>) -> rusqlite::Result<TodoItem> {
    let due: Option<String> = row.get(4)?;
    let activity: Option<String> = row.get(5)?;

    Ok(TodoItem {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        is_completed: row.get::<_, i32>(2)? != 0,
        created_at: timestamp_col(row, 3)?,
        due_date: due
            .map(|d| parse_col::<NaiveDate>(4, &d))
            .transpose()?,
        activity_id: activity.map(|id| parse_col::<Uuid>(5, &id)).transpose()?,
    })
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: uuid_col(row, 0)?,
        user_id: uuid_col(row, 1)?,
        category_id: uuid_col(row, 2)?,
        name: row.get(3)?,
        image_url: row.get(4)?,
        icon_name: row.get(5)?,
        created_at: timestamp_col(row, 6)?,
    })
}

/// Server clock at the precision rows are stored with
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let updated_at = match row.get::<_, Option<String>>(5)? {
        Some(_) => Some(timestamp_col(row, 5)?),
        None => None,
    };
    Ok(Profile {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: timestamp_col(row, 4)?,
        updated_at,
    })
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    parse_col(idx, &raw)
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_col<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
