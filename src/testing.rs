//! In-memory data service and file store for unit tests

use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{
    Activity, ActivityPatch, Category, NewActivity, NewCategory, NewTodo, TodoItem, TodoPatch,
};
use crate::remote::{FileStore, RemoteDataService, RemoteResult};

#[derive(Default)]
struct Tables {
    todos: Vec<(Uuid, TodoItem)>,
    categories: Vec<Category>,
    activities: Vec<Activity>,
}

/// Scriptable fake backend. Calls touching an id in `failing` are rejected;
/// `offline` rejects everything. A non-zero `delay` holds each call open.
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<Uuid>>,
    offline: Mutex<bool>,
    delay: Mutex<std::time::Duration>,
    calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, id: Uuid) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    /// Hold every call for `delay` before answering
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seed_todo(&self, owner: Uuid, todo: TodoItem) {
        self.tables.lock().unwrap().todos.push((owner, todo));
    }

    pub fn stored_todos(&self, owner: Uuid) -> Vec<TodoItem> {
        let tables = self.tables.lock().unwrap();
        tables
            .todos
            .iter()
            .filter(|(o, _)| *o == owner)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn seed_category(&self, owner: Uuid, name: &str, activities: &[&str]) -> Category {
        let mut tables = self.tables.lock().unwrap();
        let base = Utc::now() + Duration::milliseconds(tables.categories.len() as i64);
        let category = Category {
            id: Uuid::new_v4(),
            user_id: owner,
            name: name.to_string(),
            icon_name: None,
            created_at: base,
        };
        for (i, activity) in activities.iter().enumerate() {
            tables.activities.push(Activity {
                id: Uuid::new_v4(),
                user_id: owner,
                category_id: category.id,
                name: activity.to_string(),
                image_url: None,
                icon_name: None,
                created_at: base + Duration::milliseconds(i as i64),
            });
        }
        tables.categories.push(category.clone());
        category
    }

    pub fn category_count(&self) -> usize {
        self.tables.lock().unwrap().categories.len()
    }

    async fn gate(&self, ids: &[Uuid]) -> RemoteResult<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check(ids)
    }

    fn check(&self, ids: &[Uuid]) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock().unwrap() {
            return Err(RemoteError::backend("network unreachable"));
        }
        let failing = self.failing.lock().unwrap();
        if ids.iter().any(|id| failing.contains(id)) {
            return Err(RemoteError::rejected("scripted failure"));
        }
        Ok(())
    }
}

impl RemoteDataService for FakeRemote {
    async fn list_todos(&self, owner: Uuid) -> RemoteResult<Vec<TodoItem>> {
        self.gate(&[owner]).await?;
        let mut todos = self.stored_todos(owner);
        todos.sort_by_key(|t| t.created_at);
        Ok(todos)
    }

    async fn insert_todo(&self, todo: NewTodo) -> RemoteResult<TodoItem> {
        self.gate(&[todo.user_id]).await?;
        let item = TodoItem {
            id: Uuid::new_v4(),
            title: todo.title,
            is_completed: todo.is_completed,
            created_at: Utc::now(),
            due_date: todo.due_date,
            activity_id: todo.activity_id,
        };
        self.seed_todo(todo.user_id, item.clone());
        Ok(item)
    }

    async fn update_todo(&self, id: Uuid, owner: Uuid, patch: TodoPatch) -> RemoteResult<()> {
        self.gate(&[id, owner]).await?;
        let mut tables = self.tables.lock().unwrap();
        let (_, todo) = tables
            .todos
            .iter_mut()
            .find(|(o, t)| *o == owner && t.id == id)
            .ok_or_else(|| RemoteError::rejected("no such todo"))?;
        if let Some(title) = patch.title {
            todo.title = title;
        }
        if let Some(done) = patch.is_completed {
            todo.is_completed = done;
        }
        if let Some(due) = patch.due_date {
            todo.due_date = due;
        }
        Ok(())
    }

    async fn delete_todo(&self, id: Uuid, owner: Uuid) -> RemoteResult<()> {
        self.gate(&[id, owner]).await?;
        let mut tables = self.tables.lock().unwrap();
        tables.todos.retain(|(o, t)| !(*o == owner && t.id == id));
        Ok(())
    }

    async fn list_categories(&self, owner: Uuid) -> RemoteResult<Vec<Category>> {
        self.gate(&[owner]).await?;
        let tables = self.tables.lock().unwrap();
        let mut categories: Vec<_> = tables
            .categories
            .iter()
            .filter(|c| c.user_id == owner)
            .cloned()
            .collect();
        categories.sort_by_key(|c| c.created_at);
        Ok(categories)
    }

    async fn insert_category(&self, category: NewCategory) -> RemoteResult<Category> {
        self.gate(&[category.user_id]).await?;
        let row = Category {
            id: Uuid::new_v4(),
            user_id: category.user_id,
            name: category.name,
            icon_name: category.icon_name,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().categories.push(row.clone());
        Ok(row)
    }

    async fn update_category(
        &self,
        id: Uuid,
        owner: Uuid,
        name: String,
        icon_name: Option<String>,
    ) -> RemoteResult<()> {
        self.gate(&[id, owner]).await?;
        let mut tables = self.tables.lock().unwrap();
        let category = tables
            .categories
            .iter_mut()
            .find(|c| c.id == id && c.user_id == owner)
            .ok_or_else(|| RemoteError::rejected("no such category"))?;
        category.name = name;
        category.icon_name = icon_name;
        Ok(())
    }

    async fn delete_category(&self, id: Uuid, owner: Uuid) -> RemoteResult<()> {
        self.gate(&[id, owner]).await?;
        let mut tables = self.tables.lock().unwrap();
        tables.categories.retain(|c| !(c.id == id && c.user_id == owner));
        tables.activities.retain(|a| a.category_id != id);
        Ok(())
    }

    async fn list_activities(&self, category_id: Uuid, owner: Uuid) -> RemoteResult<Vec<Activity>> {
        self.gate(&[category_id, owner]).await?;
        let tables = self.tables.lock().unwrap();
        let mut activities: Vec<_> = tables
            .activities
            .iter()
            .filter(|a| a.category_id == category_id && a.user_id == owner)
            .cloned()
            .collect();
        activities.sort_by_key(|a| a.created_at);
        Ok(activities)
    }

    async fn insert_activity(&self, activity: NewActivity) -> RemoteResult<Activity> {
        self.gate(&[activity.category_id, activity.user_id]).await?;
        let row = Activity {
            id: Uuid::new_v4(),
            user_id: activity.user_id,
            category_id: activity.category_id,
            name: activity.name,
            image_url: activity.image_url,
            icon_name: activity.icon_name,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().activities.push(row.clone());
        Ok(row)
    }

    async fn update_activity(&self, id: Uuid, owner: Uuid, patch: ActivityPatch) -> RemoteResult<()> {
        self.gate(&[id, owner]).await?;
        let mut tables = self.tables.lock().unwrap();
        let activity = tables
            .activities
            .iter_mut()
            .find(|a| a.id == id && a.user_id == owner)
            .ok_or_else(|| RemoteError::rejected("no such activity"))?;
        activity.name = patch.name;
        activity.icon_name = patch.icon_name;
        activity.image_url = patch.image_url;
        Ok(())
    }

    async fn delete_activity(&self, id: Uuid, owner: Uuid) -> RemoteResult<()> {
        self.gate(&[id, owner]).await?;
        let mut tables = self.tables.lock().unwrap();
        tables.activities.retain(|a| !(a.id == id && a.user_id == owner));
        Ok(())
    }
}

/// Records uploads in memory under `mem://`
#[derive(Default)]
pub struct MemoryFiles {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: Mutex<bool>,
}

impl MemoryFiles {
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn fail_uploads(&self) {
        *self.fail_uploads.lock().unwrap() = true;
    }
}

impl FileStore for MemoryFiles {
    async fn upload(&self, path: &str, bytes: &[u8]) -> RemoteResult<String> {
        if *self.fail_uploads.lock().unwrap() {
            return Err(RemoteError::storage("bucket unavailable"));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(format!("mem://{path}"))
    }

    async fn delete(&self, path: &str) -> RemoteResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix("mem://").map(str::to_string)
    }
}
