//! Interfaces to the hosted backend
//!
//! Every call is scoped by the owning user id. Implementations are expected
//! to be internally synchronized; the stores never lock around them.

use std::future::Future;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{
    Activity, ActivityPatch, Category, NewActivity, NewCategory, NewTodo, TodoItem, TodoPatch,
};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// CRUD over the `todos`, `categories` and `activities` tables
pub trait RemoteDataService: Send + Sync {
    /// All todos owned by `owner`, ascending by `created_at`
    fn list_todos(&self, owner: Uuid) -> impl Future<Output = RemoteResult<Vec<TodoItem>>> + Send;

    /// Insert and return the canonical row with server-assigned id and timestamp
    fn insert_todo(&self, todo: NewTodo) -> impl Future<Output = RemoteResult<TodoItem>> + Send;

    fn update_todo(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: TodoPatch,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    fn delete_todo(&self, id: Uuid, owner: Uuid) -> impl Future<Output = RemoteResult<()>> + Send;

    /// All categories owned by `owner`, ascending by `created_at`
    fn list_categories(
        &self,
        owner: Uuid,
    ) -> impl Future<Output = RemoteResult<Vec<Category>>> + Send;

    fn insert_category(
        &self,
        category: NewCategory,
    ) -> impl Future<Output = RemoteResult<Category>> + Send;

    fn update_category(
        &self,
        id: Uuid,
        owner: Uuid,
        name: String,
        icon_name: Option<String>,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Deleting a category cascades to its activities on the backend
    fn delete_category(
        &self,
        id: Uuid,
        owner: Uuid,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Activities of one category, ascending by `created_at`
    fn list_activities(
        &self,
        category_id: Uuid,
        owner: Uuid,
    ) -> impl Future<Output = RemoteResult<Vec<Activity>>> + Send;

    fn insert_activity(
        &self,
        activity: NewActivity,
    ) -> impl Future<Output = RemoteResult<Activity>> + Send;

    fn update_activity(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: ActivityPatch,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    fn delete_activity(
        &self,
        id: Uuid,
        owner: Uuid,
    ) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// Object storage with public URLs
pub trait FileStore: Send + Sync {
    /// Store `bytes` at `path` and return its public URL
    fn upload(&self, path: &str, bytes: &[u8]) -> impl Future<Output = RemoteResult<String>> + Send;

    fn delete(&self, path: &str) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Map a public URL produced by [`FileStore::upload`] back to its storage path
    fn path_for_url(&self, url: &str) -> Option<String>;
}
