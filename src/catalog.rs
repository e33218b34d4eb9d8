//! Category and activity management
//!
//! Owns the create/edit/delete flows behind the category editor, including
//! photo uploads and removing photos orphaned by a delete. The randomizer
//! reads the same tables but never runs these flows.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    Activity, ActivityPatch, Category, DEFAULT_ACTIVITY_ICON, IMAGE_ACTIVITY_ICON, NewActivity,
    NewCategory,
};
use crate::remote::{FileStore, RemoteDataService};

const CATEGORY_NAME_MIN: usize = 2;
const CATEGORY_NAME_MAX: usize = 50;

pub struct CatalogManager<S, F> {
    remote: Arc<S>,
    files: Arc<F>,
    user_id: Option<Uuid>,
}

impl<S: RemoteDataService, F: FileStore> CatalogManager<S, F> {
    pub fn new(remote: Arc<S>, files: Arc<F>) -> Self {
        Self {
            remote,
            files,
            user_id: None,
        }
    }

    pub fn set_user(&mut self, user_id: Option<Uuid>) {
        self.user_id = user_id;
    }

    fn owner(&self) -> CoreResult<Uuid> {
        self.user_id.ok_or(CoreError::Unauthenticated)
    }

    pub async fn categories(&self) -> CoreResult<Vec<Category>> {
        let owner = self.owner()?;
        Ok(self.remote.list_categories(owner).await?)
    }

    pub async fn create_category(&self, name: &str, icon: Option<&str>) -> CoreResult<Category> {
        let owner = self.owner()?;
        let name = validate_category_name(name)?;
        let category = self
            .remote
            .insert_category(NewCategory {
                user_id: owner,
                name,
                icon_name: non_empty(icon),
            })
            .await?;

        tracing::info!(category_id = %category.id, name = %category.name, "Created category");
        Ok(category)
    }

    pub async fn rename_category(&self, category: &Category, name: &str) -> CoreResult<Category> {
        let owner = self.owner()?;
        let name = validate_category_name(name)?;
        self.remote
            .update_category(category.id, owner, name.clone(), category.icon_name.clone())
            .await?;

        tracing::info!(category_id = %category.id, "Renamed category");
        Ok(Category {
            name,
            ..category.clone()
        })
    }

    /// Delete a category and clean up its activities' photos.
    ///
    /// The backend cascades the activity rows; photos are removed here once
    /// the category is gone. A photo that fails to delete is logged and left.
    pub async fn delete_category(&self, category: &Category) -> CoreResult<()> {
        let owner = self.owner()?;
        let activities = self.remote.list_activities(category.id, owner).await?;
        self.remote.delete_category(category.id, owner).await?;

        for activity in &activities {
            self.remove_image(activity.image_url.as_deref()).await;
        }

        tracing::info!(
            category_id = %category.id,
            activities = activities.len(),
            "Deleted category and its activities"
        );
        Ok(())
    }

    pub async fn activities(&self, category_id: Uuid) -> CoreResult<Vec<Activity>> {
        let owner = self.owner()?;
        Ok(self.remote.list_activities(category_id, owner).await?)
    }

    /// Add an activity, uploading `image` first when given
    pub async fn add_activity(
        &self,
        category: &Category,
        name: &str,
        image: Option<&[u8]>,
        icon: Option<&str>,
    ) -> CoreResult<Activity> {
        let owner = self.owner()?;
        let name = validate_activity_name(name)?;

        let image_url = match image {
            Some(bytes) => Some(self.upload_image(owner, category.id, bytes).await?),
            None => None,
        };
        let icon_name = activity_icon(image_url.is_some(), icon);

        let inserted = self
            .remote
            .insert_activity(NewActivity {
                user_id: owner,
                category_id: category.id,
                name,
                image_url: image_url.clone(),
                icon_name: Some(icon_name),
            })
            .await;

        match inserted {
            Ok(activity) => {
                tracing::info!(activity_id = %activity.id, name = %activity.name, "Added activity");
                Ok(activity)
            }
            Err(e) => {
                self.remove_image(image_url.as_deref()).await;
                Err(e.into())
            }
        }
    }

    /// Save edits to an activity. A new photo replaces the old one, which is
    /// removed after the row is updated.
    pub async fn update_activity(
        &self,
        activity: &Activity,
        new_image: Option<&[u8]>,
    ) -> CoreResult<Activity> {
        let owner = self.owner()?;
        let name = validate_activity_name(&activity.name)?;

        let mut updated = Activity {
            name,
            ..activity.clone()
        };
        let replaced = match new_image {
            Some(bytes) => {
                let url = self
                    .upload_image(owner, activity.category_id, bytes)
                    .await?;
                updated.icon_name = Some(IMAGE_ACTIVITY_ICON.to_string());
                updated.image_url.replace(url)
            }
            None => None,
        };

        let patch = ActivityPatch {
            name: updated.name.clone(),
            icon_name: updated.icon_name.clone(),
            image_url: updated.image_url.clone(),
        };
        if let Err(e) = self.remote.update_activity(activity.id, owner, patch).await {
            if new_image.is_some() {
                self.remove_image(updated.image_url.as_deref()).await;
            }
            return Err(e.into());
        }

        self.remove_image(replaced.as_deref()).await;
        tracing::info!(activity_id = %activity.id, "Updated activity");
        Ok(updated)
    }

    pub async fn delete_activity(&self, activity: &Activity) -> CoreResult<()> {
        let owner = self.owner()?;
        self.remote.delete_activity(activity.id, owner).await?;
        self.remove_image(activity.image_url.as_deref()).await;

        tracing::info!(activity_id = %activity.id, "Deleted activity");
        Ok(())
    }

    async fn upload_image(&self, owner: Uuid, category_id: Uuid, bytes: &[u8]) -> CoreResult<String> {
        let path = format!("{owner}/{category_id}/{}.jpg", Uuid::new_v4());
        Ok(self.files.upload(&path, bytes).await?)
    }

    async fn remove_image(&self, url: Option<&str>) {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return;
        };
        let Some(path) = self.files.path_for_url(url) else {
            tracing::warn!(url = %url, "Could not map image URL to a storage path");
            return;
        };
        if let Err(e) = self.files.delete(&path).await {
            tracing::warn!(path = %path, error = %e, "Failed to delete activity image");
        }
    }
}

/// Trimmed category name, 2 to 50 characters
pub fn validate_category_name(name: &str) -> CoreResult<String> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(CoreError::validation("Category name cannot be empty"));
    }
    if len < CATEGORY_NAME_MIN {
        return Err(CoreError::validation(format!(
            "Category name must be at least {CATEGORY_NAME_MIN} characters"
        )));
    }
    if len > CATEGORY_NAME_MAX {
        return Err(CoreError::validation(format!(
            "Category name must be at most {CATEGORY_NAME_MAX} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_activity_name(name: &str) -> CoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation("Activity name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn activity_icon(has_image: bool, icon: Option<&str>) -> String {
    if has_image {
        return IMAGE_ACTIVITY_ICON.to_string();
    }
    non_empty(icon).unwrap_or_else(|| DEFAULT_ACTIVITY_ICON.to_string())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, MemoryFiles};
    use pretty_assertions::assert_eq;

    fn catalog() -> (Arc<FakeRemote>, Arc<MemoryFiles>, CatalogManager<FakeRemote, MemoryFiles>) {
        let remote = Arc::new(FakeRemote::new());
        let files = Arc::new(MemoryFiles::default());
        let mut catalog = CatalogManager::new(Arc::clone(&remote), Arc::clone(&files));
        catalog.set_user(Some(Uuid::new_v4()));
        (remote, files, catalog)
    }

    #[test]
    fn category_name_bounds() {
        assert!(validate_category_name(" ").is_err());
        assert!(validate_category_name("a").is_err());
        assert_eq!(validate_category_name("  Go  ").unwrap(), "Go");
        assert!(validate_category_name(&"x".repeat(50)).is_ok());
        assert!(validate_category_name(&"x".repeat(51)).is_err());
    }

    #[tokio::test]
    async fn requires_user() {
        let remote = Arc::new(FakeRemote::new());
        let files = Arc::new(MemoryFiles::default());
        let catalog = CatalogManager::new(remote, files);
        assert_eq!(
            catalog.create_category("Food", None).await,
            Err(CoreError::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn activity_with_photo_gets_image_icon() {
        let (_remote, files, catalog) = catalog();
        let category = catalog.create_category("Food", Some("🍜")).await.unwrap();

        let activity = catalog
            .add_activity(&category, "Pho", Some(b"jpeg".as_slice()), Some("🍲"))
            .await
            .unwrap();

        assert_eq!(activity.icon_name.as_deref(), Some(IMAGE_ACTIVITY_ICON));
        assert!(activity.image_url.as_deref().unwrap().starts_with("mem://"));
        assert_eq!(files.paths().len(), 1);
    }

    #[tokio::test]
    async fn activity_without_icon_gets_default() {
        let (_remote, _files, catalog) = catalog();
        let category = catalog.create_category("Food", None).await.unwrap();
        let activity = catalog
            .add_activity(&category, "Pho", None, Some("  "))
            .await
            .unwrap();
        assert_eq!(activity.icon_name.as_deref(), Some(DEFAULT_ACTIVITY_ICON));
        assert_eq!(activity.image_url, None);
    }

    #[tokio::test]
    async fn failed_upload_adds_nothing() {
        let (_remote, files, catalog) = catalog();
        let category = catalog.create_category("Food", None).await.unwrap();
        files.fail_uploads();

        let err = catalog
            .add_activity(&category, "Pho", Some(b"jpeg".as_slice()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Remote(_)));
        assert!(catalog.activities(category.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_category_removes_orphaned_photos() {
        let (remote, files, catalog) = catalog();
        let category = catalog.create_category("Food", None).await.unwrap();
        catalog
            .add_activity(&category, "Pho", Some(b"one".as_slice()), None)
            .await
            .unwrap();
        catalog
            .add_activity(&category, "Bun", None, Some("🥢"))
            .await
            .unwrap();

        catalog.delete_category(&category).await.unwrap();

        assert!(files.paths().is_empty());
        assert_eq!(remote.category_count(), 0);
    }

    #[tokio::test]
    async fn replacing_photo_removes_the_old_one() {
        let (_remote, files, catalog) = catalog();
        let category = catalog.create_category("Food", None).await.unwrap();
        let activity = catalog
            .add_activity(&category, "Pho", Some(b"old".as_slice()), None)
            .await
            .unwrap();
        let old_path = files.paths();

        let updated = catalog
            .update_activity(&activity, Some(b"new".as_slice()))
            .await
            .unwrap();

        let paths = files.paths();
        assert_eq!(paths.len(), 1);
        assert_ne!(paths, old_path);
        assert_ne!(updated.image_url, activity.image_url);
    }

    #[tokio::test]
    async fn deleting_activity_removes_photo() {
        let (_remote, files, catalog) = catalog();
        let category = catalog.create_category("Food", None).await.unwrap();
        let activity = catalog
            .add_activity(&category, "Pho", Some(b"jpeg".as_slice()), None)
            .await
            .unwrap();

        catalog.delete_activity(&activity).await.unwrap();

        assert!(files.paths().is_empty());
        assert!(catalog.activities(category.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_validates() {
        let (_remote, _files, catalog) = catalog();
        let category = catalog.create_category("Food", None).await.unwrap();
        assert!(catalog.rename_category(&category, "x").await.is_err());
        let renamed = catalog.rename_category(&category, " Drinks ").await.unwrap();
        assert_eq!(renamed.name, "Drinks");
        assert_eq!(catalog.categories().await.unwrap()[0].name, "Drinks");
    }
}
