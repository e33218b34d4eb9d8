//! Data models shared by the stores and the data service
//!
//! Field names serialize in snake_case to match the backend tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A todo item owned by a single user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: Uuid,
    pub title: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    /// Calendar day only; time of day carries no meaning
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Activity this todo was promoted from, if any
    #[serde(default)]
    pub activity_id: Option<Uuid>,
}

/// Insert payload for a todo. The server assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTodo {
    pub user_id: Uuid,
    pub title: String,
    pub is_completed: bool,
    pub due_date: Option<NaiveDate>,
    pub activity_id: Option<Uuid>,
}

/// Partial update for a todo; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    /// `Some(None)` clears the due date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
}

/// A named group of activities to pick from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub icon_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn icon(&self) -> &str {
        self.icon_name.as_deref().unwrap_or(DEFAULT_CATEGORY_ICON)
    }
}

pub const DEFAULT_CATEGORY_ICON: &str = "📁";
pub const DEFAULT_ACTIVITY_ICON: &str = "📝";
pub const IMAGE_ACTIVITY_ICON: &str = "🖼️";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub user_id: Uuid,
    pub name: String,
    pub icon_name: Option<String>,
}

/// One option inside a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub icon_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Display preference: a photo wins over the emoji icon
    pub fn display(&self) -> ActivityDisplay<'_> {
        match (&self.image_url, &self.icon_name) {
            (Some(url), _) if !url.is_empty() => ActivityDisplay::Image(url),
            (_, Some(icon)) if !icon.is_empty() => ActivityDisplay::Icon(icon),
            _ => ActivityDisplay::Icon(DEFAULT_ACTIVITY_ICON),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityDisplay<'a> {
    Image(&'a str),
    Icon(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    pub user_id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub icon_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPatch {
    pub name: String,
    pub icon_name: Option<String>,
    pub image_url: Option<String>,
}

/// Public account details shown on the profile screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Which todos the list view shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoFilter {
    #[default]
    All,
    Today,
    Tomorrow,
    Overdue,
    ThisWeek,
    /// Matches the store's selected calendar date
    CalendarDate,
}

impl TodoFilter {
    pub fn display_name(self) -> &'static str {
        match self {
            TodoFilter::All => "All",
            TodoFilter::Today => "Today",
            TodoFilter::Tomorrow => "Tomorrow",
            TodoFilter::Overdue => "Overdue",
            TodoFilter::ThisWeek => "This Week",
            TodoFilter::CalendarDate => "Calendar",
        }
    }
}

/// A full board of roll results captured at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub results: HashMap<Uuid, Activity>,
    /// Categories in board order at capture time
    pub categories: Vec<Category>,
    pub generated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn result(&self, category_id: Uuid) -> Option<&Activity> {
        self.results.get(&category_id)
    }

    /// `(category name, activity name)` pairs in board order
    pub fn formatted_results(&self) -> Vec<(&str, &str)> {
        self.categories
            .iter()
            .filter_map(|c| {
                self.results
                    .get(&c.id)
                    .map(|a| (c.name.as_str(), a.name.as_str()))
            })
            .collect()
    }
}
