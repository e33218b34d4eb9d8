//! In-memory todo list for the signed-in user
//!
//! Toggles, edits and deletes are applied locally before the remote call and
//! rolled back if it fails. Creation waits for the server because the id is
//! server-assigned.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{self, Clock, SystemClock, WeekStart};
use crate::error::{CoreError, CoreResult};
use crate::models::{Activity, Category, NewTodo, TodoFilter, TodoItem, TodoPatch};
use crate::remote::RemoteDataService;

const EVENT_CAPACITY: usize = 64;

/// Notifications for whatever renders the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TodoEvent {
    Changed,
    Failed(CoreError),
    /// The calendar filter was picked without a date
    DatePickerRequested,
}

pub struct TodoStore<S> {
    remote: Arc<S>,
    clock: Arc<dyn Clock>,
    week_start: WeekStart,
    user_id: Option<Uuid>,
    todos: Vec<TodoItem>,
    selected_filter: TodoFilter,
    selected_calendar_date: Option<NaiveDate>,
    needs_date_picker: bool,
    is_loading: bool,
    last_error: Option<CoreError>,
    show_error_alert: bool,
    active: bool,
    events: broadcast::Sender<TodoEvent>,
}

impl<S: RemoteDataService> TodoStore<S> {
    pub fn new(remote: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            remote,
            clock: Arc::new(SystemClock),
            week_start: WeekStart::default(),
            user_id: None,
            todos: Vec::new(),
            selected_filter: TodoFilter::All,
            selected_calendar_date: None,
            needs_date_picker: false,
            is_loading: false,
            last_error: None,
            show_error_alert: false,
            active: true,
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_week_start(mut self, week_start: WeekStart) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TodoEvent> {
        self.events.subscribe()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    pub fn get(&self, id: Uuid) -> Option<&TodoItem> {
        self.todos.iter().find(|t| t.id == id)
    }

    pub fn selected_filter(&self) -> TodoFilter {
        self.selected_filter
    }

    pub fn selected_calendar_date(&self) -> Option<NaiveDate> {
        self.selected_calendar_date
    }

    pub fn needs_date_picker(&self) -> bool {
        self.needs_date_picker
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }

    pub fn show_error_alert(&self) -> bool {
        self.show_error_alert
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Replace the local list with the server's copy for `user_id`
    pub async fn fetch_all(&mut self, user_id: Option<Uuid>) -> CoreResult<()> {
        if !self.active {
            return Err(CoreError::Unauthenticated);
        }
        let Some(owner) = user_id else {
            return Err(self.surface(CoreError::Unauthenticated));
        };
        self.user_id = Some(owner);

        tracing::debug!(user_id = %owner, "Fetching todos");
        self.is_loading = true;
        let result = self.remote.list_todos(owner).await;
        self.is_loading = false;

        match result {
            Ok(todos) => {
                tracing::info!(count = todos.len(), "Fetched todos");
                self.todos = todos;
                self.last_error = None;
                self.emit(TodoEvent::Changed);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch todos");
                Err(self.surface(e.into()))
            }
        }
    }

    pub async fn toggle_completion(&mut self, id: Uuid) -> CoreResult<()> {
        let owner = self.require_user()?;
        let Some(index) = self.position(id) else {
            tracing::debug!(todo_id = %id, "Toggle skipped, todo not in local list");
            return Ok(());
        };

        let original = self.todos[index].clone();
        let completed = !original.is_completed;
        self.todos[index].is_completed = completed;
        self.emit(TodoEvent::Changed);

        let patch = TodoPatch {
            is_completed: Some(completed),
            ..Default::default()
        };
        let remote = Arc::clone(&self.remote);
        let result = {
            let pending = PendingEdit::new(&mut self.todos, original);
            let result = remote.update_todo(id, owner, patch).await;
            if result.is_ok() {
                pending.confirm();
            }
            result
        };

        match result {
            Ok(()) => {
                tracing::info!(todo_id = %id, completed, "Toggled todo");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(todo_id = %id, error = %e, "Toggle rolled back");
                self.emit(TodoEvent::Changed);
                Err(self.surface(e.into()))
            }
        }
    }

    /// Change the title and due date of an existing todo
    pub async fn edit(
        &mut self,
        id: Uuid,
        new_title: &str,
        new_due_date: Option<NaiveDate>,
    ) -> CoreResult<()> {
        let owner = self.require_user()?;
        let title = self.validate_title(new_title)?;
        let Some(index) = self.position(id) else {
            tracing::debug!(todo_id = %id, "Edit skipped, todo not in local list");
            return Ok(());
        };

        let original = self.todos[index].clone();
        self.todos[index].title = title.clone();
        self.todos[index].due_date = new_due_date;
        self.emit(TodoEvent::Changed);

        let patch = TodoPatch {
            title: Some(title),
            due_date: Some(new_due_date),
            ..Default::default()
        };
        let remote = Arc::clone(&self.remote);
        let result = {
            let pending = PendingEdit::new(&mut self.todos, original);
            let result = remote.update_todo(id, owner, patch).await;
            if result.is_ok() {
                pending.confirm();
            }
            result
        };

        match result {
            Ok(()) => {
                tracing::info!(todo_id = %id, "Updated todo");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(todo_id = %id, error = %e, "Edit rolled back");
                self.emit(TodoEvent::Changed);
                Err(self.surface(e.into()))
            }
        }
    }

    pub async fn add_manual(
        &mut self,
        title: &str,
        due_date: Option<NaiveDate>,
    ) -> CoreResult<TodoItem> {
        let owner = self.require_user()?;
        let title = self.validate_title(title)?;
        self.create(NewTodo {
            user_id: owner,
            title,
            is_completed: false,
            due_date,
            activity_id: None,
        })
        .await
    }

    /// Promote a rolled activity into a todo due today
    pub async fn add_from_activity(
        &mut self,
        activity: &Activity,
        category: Option<&Category>,
    ) -> CoreResult<TodoItem> {
        let owner = self.require_user()?;
        let title = match category {
            Some(category) => format!("{}: {}", category.name, activity.name),
            None => activity.name.clone(),
        };
        let title = self.validate_title(&title)?;
        self.create(NewTodo {
            user_id: owner,
            title,
            is_completed: false,
            due_date: Some(self.clock.today()),
            activity_id: Some(activity.id),
        })
        .await
    }

    async fn create(&mut self, todo: NewTodo) -> CoreResult<TodoItem> {
        tracing::debug!(title = %todo.title, "Creating todo");
        match self.remote.insert_todo(todo).await {
            Ok(created) => {
                tracing::info!(todo_id = %created.id, "Created todo");
                self.todos.insert(0, created.clone());
                self.emit(TodoEvent::Changed);
                Ok(created)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create todo");
                Err(self.surface(e.into()))
            }
        }
    }

    /// Delete todos by id, one remote call each.
    ///
    /// Calls run in list order. When one fails, it and every todo after it
    /// are put back where they were; earlier deletions stand. Ids not in the
    /// list are skipped. Returns how many todos were deleted.
    pub async fn delete(&mut self, ids: &[Uuid]) -> CoreResult<usize> {
        let owner = self.require_user()?;
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.todos.len());
        for (index, todo) in std::mem::take(&mut self.todos).into_iter().enumerate() {
            if wanted.contains(&todo.id) {
                removed.push((index, todo));
            } else {
                kept.push(todo);
            }
        }
        self.todos = kept;
        if removed.is_empty() {
            return Ok(0);
        }
        self.emit(TodoEvent::Changed);

        let order: Vec<Uuid> = removed.iter().map(|(_, t)| t.id).collect();
        let order_len = order.len();
        let remote = Arc::clone(&self.remote);
        let failure = {
            let mut pending = PendingRemoval::new(&mut self.todos, removed);
            let mut failure = None;
            for id in order {
                match remote.delete_todo(id, owner).await {
                    Ok(()) => {
                        tracing::info!(todo_id = %id, "Deleted todo");
                        pending.confirm_next();
                    }
                    Err(e) => {
                        tracing::warn!(todo_id = %id, error = %e, "Delete failed, restoring remaining todos");
                        failure = Some(e);
                        break;
                    }
                }
            }
            failure
        };

        match failure {
            None => Ok(order_len),
            Some(e) => {
                self.emit(TodoEvent::Changed);
                Err(self.surface(e.into()))
            }
        }
    }

    /// Delete by positions in the current filtered view
    pub async fn delete_at(&mut self, offsets: &[usize]) -> CoreResult<usize> {
        let view = self.filtered_view();
        let ids: Vec<Uuid> = offsets
            .iter()
            .filter_map(|&i| view.get(i).map(|t| t.id))
            .collect();
        self.delete(&ids).await
    }

    pub fn filtered_view(&self) -> Vec<&TodoItem> {
        filter_todos(
            &self.todos,
            self.selected_filter,
            self.selected_calendar_date,
            self.clock.today(),
            self.week_start,
        )
    }

    pub fn set_filter(&mut self, filter: TodoFilter) {
        tracing::debug!(filter = filter.display_name(), "Filter changed");
        self.selected_filter = filter;
        if filter == TodoFilter::CalendarDate && self.selected_calendar_date.is_none() {
            self.selected_calendar_date = Some(self.clock.today());
            self.needs_date_picker = true;
            self.emit(TodoEvent::DatePickerRequested);
        }
        self.emit(TodoEvent::Changed);
    }

    pub fn select_calendar_date(&mut self, date: NaiveDate) {
        self.selected_calendar_date = Some(date);
        self.selected_filter = TodoFilter::CalendarDate;
        self.needs_date_picker = false;
        self.emit(TodoEvent::Changed);
    }

    pub fn clear_calendar_filter(&mut self) {
        self.selected_calendar_date = None;
        self.selected_filter = TodoFilter::All;
        self.needs_date_picker = false;
        self.emit(TodoEvent::Changed);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.show_error_alert = false;
    }

    /// Forget everything that belonged to the previous session
    pub fn sign_out(&mut self) {
        self.user_id = None;
        self.todos.clear();
        self.clear_error();
        self.emit(TodoEvent::Changed);
    }

    /// Stop acting on behalf of the user. In-flight rollbacks still run.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.user_id = None;
    }

    fn require_user(&mut self) -> CoreResult<Uuid> {
        if !self.active {
            return Err(CoreError::Unauthenticated);
        }
        match self.user_id {
            Some(id) => Ok(id),
            None => Err(self.surface(CoreError::Unauthenticated)),
        }
    }

    fn validate_title(&mut self, title: &str) -> CoreResult<String> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(self.surface(CoreError::validation("Todo title cannot be empty.")));
        }
        Ok(trimmed.to_string())
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.todos.iter().position(|t| t.id == id)
    }

    fn surface(&mut self, err: CoreError) -> CoreError {
        if err.is_user_visible() {
            self.last_error = Some(err.clone());
            self.show_error_alert = true;
            self.emit(TodoEvent::Failed(err.clone()));
        }
        err
    }

    fn emit(&self, event: TodoEvent) {
        if self.active {
            let _ = self.events.send(event);
        }
    }
}

/// Apply `filter` to `todos` as seen on `today`
pub fn filter_todos(
    todos: &[TodoItem],
    filter: TodoFilter,
    calendar_date: Option<NaiveDate>,
    today: NaiveDate,
    week_start: WeekStart,
) -> Vec<&TodoItem> {
    let tomorrow = clock::tomorrow(today);
    let (week_first, week_last) = week_start.week_of(today);

    todos
        .iter()
        .filter(|todo| match (filter, todo.due_date) {
            (TodoFilter::All, _) => true,
            (TodoFilter::CalendarDate, _) if calendar_date.is_none() => true,
            (_, None) => false,
            (TodoFilter::Today, Some(due)) => due == today,
            (TodoFilter::Tomorrow, Some(due)) => due == tomorrow,
            (TodoFilter::Overdue, Some(due)) => due < today && !todo.is_completed,
            (TodoFilter::ThisWeek, Some(due)) => due >= week_first && due <= week_last,
            (TodoFilter::CalendarDate, Some(due)) => Some(due) == calendar_date,
        })
        .collect()
}

/// Restores a todo's pre-edit snapshot on drop unless confirmed
struct PendingEdit<'a> {
    todos: &'a mut Vec<TodoItem>,
    original: Option<TodoItem>,
}

impl<'a> PendingEdit<'a> {
    fn new(todos: &'a mut Vec<TodoItem>, original: TodoItem) -> Self {
        Self {
            todos,
            original: Some(original),
        }
    }

    fn confirm(mut self) {
        self.original = None;
    }
}

impl Drop for PendingEdit<'_> {
    fn drop(&mut self) {
        if let Some(original) = self.original.take()
            && let Some(slot) = self.todos.iter_mut().find(|t| t.id == original.id)
        {
            *slot = original;
        }
    }
}

/// Reinserts removed todos that the server has not confirmed deleting.
///
/// `removed` holds `(original index, todo)` ascending by index, and
/// confirmations arrive in that order.
struct PendingRemoval<'a> {
    todos: &'a mut Vec<TodoItem>,
    removed: Vec<(usize, TodoItem)>,
    confirmed: usize,
}

impl<'a> PendingRemoval<'a> {
    fn new(todos: &'a mut Vec<TodoItem>, removed: Vec<(usize, TodoItem)>) -> Self {
        Self {
            todos,
            removed,
            confirmed: 0,
        }
    }

    fn confirm_next(&mut self) {
        self.confirmed = (self.confirmed + 1).min(self.removed.len());
    }
}

impl Drop for PendingRemoval<'_> {
    fn drop(&mut self) {
        let confirmed = self.confirmed;
        for (index, todo) in self.removed.drain(confirmed..) {
            // Every confirmed deletion sat before this one
            let at = index.saturating_sub(confirmed).min(self.todos.len());
            self.todos.insert(at, todo);
        }
    }
}
