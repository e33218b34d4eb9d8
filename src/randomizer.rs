//! Random activity picker
//!
//! Each category is a slot. Rolling a slot marks it as spinning, waits out a
//! presentation delay, then picks one of its activities uniformly at random.
//! Whenever every slot holds a result the board is snapshotted into history.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Activity, Category, HistoryEntry};
use crate::remote::RemoteDataService;

const EVENT_CAPACITY: usize = 64;

/// Timing and limits for the picker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomizerSettings {
    /// How long a slot spins before its result lands
    pub roll_delay: Duration,
    /// Offset between slot start times when rolling everything
    pub stagger: Duration,
    pub history_limit: usize,
    /// Fewest activities a category needs before it may be rolled
    pub min_activities: usize,
}

impl Default for RandomizerSettings {
    fn default() -> Self {
        Self {
            roll_delay: Duration::from_millis(2000),
            stagger: Duration::from_millis(300),
            history_limit: 10,
            min_activities: 2,
        }
    }
}

impl RandomizerSettings {
    /// No presentation delays
    pub fn instant() -> Self {
        Self {
            roll_delay: Duration::ZERO,
            stagger: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RandomizerEvent {
    Loaded,
    RollStarted(Uuid),
    RollFinished { category_id: Uuid, activity_id: Uuid },
    HistoryRecorded,
    ResultsReset,
    CategoryRemoved(Uuid),
    Failed(CoreError),
}

/// The pick made by one roll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    pub category: Category,
    pub activity: Activity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
    Start,
    Finish,
}

pub struct ActivityRandomizer<S, R = StdRng> {
    remote: Arc<S>,
    rng: R,
    settings: RandomizerSettings,
    user_id: Option<Uuid>,
    categories: Vec<Category>,
    activities: HashMap<Uuid, Vec<Activity>>,
    rolling: HashMap<Uuid, bool>,
    results: HashMap<Uuid, Activity>,
    history: VecDeque<HistoryEntry>,
    is_loading: bool,
    last_error: Option<CoreError>,
    active: bool,
    events: broadcast::Sender<RandomizerEvent>,
}

impl<S: RemoteDataService> ActivityRandomizer<S, StdRng> {
    pub fn new(remote: Arc<S>, settings: RandomizerSettings) -> Self {
        Self::with_rng(remote, settings, StdRng::from_os_rng())
    }
}

impl<S: RemoteDataService, R: Rng> ActivityRandomizer<S, R> {
    pub fn with_rng(remote: Arc<S>, settings: RandomizerSettings, rng: R) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            remote,
            rng,
            settings,
            user_id: None,
            categories: Vec::new(),
            activities: HashMap::new(),
            rolling: HashMap::new(),
            results: HashMap::new(),
            history: VecDeque::new(),
            is_loading: false,
            last_error: None,
            active: true,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RandomizerEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &RandomizerSettings {
        &self.settings
    }

    /// Fetch categories, then each category's activities.
    ///
    /// Stops at the first failure. Activity lists not yet refreshed keep
    /// their previous contents.
    pub async fn load_all(&mut self, user_id: Option<Uuid>) -> CoreResult<()> {
        if !self.active {
            return Err(CoreError::Unauthenticated);
        }
        let Some(owner) = user_id else {
            return Err(self.surface(CoreError::Unauthenticated));
        };
        self.user_id = Some(owner);
        self.is_loading = true;
        self.last_error = None;

        let result = self.load_from(owner).await;
        self.is_loading = false;

        match result {
            Ok(()) => {
                self.emit(RandomizerEvent::Loaded);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load activities");
                Err(self.surface(e))
            }
        }
    }

    /// Cached state is only replaced once the category list is in hand, so a
    /// failed reload leaves the last good board intact.
    async fn load_from(&mut self, owner: Uuid) -> CoreResult<()> {
        let categories = self.remote.list_categories(owner).await?;
        tracing::info!(count = categories.len(), "Loaded categories");
        self.rolling.clear();
        self.results.clear();
        self.activities.retain(|id, _| categories.iter().any(|c| c.id == *id));
        self.categories = categories;

        let ids: Vec<Uuid> = self.categories.iter().map(|c| c.id).collect();
        for id in ids {
            let activities = self.remote.list_activities(id, owner).await?;
            tracing::debug!(category_id = %id, count = activities.len(), "Loaded activities");
            self.activities.insert(id, activities);
            self.rolling.insert(id, false);
        }
        Ok(())
    }

    pub fn has_enough_activities(&self, category_id: Uuid) -> bool {
        self.activities(category_id).len() >= self.settings.min_activities
    }

    /// Roll one slot. Returns `None` without touching state when the category
    /// is unknown or has too few activities.
    pub async fn roll(&mut self, category_id: Uuid) -> Option<RollOutcome> {
        if !self.begin_roll(category_id) {
            return None;
        }
        tokio::time::sleep(self.settings.roll_delay).await;
        self.finish_roll(category_id)
    }

    /// Roll one slot and hand the pick to `on_complete` once state has settled
    pub async fn roll_with<F, Fut>(&mut self, category_id: Uuid, on_complete: F) -> Option<RollOutcome>
    where
        F: FnOnce(Activity, Category) -> Fut,
        Fut: Future<Output = ()>,
    {
        let outcome = self.roll(category_id).await?;
        on_complete(outcome.activity.clone(), outcome.category.clone()).await;
        Some(outcome)
    }

    /// Roll every eligible slot, starting each one `stagger` after the previous
    pub async fn roll_all(&mut self) -> Vec<RollOutcome> {
        let eligible: Vec<Uuid> = self
            .categories
            .iter()
            .map(|c| c.id)
            .filter(|id| self.has_enough_activities(*id))
            .collect();
        tracing::info!(slots = eligible.len(), "Rolling all slots");

        let mut steps = Vec::with_capacity(eligible.len() * 2);
        for (i, id) in eligible.into_iter().enumerate() {
            let start = self.settings.stagger.saturating_mul(i as u32);
            steps.push((start, Step::Start, id));
            steps.push((start.saturating_add(self.settings.roll_delay), Step::Finish, id));
        }
        steps.sort_by_key(|(at, step, _)| (*at, *step));

        let origin = Instant::now();
        let mut started = Vec::new();
        let mut outcomes = Vec::new();
        for (at, step, id) in steps {
            tokio::time::sleep_until(origin + at).await;
            match step {
                Step::Start => {
                    if self.begin_roll(id) {
                        started.push(id);
                    }
                }
                Step::Finish if started.contains(&id) => {
                    outcomes.extend(self.finish_roll(id));
                }
                Step::Finish => {}
            }
        }
        outcomes
    }

    fn begin_roll(&mut self, category_id: Uuid) -> bool {
        if !self.active {
            return false;
        }
        let Some(category) = self.category(category_id) else {
            tracing::debug!(category_id = %category_id, "Roll skipped, unknown category");
            return false;
        };
        if !self.has_enough_activities(category_id) {
            tracing::debug!(category = %category.name, "Roll skipped, not enough activities");
            return false;
        }

        tracing::debug!(category = %category.name, "Rolling slot");
        self.rolling.insert(category_id, true);
        self.emit(RandomizerEvent::RollStarted(category_id));
        true
    }

    fn finish_roll(&mut self, category_id: Uuid) -> Option<RollOutcome> {
        let category = self.category(category_id)?.clone();
        let activity = self
            .activities
            .get(&category_id)?
            .choose(&mut self.rng)?
            .clone();

        self.results.insert(category_id, activity.clone());
        self.rolling.insert(category_id, false);
        tracing::info!(category = %category.name, activity = %activity.name, "Slot result");
        self.emit(RandomizerEvent::RollFinished {
            category_id,
            activity_id: activity.id,
        });
        self.record_if_full();

        Some(RollOutcome { category, activity })
    }

    fn record_if_full(&mut self) {
        if !self.all_complete() {
            return;
        }

        let results = self
            .categories
            .iter()
            .filter_map(|c| self.results.get(&c.id).map(|a| (c.id, a.clone())))
            .collect();
        self.history.push_front(HistoryEntry {
            results,
            categories: self.categories.clone(),
            generated_at: Utc::now(),
        });
        self.history.truncate(self.settings.history_limit);

        tracing::debug!(total = self.history.len(), "Recorded full board");
        self.emit(RandomizerEvent::HistoryRecorded);
    }

    pub fn reset_one(&mut self, category_id: Uuid) {
        if self.results.remove(&category_id).is_some() {
            self.emit(RandomizerEvent::ResultsReset);
        }
    }

    pub fn reset_all(&mut self) {
        if !self.results.is_empty() {
            self.results.clear();
            self.emit(RandomizerEvent::ResultsReset);
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Delete a category on the backend, then drop everything cached for it
    pub async fn delete_category(&mut self, category_id: Uuid) -> CoreResult<()> {
        if !self.active {
            return Err(CoreError::Unauthenticated);
        }
        let Some(owner) = self.user_id else {
            return Err(self.surface(CoreError::Unauthenticated));
        };

        if let Err(e) = self.remote.delete_category(category_id, owner).await {
            tracing::warn!(category_id = %category_id, error = %e, "Failed to delete category");
            return Err(self.surface(e.into()));
        }

        self.categories.retain(|c| c.id != category_id);
        self.activities.remove(&category_id);
        self.rolling.remove(&category_id);
        self.results.remove(&category_id);
        tracing::info!(category_id = %category_id, "Deleted category");
        self.emit(RandomizerEvent::CategoryRemoved(category_id));
        Ok(())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, category_id: Uuid) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == category_id)
    }

    pub fn activities(&self, category_id: Uuid) -> &[Activity] {
        self.activities
            .get(&category_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn result(&self, category_id: Uuid) -> Option<&Activity> {
        self.results.get(&category_id)
    }

    pub fn is_rolling(&self, category_id: Uuid) -> bool {
        self.rolling.get(&category_id).copied().unwrap_or(false)
    }

    pub fn is_any_rolling(&self) -> bool {
        self.rolling.values().any(|r| *r)
    }

    /// Every known category currently holds a result
    pub fn all_complete(&self) -> bool {
        !self.categories.is_empty()
            && self
                .categories
                .iter()
                .all(|c| self.results.contains_key(&c.id))
    }

    pub fn has_any_result(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.results.len()
    }

    /// Most recent first
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn sign_out(&mut self) {
        self.user_id = None;
        self.categories.clear();
        self.activities.clear();
        self.rolling.clear();
        self.results.clear();
        self.history.clear();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.user_id = None;
    }

    fn surface(&mut self, err: CoreError) -> CoreError {
        if err.is_user_visible() {
            self.last_error = Some(err.clone());
            self.emit(RandomizerEvent::Failed(err.clone()));
        }
        err
    }

    fn emit(&self, event: RandomizerEvent) {
        if self.active {
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Board {
        remote: Arc<FakeRemote>,
        picker: ActivityRandomizer<FakeRemote>,
        categories: Vec<Category>,
    }

    async fn board(settings: RandomizerSettings, layout: &[(&str, &[&str])]) -> Board {
        let remote = Arc::new(FakeRemote::new());
        let user = Uuid::new_v4();
        let categories = layout
            .iter()
            .map(|(name, activities)| remote.seed_category(user, name, activities))
            .collect();
        let mut picker =
            ActivityRandomizer::with_rng(Arc::clone(&remote), settings, StdRng::seed_from_u64(7));
        picker.load_all(Some(user)).await.unwrap();
        Board {
            remote,
            picker,
            categories,
        }
    }

    #[tokio::test]
    async fn load_populates_slots() {
        let b = board(
            RandomizerSettings::instant(),
            &[("Go", &["Park", "Lake"]), ("Eat", &["Pho"])],
        )
        .await;

        assert_eq!(b.picker.categories().len(), 2);
        assert_eq!(b.picker.activities(b.categories[0].id).len(), 2);
        assert!(!b.picker.is_rolling(b.categories[0].id));
        assert!(b.picker.has_enough_activities(b.categories[0].id));
        assert!(!b.picker.has_enough_activities(b.categories[1].id));
    }

    #[tokio::test]
    async fn load_without_user_fails() {
        let remote = Arc::new(FakeRemote::new());
        let mut picker = ActivityRandomizer::new(remote, RandomizerSettings::instant());
        assert_eq!(picker.load_all(None).await, Err(CoreError::Unauthenticated));
    }

    #[tokio::test]
    async fn failed_load_keeps_partial_state() {
        let remote = Arc::new(FakeRemote::new());
        let user = Uuid::new_v4();
        let first = remote.seed_category(user, "Go", &["Park", "Lake"]);
        let second = remote.seed_category(user, "Eat", &["Pho", "Bun"]);
        remote.fail_on(second.id);

        let mut picker = ActivityRandomizer::new(Arc::clone(&remote), RandomizerSettings::instant());
        assert!(picker.load_all(Some(user)).await.is_err());

        assert_eq!(picker.categories().len(), 2);
        assert_eq!(picker.activities(first.id).len(), 2);
        assert!(picker.activities(second.id).is_empty());
        assert!(picker.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn roll_spins_then_lands() {
        let mut b = board(RandomizerSettings::default(), &[("Go", &["Park", "Lake"])]).await;
        let id = b.categories[0].id;
        let mut events = b.picker.subscribe();

        let outcome = b.picker.roll(id).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), RandomizerEvent::RollStarted(id));
        assert!(b.picker.activities(id).contains(&outcome.activity));
        assert_eq!(b.picker.result(id), Some(&outcome.activity));
        assert!(!b.picker.is_rolling(id));
    }

    #[tokio::test]
    async fn single_activity_category_never_rolls() {
        let mut b = board(RandomizerSettings::instant(), &[("Eat", &["Pho"])]).await;
        let id = b.categories[0].id;
        let called = Mutex::new(false);

        let outcome = b
            .picker
            .roll_with(id, |_, _| async {
                *called.lock().unwrap() = true;
            })
            .await;

        assert_eq!(outcome, None);
        assert!(!*called.lock().unwrap());
        assert_eq!(b.picker.result(id), None);
        assert!(!b.picker.is_rolling(id));
        assert_eq!(b.picker.history_len(), 0);
    }

    #[tokio::test]
    async fn unknown_category_reads_as_defaults() {
        let mut b = board(RandomizerSettings::instant(), &[]).await;
        let ghost = Uuid::new_v4();
        assert_eq!(b.picker.roll(ghost).await, None);
        assert_eq!(b.picker.result(ghost), None);
        assert!(b.picker.activities(ghost).is_empty());
        assert!(!b.picker.is_rolling(ghost));
    }

    #[tokio::test(start_paused = true)]
    async fn full_board_forms_history() {
        let mut b = board(
            RandomizerSettings::default(),
            &[("Go", &["Park", "Lake", "Mall"]), ("Eat", &["Pho", "Bun", "Kem"])],
        )
        .await;

        let outcomes = b.picker.roll_all().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(b.picker.history_len(), 1);

        let entry = b.picker.history().next().unwrap().clone();
        for c in &b.categories {
            assert_eq!(entry.result(c.id), b.picker.result(c.id));
        }

        b.picker.roll(b.categories[0].id).await.unwrap();
        assert_eq!(b.picker.history_len(), 2);
        let oldest = b.picker.history().last().unwrap();
        assert_eq!(oldest, &entry);
    }

    #[tokio::test]
    async fn history_lists_results_in_board_order() {
        let mut b = board(
            RandomizerSettings::instant(),
            &[("Go", &["Park", "Lake"]), ("Eat", &["Pho", "Bun"])],
        )
        .await;
        b.picker.roll_all().await;

        let go = b.picker.result(b.categories[0].id).unwrap().name.clone();
        let eat = b.picker.result(b.categories[1].id).unwrap().name.clone();
        let entry = b.picker.history().next().unwrap();
        assert_eq!(
            entry.formatted_results(),
            vec![("Go", go.as_str()), ("Eat", eat.as_str())]
        );

        b.picker.clear_history();
        assert_eq!(b.picker.history_len(), 0);
        assert!(b.picker.all_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_roll_stays_spinning_until_rerolled() {
        let mut b = board(RandomizerSettings::default(), &[("Go", &["Park", "Lake"])]).await;
        let id = b.categories[0].id;
        assert!(!b.picker.is_any_rolling());

        let abandoned = tokio::time::timeout(Duration::from_millis(10), b.picker.roll(id)).await;
        assert!(abandoned.is_err());
        assert!(b.picker.is_any_rolling());
        assert_eq!(b.picker.result(id), None);

        b.picker.roll(id).await.unwrap();
        assert!(!b.picker.is_any_rolling());
        assert!(b.picker.result(id).is_some());
    }

    #[tokio::test]
    async fn offline_reload_keeps_last_good_board() {
        let mut b = board(RandomizerSettings::instant(), &[("Go", &["Park", "Lake"])]).await;
        let id = b.categories[0].id;
        let user = b.categories[0].user_id;
        let picked = b.picker.roll(id).await.unwrap().activity;

        b.remote.set_offline(true);
        assert!(b.picker.load_all(Some(user)).await.is_err());

        assert_eq!(b.picker.categories().len(), 1);
        assert_eq!(b.picker.activities(id).len(), 2);
        assert!(b.picker.has_enough_activities(id));
        assert_eq!(b.picker.result(id), Some(&picked));
        assert!(b.picker.last_error().is_some());

        b.remote.set_offline(false);
        b.picker.load_all(Some(user)).await.unwrap();
        assert_eq!(b.picker.result(id), None);
        assert_eq!(b.picker.activities(id).len(), 2);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let settings = RandomizerSettings {
            history_limit: 3,
            ..RandomizerSettings::instant()
        };
        let mut b = board(settings, &[("Go", &["Park", "Lake"])]).await;
        let id = b.categories[0].id;

        for _ in 0..5 {
            b.picker.roll(id).await.unwrap();
        }
        assert_eq!(b.picker.history_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn roll_all_staggers_starts() {
        let mut b = board(
            RandomizerSettings::default(),
            &[("Go", &["Park", "Lake"]), ("Eat", &["Pho", "Bun"])],
        )
        .await;
        let started = Instant::now();

        b.picker.roll_all().await;

        // Second slot starts one stagger later and spins for the full delay
        let settings = RandomizerSettings::default();
        assert_eq!(started.elapsed(), settings.stagger + settings.roll_delay);
    }

    #[tokio::test]
    async fn roll_all_skips_thin_categories() {
        let mut b = board(
            RandomizerSettings::instant(),
            &[("Go", &["Park", "Lake"]), ("Eat", &["Pho"])],
        )
        .await;

        let outcomes = b.picker.roll_all().await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].category.id, b.categories[0].id);
        assert_eq!(b.picker.history_len(), 0);
    }

    #[tokio::test]
    async fn reset_clears_results_only() {
        let mut b = board(
            RandomizerSettings::instant(),
            &[("Go", &["Park", "Lake"]), ("Eat", &["Pho", "Bun"])],
        )
        .await;
        b.picker.roll_all().await;

        b.picker.reset_one(b.categories[0].id);
        assert_eq!(b.picker.result(b.categories[0].id), None);
        assert!(b.picker.result(b.categories[1].id).is_some());
        assert_eq!(b.picker.history_len(), 1);

        b.picker.reset_all();
        assert!(!b.picker.has_any_result());
        assert_eq!(b.picker.history_len(), 1);
        b.picker.reset_all();
    }

    #[tokio::test]
    async fn delete_category_drops_local_state() {
        let mut b = board(
            RandomizerSettings::instant(),
            &[("Go", &["Park", "Lake"]), ("Eat", &["Pho", "Bun"])],
        )
        .await;
        let id = b.categories[0].id;
        b.picker.roll(id).await.unwrap();

        b.picker.delete_category(id).await.unwrap();

        assert_eq!(b.picker.categories().len(), 1);
        assert!(b.picker.activities(id).is_empty());
        assert_eq!(b.picker.result(id), None);
        assert_eq!(b.remote.category_count(), 1);
    }

    #[tokio::test]
    async fn failed_delete_keeps_local_state() {
        let mut b = board(RandomizerSettings::instant(), &[("Go", &["Park", "Lake"])]).await;
        let id = b.categories[0].id;
        b.remote.fail_on(id);

        assert!(b.picker.delete_category(id).await.is_err());

        assert_eq!(b.picker.categories().len(), 1);
        assert_eq!(b.picker.activities(id).len(), 2);
        assert!(b.picker.last_error().is_some());
    }
}
