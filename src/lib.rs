pub mod dialect;
pub mod error;
pub mod estimator;
pub mod foodlog;
pub mod locate;
pub mod meals;
pub mod model;
pub mod parser;
pub mod render;
pub mod session;
pub mod settings;
pub mod vault;
pub mod watcher;

use chrono::NaiveDate;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use error::{Error, Result};
pub use estimator::{HttpEstimator, ImageInput, NutritionEstimator};
pub use foodlog::{AddOutcome, FoodLog, ReplaceOutcome};
pub use meals::{MealStore, ReconcileOutcome};
pub use model::{Meal, MealUpdate, NutritionEntry, NutritionTotals};
pub use session::{AutoConfirm, ModalKind, Prompt, Session};
pub use settings::{load_settings, SharedSettings, Settings};
pub use vault::{FsVault, Vault};
pub use watcher::ChangeEvent;

use model::now_millis;
use vault::DocumentLocks;
use watcher::{watch_vault, VaultWatcher};

/// Which note an entry-level operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryScope {
    FoodLog { date: NaiveDate },
    Meal { meal_id: String },
}

// Running file watcher and the task draining its events
struct WatchState {
    _watcher: VaultWatcher,
    task: JoinHandle<()>,
}

/// Routes note change events to debounced meal reconciliation.
#[derive(Clone)]
struct ChangeRouter {
    vault: Arc<dyn Vault>,
    settings: SharedSettings,
    meals: MealStore,
    session: Session,
}

impl ChangeRouter {
    fn handle(&self, event: ChangeEvent) {
        let absolute = event.path();
        let Some(path) = self.vault.relative(absolute).or_else(|| {
            absolute.is_relative().then(|| absolute.to_path_buf())
        }) else {
            debug!(path = %absolute.display(), "change outside the vault");
            return;
        };
        if path.starts_with(".nutrilog") {
            return;
        }

        let meals = self.meals.clone();
        let key = path.clone();
        let delay = self.settings.snapshot().quiescence();
        self.session.debouncer.schedule(key, delay, async move {
            match meals.reconcile_document(&path).await? {
                ReconcileOutcome::NotMeal | ReconcileOutcome::Unchanged => {}
                outcome => info!(path = %path.display(), ?outcome, "reconciled meal note"),
            }
            Ok(())
        });
    }
}

/// Everything a UI needs: entry and meal operations over one vault.
pub struct NutriLog {
    settings: SharedSettings,
    food_log: FoodLog,
    meals: MealStore,
    session: Session,
    estimator: Arc<dyn NutritionEstimator>,
    router: ChangeRouter,
    watch: Mutex<Option<WatchState>>,
}

impl NutriLog {
    pub fn new(vault: Arc<dyn Vault>, settings: Settings, estimator: Arc<dyn NutritionEstimator>) -> Self {
        let settings = SharedSettings::new(settings);
        let locks = DocumentLocks::default();
        let session = Session::new();
        let food_log = FoodLog::new(Arc::clone(&vault), settings.clone(), locks.clone());
        let meals = MealStore::new(
            Arc::clone(&vault),
            settings.clone(),
            locks,
            session.debouncer.clone(),
        );
        let router = ChangeRouter {
            vault,
            settings: settings.clone(),
            meals: meals.clone(),
            session: session.clone(),
        };
        Self {
            settings,
            food_log,
            meals,
            session,
            estimator,
            router,
            watch: Mutex::new(None),
        }
    }

    /// A vault on disk, with settings from `<root>/.nutrilog/settings.json` and the HTTP
    /// estimator.
    pub fn open(root: &Path) -> Self {
        let settings = load_settings(root).with_env_overrides();
        let estimator = Arc::new(HttpEstimator::new(settings.api.clone()));
        Self::new(Arc::new(FsVault::new(root)), settings, estimator)
    }

    pub fn settings(&self) -> Settings {
        self.settings.snapshot()
    }

    pub fn update_settings(&self, settings: Settings) {
        self.settings.replace(settings);
    }

    /// The host's light/dark signal, used when the theme is set to follow the system.
    pub fn set_system_dark(&self, dark: bool) {
        self.settings.set_system_dark(dark);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn food_log(&self) -> &FoodLog {
        &self.food_log
    }

    pub fn meals(&self) -> &MealStore {
        &self.meals
    }

    pub async fn create_entries(&self, scope: &EntryScope, entries: Vec<NutritionEntry>) -> Result<()> {
        match scope {
            EntryScope::FoodLog { date } => {
                self.food_log.add_entries(*date, &entries).await?;
            }
            EntryScope::Meal { meal_id } => {
                self.meals.add_items(meal_id, entries).await?;
            }
        }
        Ok(())
    }

    pub async fn edit_entry(
        &self,
        scope: &EntryScope,
        target: &NutritionEntry,
        replacement: Vec<NutritionEntry>,
    ) -> Result<()> {
        let _modal = self.session.modal.open(ModalKind::Edit);
        match scope {
            EntryScope::FoodLog { date } => {
                self.food_log.replace_entry(*date, target, &replacement).await?;
            }
            EntryScope::Meal { meal_id } => {
                self.meals.replace_item(meal_id, target, replacement).await?;
            }
        }
        Ok(())
    }

    /// Confirm and delete one entry. Returns `Ok(false)` if the user declined and
    /// `Err(Busy)` while another delete is still in progress.
    pub async fn delete_entry(
        &self,
        scope: &EntryScope,
        target: &NutritionEntry,
        prompt: &dyn Prompt,
    ) -> Result<bool> {
        let token = self.session.delete_lock.try_acquire()?;
        let release = self.settings.snapshot().delete_release_delay();

        let confirmed = {
            let _modal = self.session.modal.open(ModalKind::ConfirmDelete);
            prompt
                .confirm(&format!("Remove {} ({})?", target.food, target.quantity))
                .await
        };
        if !confirmed {
            token.release_after(release);
            return Ok(false);
        }

        let result = match scope {
            EntryScope::FoodLog { date } => self.food_log.delete_entry(*date, target).await,
            EntryScope::Meal { meal_id } => self
                .meals
                .delete_item(Some(meal_id), target)
                .await
                .map(|_| ()),
        };
        token.release_after(release);
        result.map(|_| true)
    }

    /// Ask the estimator about `text`.
    pub async fn describe(&self, text: &str, image: Option<&ImageInput>) -> Result<Vec<NutritionEntry>> {
        if text.trim().is_empty() && image.is_none() {
            return Err(Error::Validation("describe what you ate".to_string()));
        }
        self.estimator.describe(text, image).await
    }

    /// Estimate `text`, log the result for `date` and optionally save it as a meal.
    /// Nothing is written if the estimate fails.
    pub async fn describe_and_log(
        &self,
        text: &str,
        image: Option<&ImageInput>,
        date: NaiveDate,
        save_as_meal: Option<&str>,
    ) -> Result<Vec<NutritionEntry>> {
        if let Some(name) = save_as_meal {
            if name.trim().is_empty() {
                return Err(Error::Validation("meal name is required".to_string()));
            }
        }
        let _modal = self.session.modal.open(ModalKind::Describe);
        let entries = self.describe(text, image).await?;

        self.food_log.add_entries(date, &entries).await?;
        if let Some(name) = save_as_meal {
            let description = Some(text.trim().to_string()).filter(|d| !d.is_empty());
            self.meals
                .create(name, entries.clone(), description, Vec::new())
                .await?;
        }
        Ok(entries)
    }

    /// Add a meal template's items to a day's log, each tagged with the meal.
    pub async fn log_meal(&self, meal_id: &str, date: NaiveDate) -> Result<Vec<NutritionEntry>> {
        let meal = self.meals.get(meal_id).await?;
        if meal.items.is_empty() {
            return Err(Error::Validation(format!("meal '{}' has no items", meal.name)));
        }
        let now = now_millis();
        let entries: Vec<NutritionEntry> = meal
            .items
            .into_iter()
            .map(|mut entry| {
                entry.meal_id = Some(meal.id.clone());
                entry.timestamp = Some(now);
                entry
            })
            .collect();
        self.food_log.add_entries(date, &entries).await?;
        info!(meal = %meal.name, date = %date, "logged meal");
        Ok(entries)
    }

    pub async fn refresh_summary(&self, date: NaiveDate) -> Result<()> {
        self.food_log.refresh_summary(date).await
    }

    pub async fn create_meal(
        &self,
        name: &str,
        items: Vec<NutritionEntry>,
        description: Option<String>,
        images: Vec<String>,
    ) -> Result<Meal> {
        self.meals.create(name, items, description, images).await
    }

    pub async fn update_meal(&self, id: &str, update: MealUpdate) -> Result<Meal> {
        self.meals.update(id, update).await
    }

    pub async fn list_meals(&self) -> Result<Vec<Meal>> {
        self.meals.list().await
    }

    pub async fn get_meal(&self, id: &str) -> Result<Meal> {
        self.meals.get(id).await
    }

    pub async fn add_items_to_meal(&self, meal_id: &str, items: Vec<NutritionEntry>) -> Result<Meal> {
        self.meals.add_items(meal_id, items).await
    }

    /// Queue reconciliation for a changed note once it has been quiet for the
    /// configured window.
    pub fn handle_change(&self, event: ChangeEvent) {
        self.router.handle(event);
    }

    /// Watch `root` and reconcile meal notes as they change. Replaces any running watcher.
    pub fn start_file_watcher(&self, root: &Path) -> Result<()> {
        let (watcher, mut events) = watch_vault(root)?;
        let router = self.router.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                router.handle(event);
            }
            debug!("change stream closed");
        });

        let previous = self
            .watch
            .lock()
            .expect("file watcher mutex")
            .replace(WatchState {
                _watcher: watcher,
                task,
            });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        info!(root = %root.display(), "file watcher started");
        Ok(())
    }

    /// Stop watching and cancel pending reconciliations.
    pub fn dispose(&self) {
        if let Some(state) = self.watch.lock().expect("file watcher mutex").take() {
            state.task.abort();
        }
        self.session.dispose();
    }
}

impl Drop for NutriLog {
    fn drop(&mut self) {
        self.dispose();
    }
}
