//! Meal templates: the JSON record collection and one companion note per meal.
//!
//! The note is a rendered view of the record. Store operations rewrite it wholesale;
//! edits made to the note directly are read back by `reconcile_document`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::foodlog::{recompute_summary, SummaryLayout};
use crate::model::{now_millis, validate_entries, Meal, MealUpdate, NutritionEntry};
use crate::parser::{extract_meal_metadata, DESCRIPTION_HEADING};
use crate::render::{render_entries, RenderOptions};
use crate::settings::SharedSettings;
use crate::vault::{DocumentLocks, Vault};
use crate::watcher::Debouncer;

pub const MEAL_ITEMS_HEADING: &str = "## 🥗 Items";
const IMAGES_HEADING: &str = "## 🖼️ Images";

/// What reading a meal note back into the store did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The note carries no meal identifier
    NotMeal,
    /// Record already matched the note
    Unchanged,
    /// Items or description were taken from the note
    Updated,
    /// The note had been renamed; the meal took the new name
    Renamed { from: String, to: String },
}

// Filename slug: lowercase alphanumerics separated by single dashes
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }

    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "meal".to_string()
    } else {
        slug.to_string()
    }
}

/// Display name for a file stem: `new-name` becomes `New Name`.
pub fn title_from_slug(stem: &str) -> String {
    stem.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full note text for `meal`.
pub fn render_meal_document(meal: &Meal, opts: &RenderOptions) -> String {
    let mut doc = format!("# 🍱 {}\n\n", meal.name);

    if let Some(description) = meal.description.as_deref() {
        // A blank line ends the description when it is read back
        let body: Vec<&str> = description
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .collect();
        if !body.is_empty() {
            doc.push_str(&format!("{}\n{}\n\n", DESCRIPTION_HEADING, body.join("\n")));
        }
    }

    if !meal.images.is_empty() {
        doc.push_str(IMAGES_HEADING);
        doc.push_str("\n\n");
        for image in &meal.images {
            doc.push_str(&format!("![]({})\n", image));
        }
        doc.push('\n');
    }

    doc.push_str(MEAL_ITEMS_HEADING);
    doc.push_str("\n\n");
    doc.push_str(&render_entries(&meal.items, None, opts));
    recompute_summary(&doc, &SummaryLayout::meal(&meal.id), opts)
}

/// The meal collection and its notes.
#[derive(Clone)]
pub struct MealStore {
    vault: Arc<dyn Vault>,
    settings: SharedSettings,
    locks: DocumentLocks,
    debouncer: Debouncer,
}

impl MealStore {
    pub fn new(
        vault: Arc<dyn Vault>,
        settings: SharedSettings,
        locks: DocumentLocks,
        debouncer: Debouncer,
    ) -> Self {
        Self {
            vault,
            settings,
            locks,
            debouncer,
        }
    }

    fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.settings.snapshot().meals_file)
    }

    fn meals_folder(&self) -> PathBuf {
        PathBuf::from(&self.settings.snapshot().meals_folder)
    }

    /// Where the note for a meal called `name` lives.
    pub fn document_path(&self, name: &str) -> PathBuf {
        self.meals_folder().join(format!("{}.md", slugify(name)))
    }

    async fn load(&self) -> Result<Vec<Meal>> {
        let path = self.store_path();
        if !self.vault.exists(&path).await {
            return Ok(Vec::new());
        }
        let content = self.vault.read(&path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, meals: &[Meal]) -> Result<()> {
        let content = serde_json::to_string_pretty(meals)?;
        self.vault.write(&self.store_path(), &content).await
    }

    async fn write_document(&self, meal: &Meal) -> Result<PathBuf> {
        let path = self.document_path(&meal.name);
        let doc = render_meal_document(meal, &self.settings.render_options());
        self.vault.write(&path, &doc).await?;
        Ok(path)
    }

    // Re-read the note shortly after writing it, in case the watcher raced the write
    fn schedule_self_check(&self, path: PathBuf) {
        let store = self.clone();
        let delay = self.settings.snapshot().self_check_delay();
        let key = path.clone();
        self.debouncer.schedule(key, delay, async move {
            store.reconcile_document(&path).await.map(|_| ())
        });
    }

    pub async fn list(&self) -> Result<Vec<Meal>> {
        let _guard = self.locks.lock(&self.store_path()).await;
        self.load().await
    }

    pub async fn get(&self, id: &str) -> Result<Meal> {
        self.list()
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::MealNotFound(id.to_string()))
    }

    pub async fn create(
        &self,
        name: &str,
        items: Vec<NutritionEntry>,
        description: Option<String>,
        images: Vec<String>,
    ) -> Result<Meal> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("meal name is required".to_string()));
        }
        if !items.is_empty() {
            validate_entries(&items)?;
        }

        let _guard = self.locks.lock(&self.store_path()).await;
        let now = now_millis();
        let meal = Meal {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            items,
            description: description.filter(|d| !d.trim().is_empty()),
            images,
            created_at: now,
            updated_at: now,
        };

        let mut meals = self.load().await?;
        meals.push(meal.clone());
        self.save(&meals).await?;
        let path = self.write_document(&meal).await?;
        info!(id = %meal.id, name = %meal.name, path = %path.display(), "created meal");
        Ok(meal)
    }

    /// Merge `update` into the meal and rewrite its note. A new name gets a new note; the
    /// old one is deleted.
    pub async fn update(&self, id: &str, update: MealUpdate) -> Result<Meal> {
        if let Some(name) = update.name.as_deref() {
            if name.trim().is_empty() {
                return Err(Error::Validation("meal name is required".to_string()));
            }
        }
        if let Some(items) = update.items.as_deref() {
            if !items.is_empty() {
                validate_entries(items)?;
            }
        }

        let _guard = self.locks.lock(&self.store_path()).await;
        let mut meals = self.load().await?;
        let meal = meals
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::MealNotFound(id.to_string()))?;

        let old_path = self.document_path(&meal.name);
        if let Some(name) = update.name {
            meal.name = name.trim().to_string();
        }
        if let Some(items) = update.items {
            meal.items = items;
        }
        if let Some(description) = update.description {
            meal.description = description.filter(|d| !d.trim().is_empty());
        }
        if let Some(images) = update.images {
            meal.images = images;
        }
        meal.updated_at = now_millis();
        let meal = meal.clone();

        self.save(&meals).await?;
        let new_path = self.document_path(&meal.name);
        if new_path != old_path && self.vault.exists(&old_path).await {
            self.vault.delete(&old_path).await?;
            info!(from = %old_path.display(), to = %new_path.display(), "meal renamed");
        }
        let path = self.write_document(&meal).await?;
        self.schedule_self_check(path);
        Ok(meal)
    }

    pub async fn add_items(&self, meal_id: &str, items: Vec<NutritionEntry>) -> Result<Meal> {
        validate_entries(&items)?;
        self.mutate(meal_id, |meal| {
            meal.items.extend(items);
            Ok(())
        })
        .await
    }

    /// Remove the first item structurally equal to `target`. Without a meal id every meal
    /// is scanned for one.
    pub async fn delete_item(&self, meal_id: Option<&str>, target: &NutritionEntry) -> Result<Meal> {
        let target = target.clone();
        self.mutate_owner(meal_id, &target, |meal, index| {
            meal.items.remove(index);
        })
        .await
    }

    /// Swap the first item structurally equal to `target` for `replacement`. When no item
    /// matches, `replacement` is appended to the named meal.
    pub async fn replace_item(
        &self,
        meal_id: &str,
        target: &NutritionEntry,
        replacement: Vec<NutritionEntry>,
    ) -> Result<Meal> {
        validate_entries(&replacement)?;
        let target = target.clone();
        self.mutate(meal_id, move |meal| {
            match meal.items.iter().position(|item| item.same_item(&target)) {
                Some(index) => {
                    let tail = meal.items.split_off(index + 1);
                    meal.items.pop();
                    meal.items.extend(replacement);
                    meal.items.extend(tail);
                }
                None => {
                    warn!(food = %target.food, meal = %meal.name, "item to replace not found; appending instead");
                    meal.items.extend(replacement);
                }
            }
            Ok(())
        })
        .await
    }

    async fn mutate_owner<F>(&self, meal_id: Option<&str>, target: &NutritionEntry, apply: F) -> Result<Meal>
    where
        F: FnOnce(&mut Meal, usize),
    {
        let _guard = self.locks.lock(&self.store_path()).await;
        let mut meals = self.load().await?;
        let found = meals.iter().enumerate().find_map(|(i, meal)| {
            if meal_id.map_or(false, |id| id != meal.id) {
                return None;
            }
            meal.items
                .iter()
                .position(|item| item.same_item(target))
                .map(|index| (i, index))
        });
        let (meal_index, item_index) = found.ok_or_else(|| {
            Error::StructuralMatch(format!("no meal item '{}' ({})", target.food, target.quantity))
        })?;

        let meal = &mut meals[meal_index];
        apply(meal, item_index);
        meal.updated_at = now_millis();
        let meal = meal.clone();
        self.save(&meals).await?;
        let path = self.write_document(&meal).await?;
        self.schedule_self_check(path);
        Ok(meal)
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> Result<Meal>
    where
        F: FnOnce(&mut Meal) -> Result<()>,
    {
        let _guard = self.locks.lock(&self.store_path()).await;
        let mut meals = self.load().await?;
        let meal = meals
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::MealNotFound(id.to_string()))?;
        apply(meal)?;
        meal.updated_at = now_millis();
        let meal = meal.clone();
        self.save(&meals).await?;
        let path = self.write_document(&meal).await?;
        self.schedule_self_check(path);
        Ok(meal)
    }

    /// Read a meal note back into the store.
    ///
    /// The meal's name comes from the note's file name. Items and description come from
    /// the note text, keeping the stored items if none can be parsed. A renamed note is
    /// moved to its canonical slug and any note left at the old slug is removed.
    pub async fn reconcile_document(&self, path: &Path) -> Result<ReconcileOutcome> {
        if !self.vault.exists(path).await {
            debug!(path = %path.display(), "note vanished before reconciliation");
            return Ok(ReconcileOutcome::NotMeal);
        }
        let _guard = self.locks.lock(&self.store_path()).await;
        let text = self.vault.read(path).await?;
        let metadata = match extract_meal_metadata(&text) {
            Some(metadata) => metadata,
            None => return Ok(ReconcileOutcome::NotMeal),
        };

        let mut meals = self.load().await?;
        let meal = meals
            .iter_mut()
            .find(|m| m.id == metadata.id)
            .ok_or_else(|| Error::MealNotFound(metadata.id.clone()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let renamed = slugify(&meal.name) != stem;

        let mut changed = false;
        if metadata.entries.is_empty() {
            if !meal.items.is_empty() {
                warn!(path = %path.display(), "no items parsed from meal note; keeping stored items");
            }
        } else if metadata.entries != meal.items {
            meal.items = metadata.entries;
            changed = true;
        }
        if metadata.description != meal.description {
            meal.description = metadata.description;
            changed = true;
        }
        if changed {
            meal.updated_at = now_millis();
        }

        if !renamed {
            let meal = meal.clone();
            if changed {
                self.save(&meals).await?;
                info!(id = %meal.id, path = %path.display(), "meal updated from note");
            }
            // Keep the summary in step with hand-edited items
            let refreshed = recompute_summary(
                &text,
                &SummaryLayout::meal(&meal.id),
                &self.settings.render_options(),
            );
            if refreshed != text {
                self.vault.write(path, &refreshed).await?;
            }
            return Ok(if changed {
                ReconcileOutcome::Updated
            } else {
                ReconcileOutcome::Unchanged
            });
        }

        let old_name = meal.name.clone();
        let old_path = self.document_path(&old_name);
        meal.name = title_from_slug(&stem);
        meal.updated_at = now_millis();
        let meal = meal.clone();
        self.save(&meals).await?;

        let canonical = self.document_path(&meal.name);
        if canonical != path {
            self.vault.rename(path, &canonical).await?;
        }
        if old_path != canonical && old_path != path && self.vault.exists(&old_path).await {
            self.vault.delete(&old_path).await?;
        }
        self.write_document(&meal).await?;
        info!(id = %meal.id, from = %old_name, to = %meal.name, "meal renamed from note");

        Ok(ReconcileOutcome::Renamed {
            from: old_name,
            to: meal.name,
        })
    }
}
