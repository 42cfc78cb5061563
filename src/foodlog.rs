//! Daily food log notes: creating them, adding, replacing and removing entry cards, and
//! keeping the summary section current.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dialect::block_ranges;
use crate::error::{Error, Result};
use crate::locate::{excise, locate, splice, MatchMode};
use crate::model::{validate_entries, CardContext, NutritionEntry};
use crate::parser::{compute_totals, extract_entries};
use crate::render::{render_call_to_action, render_entries, render_summary, RenderOptions};
use crate::settings::SharedSettings;
use crate::vault::{DocumentLocks, Vault};

pub const LOG_ITEMS_HEADING: &str = "## 🥗 Food Items";
pub const LOG_SUMMARY_HEADING: &str = "## 📊 Daily Summary";
pub const MEAL_SUMMARY_HEADING: &str = "## 📊 Nutrition Summary";
pub const FOOTER_MARKER: &str = "<!-- nutrilog:footer -->";
const FOOTER_TEXT: &str = "---\n*Tracked with NutriLog*";

/// Which summary heading and call-to-action a note ends with.
#[derive(Debug, Clone)]
pub struct SummaryLayout {
    pub heading: &'static str,
    pub context: CardContext,
}

impl SummaryLayout {
    pub fn food_log() -> Self {
        Self {
            heading: LOG_SUMMARY_HEADING,
            context: CardContext::FoodLog,
        }
    }

    pub fn meal(meal_id: &str) -> Self {
        Self {
            heading: MEAL_SUMMARY_HEADING,
            context: CardContext::Meal(meal_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The day had no note yet
    Created,
    /// Entries were added to an existing note
    Appended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// The old card could not be found, so the new entries were added instead
    Appended,
}

fn footer() -> String {
    format!("{}\n{}\n", FOOTER_MARKER, FOOTER_TEXT)
}

// Offset of a line that starts with `heading`
fn find_heading(text: &str, heading: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end().starts_with(heading) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Strip every call-to-action, the summary section and the footer, then append a fresh
/// call-to-action, summary and footer computed from the entries left in the note.
///
/// Running this twice gives the same text as running it once.
pub fn recompute_summary(text: &str, layout: &SummaryLayout, opts: &RenderOptions) -> String {
    let mut body = text.to_string();
    for range in block_ranges(&body, "nt-cta").into_iter().rev() {
        body = excise(&body, range);
    }

    let cut = [
        find_heading(&body, layout.heading),
        body.find(FOOTER_MARKER),
    ]
    .into_iter()
    .flatten()
    .min();
    if let Some(cut) = cut {
        body.truncate(cut);
    }
    for range in block_ranges(&body, "nt-summary-card").into_iter().rev() {
        body = excise(&body, range);
    }

    let totals = compute_totals(&extract_entries(&body));
    format!(
        "{}\n\n{}\n\n{}\n\n{}\n\n{}",
        body.trim_end(),
        render_call_to_action(&layout.context, opts),
        layout.heading,
        render_summary(&totals, opts),
        footer()
    )
}

/// A new day's note containing `entries`.
pub fn build_log_document(date: NaiveDate, entries: &[NutritionEntry], opts: &RenderOptions) -> String {
    let doc = format!(
        "# 🍽️ Food Log: {}\n\n{}\n\n{}\n",
        date.format("%A, %B %-d, %Y"),
        LOG_ITEMS_HEADING,
        render_entries(entries, None, opts)
    );
    recompute_summary(&doc, &SummaryLayout::food_log(), opts)
}

/// Add cards for `entries` ahead of the summary section (or at the end of a note that has
/// none) and recompute the summary.
pub fn append_entries(
    text: &str,
    entries: &[NutritionEntry],
    layout: &SummaryLayout,
    opts: &RenderOptions,
) -> String {
    let rendered = render_entries(entries, None, opts);
    let insert_at = [
        block_ranges(text, "nt-cta").first().map(|r| r.start),
        find_heading(text, layout.heading),
    ]
    .into_iter()
    .flatten()
    .min();

    let doc = match insert_at {
        Some(at) => format!(
            "{}\n\n{}\n\n{}",
            text[..at].trim_end(),
            rendered,
            &text[at..]
        ),
        None => {
            warn!("summary section not found; appending entries at the end");
            format!("{}\n\n{}\n", text.trim_end(), rendered)
        }
    };
    recompute_summary(&doc, layout, opts)
}

/// Swap the card for `target` with cards for `replacement`. Falls back to appending when
/// the old card cannot be located.
pub fn replace_entry_in(
    text: &str,
    target: &NutritionEntry,
    replacement: &[NutritionEntry],
    layout: &SummaryLayout,
    opts: &RenderOptions,
) -> (String, ReplaceOutcome) {
    match locate(text, target, MatchMode::Replace) {
        Some(found) => {
            let doc = splice(text, found.range, &render_entries(replacement, None, opts));
            (recompute_summary(&doc, layout, opts), ReplaceOutcome::Replaced)
        }
        None => {
            warn!(food = %target.food, "entry to replace not found; appending instead");
            (
                append_entries(text, replacement, layout, opts),
                ReplaceOutcome::Appended,
            )
        }
    }
}

/// Remove the card for `target`. Not finding it is an error: deleting is destructive and
/// must not silently hit the wrong card or nothing at all.
pub fn delete_entry_from(
    text: &str,
    target: &NutritionEntry,
    layout: &SummaryLayout,
    opts: &RenderOptions,
) -> Result<String> {
    let found = locate(text, target, MatchMode::Delete).ok_or_else(|| {
        Error::StructuralMatch(format!("no card for '{}' ({})", target.food, target.quantity))
    })?;
    Ok(recompute_summary(&excise(text, found.range), layout, opts))
}

/// Daily log notes inside a vault.
pub struct FoodLog {
    vault: Arc<dyn Vault>,
    settings: SharedSettings,
    locks: DocumentLocks,
}

impl FoodLog {
    pub fn new(vault: Arc<dyn Vault>, settings: SharedSettings, locks: DocumentLocks) -> Self {
        Self {
            vault,
            settings,
            locks,
        }
    }

    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        Path::new(&self.settings.snapshot().food_log_folder)
            .join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    /// Entries currently in the day's note; empty if the note does not exist.
    pub async fn entries_for(&self, date: NaiveDate) -> Result<Vec<NutritionEntry>> {
        let path = self.log_path(date);
        if !self.vault.exists(&path).await {
            return Ok(Vec::new());
        }
        Ok(extract_entries(&self.vault.read(&path).await?))
    }

    pub async fn add_entries(&self, date: NaiveDate, entries: &[NutritionEntry]) -> Result<AddOutcome> {
        validate_entries(entries)?;
        let path = self.log_path(date);
        let _guard = self.locks.lock(&path).await;
        let opts = self.settings.render_options();

        if !self.vault.exists(&path).await {
            self.vault
                .write(&path, &build_log_document(date, entries, &opts))
                .await?;
            info!(path = %path.display(), count = entries.len(), "created food log");
            return Ok(AddOutcome::Created);
        }

        let text = self.vault.read(&path).await?;
        let updated = append_entries(&text, entries, &SummaryLayout::food_log(), &opts);
        self.vault.write(&path, &updated).await?;
        info!(path = %path.display(), count = entries.len(), "added entries to food log");
        Ok(AddOutcome::Appended)
    }

    pub async fn replace_entry(
        &self,
        date: NaiveDate,
        target: &NutritionEntry,
        replacement: &[NutritionEntry],
    ) -> Result<ReplaceOutcome> {
        validate_entries(replacement)?;
        let path = self.log_path(date);
        let _guard = self.locks.lock(&path).await;
        let opts = self.settings.render_options();

        if !self.vault.exists(&path).await {
            self.vault
                .write(&path, &build_log_document(date, replacement, &opts))
                .await?;
            return Ok(ReplaceOutcome::Appended);
        }

        let text = self.vault.read(&path).await?;
        let (updated, outcome) =
            replace_entry_in(&text, target, replacement, &SummaryLayout::food_log(), &opts);
        self.vault.write(&path, &updated).await?;
        info!(path = %path.display(), ?outcome, "replaced food log entry");
        Ok(outcome)
    }

    pub async fn delete_entry(&self, date: NaiveDate, target: &NutritionEntry) -> Result<()> {
        let path = self.log_path(date);
        let _guard = self.locks.lock(&path).await;
        if !self.vault.exists(&path).await {
            return Err(Error::StructuralMatch(format!(
                "no food log for {}",
                date.format("%Y-%m-%d")
            )));
        }

        let text = self.vault.read(&path).await?;
        let updated = delete_entry_from(
            &text,
            target,
            &SummaryLayout::food_log(),
            &self.settings.render_options(),
        )?;
        self.vault.write(&path, &updated).await?;
        info!(path = %path.display(), food = %target.food, "deleted food log entry");
        Ok(())
    }

    /// Recompute the day's summary from the cards in the note.
    pub async fn refresh_summary(&self, date: NaiveDate) -> Result<()> {
        let path = self.log_path(date);
        let _guard = self.locks.lock(&path).await;
        if !self.vault.exists(&path).await {
            return Ok(());
        }
        let text = self.vault.read(&path).await?;
        let updated = recompute_summary(
            &text,
            &SummaryLayout::food_log(),
            &self.settings.render_options(),
        );
        if updated != text {
            self.vault.write(&path, &updated).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::vault::FsVault;

    fn banana() -> NutritionEntry {
        NutritionEntry::new("Banana", "1 medium", 105.0, 1.3, 27.0, 0.4)
    }

    fn oats() -> NutritionEntry {
        NutritionEntry::new("Oatmeal", "1 cup", 150.0, 5.0, 27.0, 3.0)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn count_cards(text: &str) -> usize {
        text.matches("class=\"nt-food-card").count()
    }

    #[test]
    fn test_build_log_document_layout() {
        let doc = build_log_document(date(), &[banana()], &RenderOptions::default());
        assert!(doc.starts_with("# 🍽️ Food Log: Monday, October 19, 2026"));
        assert_eq!(count_cards(&doc), 1);
        assert!(doc.contains("105 / 2000 kcal"));

        let items = doc.find(LOG_ITEMS_HEADING).unwrap();
        let card = doc.find("nt-food-card").unwrap();
        let cta = doc.find("nt-cta").unwrap();
        let summary = doc.find(LOG_SUMMARY_HEADING).unwrap();
        let footer = doc.find(FOOTER_MARKER).unwrap();
        assert!(items < card && card < cta && cta < summary && summary < footer);
    }

    #[test]
    fn test_recompute_summary_is_idempotent() {
        let opts = RenderOptions::default();
        let layout = SummaryLayout::food_log();
        let doc = build_log_document(date(), &[banana(), oats()], &opts);
        let once = recompute_summary(&doc, &layout, &opts);
        let twice = recompute_summary(&once, &layout, &opts);
        assert_eq!(once, twice);
        assert_eq!(once, doc);
    }

    #[test]
    fn test_recompute_summary_on_note_without_summary() {
        let opts = RenderOptions::default();
        let layout = SummaryLayout::food_log();
        let bare = "# Notes\n\nJust text.\n";
        let first = recompute_summary(bare, &layout, &opts);
        assert!(first.contains("0 / 2000 kcal"));
        assert!(first.ends_with(&footer()));
        assert_eq!(recompute_summary(&first, &layout, &opts), first);
    }

    #[test]
    fn test_append_entries_before_summary() {
        let opts = RenderOptions::default();
        let layout = SummaryLayout::food_log();
        let doc = build_log_document(date(), &[banana()], &opts);
        let updated = append_entries(&doc, &[oats()], &layout, &opts);
        assert_eq!(extract_entries(&updated), vec![banana(), oats()]);
        assert!(updated.contains("255 / 2000 kcal"));
        assert_eq!(updated.matches("data-nt-context=").count(), 1);
        assert_eq!(updated.matches(FOOTER_MARKER).count(), 1);
        assert!(updated.rfind("nt-food-card").unwrap() < updated.find(LOG_SUMMARY_HEADING).unwrap());
    }

    #[test]
    fn test_append_to_malformed_note() {
        let opts = RenderOptions::default();
        let updated = append_entries("# Hand written\n", &[oats()], &SummaryLayout::food_log(), &opts);
        assert_eq!(extract_entries(&updated), vec![oats()]);
        assert!(updated.contains(LOG_SUMMARY_HEADING));
        assert!(updated.contains(FOOTER_MARKER));
    }

    #[test]
    fn test_replace_and_fallback() {
        let opts = RenderOptions::default();
        let layout = SummaryLayout::food_log();
        let doc = build_log_document(date(), &[banana(), oats()], &opts);
        let bigger = NutritionEntry::new("Banana", "2 medium", 210.0, 2.6, 54.0, 0.8);

        let (replaced, outcome) = replace_entry_in(&doc, &banana(), &[bigger.clone()], &layout, &opts);
        assert_eq!(outcome, ReplaceOutcome::Replaced);
        assert_eq!(extract_entries(&replaced), vec![bigger.clone(), oats()]);
        assert!(replaced.contains("360 / 2000 kcal"));

        let missing = NutritionEntry::new("Pizza", "1 slice", 285.0, 12.0, 36.0, 10.0);
        let (appended, outcome) = replace_entry_in(&doc, &missing, &[bigger.clone()], &layout, &opts);
        assert_eq!(outcome, ReplaceOutcome::Appended);
        assert_eq!(extract_entries(&appended), vec![banana(), oats(), bigger]);
    }

    #[test]
    fn test_delete_entry_from_document() {
        let opts = RenderOptions::default();
        let layout = SummaryLayout::food_log();
        let doc = build_log_document(date(), &[banana()], &opts);
        let emptied = delete_entry_from(&doc, &banana(), &layout, &opts).unwrap();
        assert_eq!(count_cards(&emptied), 0);
        assert!(emptied.contains("0 / 2000 kcal"));
        assert!(emptied.contains("0 / 150 g"));
        assert!(emptied.contains("0 / 250 g"));
        assert!(emptied.contains("0 / 65 g"));

        let err = delete_entry_from(&emptied, &banana(), &layout, &opts).unwrap_err();
        assert!(matches!(err, Error::StructuralMatch(_)));
    }

    fn food_log(dir: &Path) -> FoodLog {
        FoodLog::new(
            Arc::new(FsVault::new(dir)),
            SharedSettings::new(Settings::default()),
            DocumentLocks::default(),
        )
    }

    #[tokio::test]
    async fn test_food_log_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let log = food_log(dir.path());

        assert_eq!(log.add_entries(date(), &[banana()]).await.unwrap(), AddOutcome::Created);
        let path = dir.path().join("Nutrition/Food Log/2026-10-19.md");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(count_cards(&text), 1);
        assert!(text.contains("105 / 2000 kcal"));

        assert_eq!(log.add_entries(date(), &[oats()]).await.unwrap(), AddOutcome::Appended);
        assert_eq!(log.entries_for(date()).await.unwrap(), vec![banana(), oats()]);

        log.delete_entry(date(), &banana()).await.unwrap();
        log.delete_entry(date(), &oats()).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(count_cards(&text), 0);
        assert!(text.contains("0 / 2000 kcal"));
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_entries_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let log = food_log(dir.path());
        let mut bad = banana();
        bad.fat = f64::NAN;
        let err = log.add_entries(date(), &[bad]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!dir.path().join("Nutrition").exists());
    }

    #[tokio::test]
    async fn test_delete_from_missing_day_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = food_log(dir.path());
        let err = log.delete_entry(date(), &banana()).await.unwrap_err();
        assert!(matches!(err, Error::StructuralMatch(_)));
    }

    #[tokio::test]
    async fn test_concurrent_adds_to_same_day_keep_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(food_log(dir.path()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let entry = NutritionEntry::new(format!("Item {}", i), "1", 10.0, 1.0, 1.0, 1.0);
                log.add_entries(date(), &[entry]).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let entries = log.entries_for(date()).await.unwrap();
        assert_eq!(entries.len(), 8);
    }
}
