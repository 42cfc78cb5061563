//! Reading entries and meal metadata back out of note text.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::dialect::{unescape_attr, FragmentDialect};
use crate::model::{NutritionEntry, NutritionTotals};

pub const DESCRIPTION_HEADING: &str = "## 📝 Description";

static MEAL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data-nt-meal\s*=\s*"([^"]+)""#).expect("meal id regex"));

/// A meal note as read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MealMetadata {
    pub id: String,
    pub description: Option<String>,
    pub entries: Vec<NutritionEntry>,
}

/// Parse a decimal number; anything unreadable becomes NaN.
pub fn parse_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Entries found in `text`, from the first dialect (in priority order) that matches at all.
pub fn extract_entries(text: &str) -> Vec<NutritionEntry> {
    for dialect in FragmentDialect::PRIORITY {
        let found = dialect.scan(text);
        if !found.is_empty() {
            debug!(dialect = dialect.as_str(), count = found.len(), "extracted entries");
            return found.iter().map(|m| m.entry()).collect();
        }
    }
    Vec::new()
}

/// Identifier, description and items of a meal note, or `None` if `text` is not one.
pub fn extract_meal_metadata(text: &str) -> Option<MealMetadata> {
    let id = MEAL_ID
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| unescape_attr(m.as_str()))?;

    Some(MealMetadata {
        id,
        description: extract_description(text),
        entries: extract_entries(text),
    })
}

/// Text after the description heading up to the first blank line.
pub fn extract_description(text: &str) -> Option<String> {
    let start = text.find(DESCRIPTION_HEADING)?;
    let after = &text[start + DESCRIPTION_HEADING.len()..];
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => return None,
    };
    let end = body.find("\n\n").unwrap_or(body.len());
    let description = body[..end].trim();
    if description.is_empty() {
        None
    } else {
        Some(description.to_string())
    }
}

/// Per-macro sums. A value that is not a number adds nothing to its own macro and marks
/// the totals as indeterminate.
pub fn compute_totals(entries: &[NutritionEntry]) -> NutritionTotals {
    fn add(sum: &mut f64, value: f64, indeterminate: &mut bool) {
        if value.is_finite() {
            *sum += value;
        } else {
            *indeterminate = true;
        }
    }

    let mut totals = NutritionTotals::default();
    let mut indeterminate = false;
    for entry in entries {
        add(&mut totals.calories, entry.calories, &mut indeterminate);
        add(&mut totals.protein, entry.protein, &mut indeterminate);
        add(&mut totals.carbs, entry.carbs, &mut indeterminate);
        add(&mut totals.fat, entry.fat, &mut indeterminate);
    }
    totals.indeterminate = indeterminate;
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CardContext;
    use crate::render::{render_call_to_action, render_entries, RenderOptions};

    fn sample() -> Vec<NutritionEntry> {
        vec![
            NutritionEntry::new("Banana", "1 medium", 105.0, 1.3, 27.0, 0.4),
            NutritionEntry::new(r#"Greek "plain" yogurt"#, "170g", 100.0, 17.0, 6.0, 0.7)
                .with_emoji("🥛")
                .with_meal_id("meal-1"),
            NutritionEntry::new("Almonds & salt", "28 g", 164.0, 6.0, 6.1, 14.2),
        ]
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 27 "), 27.0);
        assert_eq!(parse_number("0.4"), 0.4);
        assert!(parse_number("abc").is_nan());
        assert!(parse_number("").is_nan());
    }

    #[test]
    fn test_render_then_extract_roundtrip() {
        let entries = sample();
        let doc = format!(
            "# Log\n\n{}\n",
            render_entries(&entries, None, &RenderOptions::default())
        );
        assert_eq!(extract_entries(&doc), entries);
    }

    #[test]
    fn test_current_dialect_wins_over_others() {
        let doc = format!(
            "{}\n\n<div class=\"simple-food-item\" data-simple-food=\"Egg\" data-simple-quantity=\"1\" data-simple-calories=\"70\" data-simple-protein=\"6\" data-simple-carbs=\"0\" data-simple-fat=\"5\"></div>",
            render_entries(&sample()[..1], None, &RenderOptions::default())
        );
        let extracted = extract_entries(&doc);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].food, "Banana");
    }

    #[test]
    fn test_falls_through_to_simple_dialect() {
        let doc = "<div class=\"simple-food-item\" data-simple-food=\"Egg\" data-simple-quantity=\"1 large\" data-simple-calories=\"70\" data-simple-protein=\"6\" data-simple-carbs=\"0.6\" data-simple-fat=\"5\"></div>";
        let extracted = extract_entries(doc);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].quantity, "1 large");
        assert_eq!(extracted[0].carbs, 0.6);
    }

    #[test]
    fn test_malformed_number_extracts_as_nan() {
        let doc = r#"<div class="nt-food-card" data-food="Soup" data-quantity="1 bowl" data-calories="lots" data-protein="5" data-carbs="10" data-fat="2"></div>"#;
        let extracted = extract_entries(doc);
        assert!(extracted[0].calories.is_nan());
        assert_eq!(extracted[0].protein, 5.0);
    }

    #[test]
    fn test_compute_totals_sums_each_macro() {
        let entries = sample();
        let totals = compute_totals(&entries);
        assert!((totals.calories - 369.0).abs() < 1e-9);
        assert!((totals.protein - 24.3).abs() < 1e-9);
        assert!((totals.carbs - 39.1).abs() < 1e-9);
        assert!((totals.fat - 15.3).abs() < 1e-9);
        assert!(!totals.indeterminate);
    }

    #[test]
    fn test_compute_totals_treats_nan_as_zero() {
        let mut entries = sample();
        entries[0].calories = f64::NAN;
        let totals = compute_totals(&entries);
        assert!((totals.calories - 264.0).abs() < 1e-9);
        assert!(totals.indeterminate);
        assert_eq!(compute_totals(&[]), NutritionTotals::default());
    }

    #[test]
    fn test_extract_meal_metadata() {
        let opts = RenderOptions::default();
        let doc = format!(
            "# 🍱 Breakfast\n\n{}\nOats with fruit\nand honey\n\n## 🥗 Items\n\n{}\n\n{}\n",
            DESCRIPTION_HEADING,
            render_entries(&sample(), None, &opts),
            render_call_to_action(&CardContext::Meal("abc-123".into()), &opts)
        );
        let meta = extract_meal_metadata(&doc).unwrap();
        assert_eq!(meta.id, "abc-123");
        assert_eq!(meta.description.as_deref(), Some("Oats with fruit\nand honey"));
        assert_eq!(meta.entries.len(), 3);
    }

    #[test]
    fn test_log_entries_with_meal_reference_are_not_meal_notes() {
        let doc = render_entries(&sample(), Some(&CardContext::FoodLog), &RenderOptions::default());
        assert!(doc.contains("data-meal-id"));
        assert!(extract_meal_metadata(&doc).is_none());
    }
}
