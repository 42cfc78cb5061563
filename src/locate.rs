//! Finding the byte range of a specific entry card inside a note.
//!
//! Cards have no stable id, so a card is identified by its decoded food, quantity and
//! calories. Protein, carbs and fat break ties where the dialect has them.

use std::ops::Range;

use crate::dialect::{unescape_attr, FragmentDialect, FragmentMatch};
use crate::model::{numbers_match, NutritionEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// First card agreeing on food, quantity and calories; macro agreement only breaks ties
    Replace,
    /// Macros must agree as well wherever the dialect carries them
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub dialect: FragmentDialect,
    pub range: Range<usize>,
}

fn identity_matches(found: &FragmentMatch<'_>, target: &NutritionEntry) -> bool {
    unescape_attr(found.raw_food()) == target.food
        && unescape_attr(found.raw_quantity()) == target.quantity
        && numbers_match(found.calories(), target.calories)
}

fn macros_match(found: &FragmentMatch<'_>, target: &NutritionEntry) -> bool {
    match found.macro_attributes() {
        Some((protein, carbs, fat)) => {
            numbers_match(protein, target.protein)
                && numbers_match(carbs, target.carbs)
                && numbers_match(fat, target.fat)
        }
        None => true,
    }
}

/// Locate the card for `target`. Dialects are tried in priority order; a dialect with no
/// acceptable candidate falls through to the next.
pub fn locate(text: &str, target: &NutritionEntry, mode: MatchMode) -> Option<Located> {
    for dialect in FragmentDialect::PRIORITY {
        let candidates: Vec<FragmentMatch<'_>> = dialect
            .scan(text)
            .into_iter()
            .filter(|m| m.end.is_some() && identity_matches(m, target))
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let exact = candidates.iter().find(|m| macros_match(m, target));
        let chosen = match mode {
            MatchMode::Delete => exact,
            MatchMode::Replace => exact.or_else(|| candidates.first()),
        };

        if let Some(range) = chosen.and_then(|m| m.range()) {
            return Some(Located { dialect, range });
        }
    }
    None
}

/// Replace `range` of `text` with `replacement`.
pub fn splice(text: &str, range: Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..range.start]);
    out.push_str(replacement);
    out.push_str(&text[range.end..]);
    out
}

/// Remove `range` of `text` together with the blank-line separator that followed it.
pub fn excise(text: &str, range: Range<usize>) -> String {
    let before = &text[..range.start];
    let after = text[range.end..].trim_start_matches(|c| c == '\n' || c == '\r');
    let mut out = String::with_capacity(text.len());
    out.push_str(before);
    if after.is_empty() {
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out.push('\n');
    } else {
        out.push_str(after);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract_entries;
    use crate::render::{render_entries, RenderOptions};

    fn entries() -> Vec<NutritionEntry> {
        vec![
            NutritionEntry::new("Banana", "1 medium", 105.0, 1.3, 27.0, 0.4),
            NutritionEntry::new("Banana", "2 medium", 210.0, 2.6, 54.0, 0.8),
            NutritionEntry::new("Coffee \"black\"", "1 cup", 2.0, 0.3, 0.0, 0.0),
            NutritionEntry::new("Toast", "1 slice", 80.0, 3.0, 15.0, 1.0),
        ]
    }

    fn doc() -> String {
        format!(
            "# Food Log\n\n## 🥗 Food Items\n\n{}\n\n## 📊 Daily Summary\n",
            render_entries(&entries(), None, &RenderOptions::default())
        )
    }

    #[test]
    fn test_excising_each_entry_leaves_the_rest_intact() {
        let text = doc();
        let all = entries();
        for (i, target) in all.iter().enumerate() {
            let located = locate(&text, target, MatchMode::Delete).expect("entry should be found");
            assert_eq!(located.dialect, FragmentDialect::Current);
            let remaining = extract_entries(&excise(&text, located.range));
            let mut expected = all.clone();
            expected.remove(i);
            assert_eq!(remaining, expected);
        }
    }

    #[test]
    fn test_located_range_is_the_whole_card() {
        let text = doc();
        let located = locate(&text, &entries()[2], MatchMode::Replace).unwrap();
        let card = &text[located.range];
        assert!(card.starts_with("<div class=\"nt-food-card"));
        assert!(card.ends_with("</div>"));
        assert_eq!(card.matches("<div").count(), card.matches("</div>").count());
    }

    #[test]
    fn test_delete_requires_macro_agreement() {
        let text = doc();
        let mut target = entries()[0].clone();
        target.protein = 99.0;
        assert!(locate(&text, &target, MatchMode::Delete).is_none());
        assert!(locate(&text, &target, MatchMode::Replace).is_some());
    }

    #[test]
    fn test_not_found() {
        let target = NutritionEntry::new("Pizza", "1 slice", 285.0, 12.0, 36.0, 10.0);
        assert!(locate(&doc(), &target, MatchMode::Replace).is_none());
        assert!(locate("", &target, MatchMode::Delete).is_none());
    }

    #[test]
    fn test_locates_legacy_card() {
        let text = "Intro\n\n<div class=\"food-item\" data-food-name=\"Apple\" data-quantity=\"1\" data-calories=\"95\"><div class=\"food-name\">Apple</div><span>P: 0.5g · C: 25g · F: 0.3g</span></div>\n\nAfter\n";
        let target = NutritionEntry::new("Apple", "1", 95.0, 0.0, 0.0, 0.0);
        let located = locate(text, &target, MatchMode::Delete).unwrap();
        assert_eq!(located.dialect, FragmentDialect::Legacy);
        assert_eq!(excise(text, located.range), "Intro\n\nAfter\n");
    }

    #[test]
    fn test_locates_card_with_numeric_entities() {
        let text = "<div class=\"nt-food-card\" data-food=\"Mom&#39;s chili\" data-quantity=\"1 bowl\" data-calories=\"420\" data-protein=\"25\" data-carbs=\"30\" data-fat=\"18\"><div>Mom&#39;s chili</div></div>\n\nAfter\n";
        let extracted = extract_entries(text);
        assert_eq!(extracted[0].food, "Mom's chili");

        let located = locate(text, &extracted[0], MatchMode::Delete).unwrap();
        assert_eq!(excise(text, located.range), "After\n");
        assert!(locate(text, &extracted[0], MatchMode::Replace).is_some());
    }

    #[test]
    fn test_unclosed_card_is_not_located() {
        let text = r#"<div class="nt-food-card" data-food="Tea" data-quantity="1 cup" data-calories="2" data-protein="0" data-carbs="0" data-fat="0"><div>"#;
        let target = NutritionEntry::new("Tea", "1 cup", 2.0, 0.0, 0.0, 0.0);
        assert!(locate(text, &target, MatchMode::Replace).is_none());
    }

    #[test]
    fn test_splice() {
        assert_eq!(splice("abcdef", 2..4, "XY"), "abXYef");
    }
}
