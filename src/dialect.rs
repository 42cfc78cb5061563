//! Grammars for the entry-card markup found in notes.
//!
//! Cards have been written in three attribute schemes over time. Each scheme is a
//! `FragmentDialect`; both the locator and the parser walk `FragmentDialect::PRIORITY`
//! in order and stop at the first dialect that produces matches.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;

use crate::model::NutritionEntry;
use crate::parser::parse_number;

static OPEN_DIV: Lazy<Regex> = Lazy::new(|| Regex::new(r"<div\b[^>]*>").expect("open div regex"));

static DIV_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<div\b[^>]*>|</div\s*>").expect("div token regex"));

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#).expect("attribute regex")
});

static LEGACY_PROTEIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"P:\s*([0-9]+(?:\.[0-9]+)?)").expect("legacy protein regex"));
static LEGACY_CARBS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"C:\s*([0-9]+(?:\.[0-9]+)?)").expect("legacy carbs regex"));
static LEGACY_FAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"F:\s*([0-9]+(?:\.[0-9]+)?)").expect("legacy fat regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentDialect {
    /// `nt-food-card` with `data-food`, `data-quantity` and all four macro attributes
    Current,
    /// `food-item` with `data-food-name`, `data-quantity`, `data-calories`; other macros as text
    Legacy,
    /// `simple-food-item` with every field under a `data-simple-` prefix
    Simple,
}

/// Attribute names a dialect stores its fields under.
struct FieldNames {
    class: &'static str,
    food: &'static str,
    quantity: &'static str,
    calories: &'static str,
    protein: Option<&'static str>,
    carbs: Option<&'static str>,
    fat: Option<&'static str>,
}

impl FragmentDialect {
    pub const PRIORITY: [FragmentDialect; 3] = [
        FragmentDialect::Current,
        FragmentDialect::Legacy,
        FragmentDialect::Simple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentDialect::Current => "current",
            FragmentDialect::Legacy => "legacy",
            FragmentDialect::Simple => "simple",
        }
    }

    fn names(&self) -> FieldNames {
        match self {
            FragmentDialect::Current => FieldNames {
                class: "nt-food-card",
                food: "data-food",
                quantity: "data-quantity",
                calories: "data-calories",
                protein: Some("data-protein"),
                carbs: Some("data-carbs"),
                fat: Some("data-fat"),
            },
            FragmentDialect::Legacy => FieldNames {
                class: "food-item",
                food: "data-food-name",
                quantity: "data-quantity",
                calories: "data-calories",
                protein: None,
                carbs: None,
                fat: None,
            },
            FragmentDialect::Simple => FieldNames {
                class: "simple-food-item",
                food: "data-simple-food",
                quantity: "data-simple-quantity",
                calories: "data-simple-calories",
                protein: Some("data-simple-protein"),
                carbs: Some("data-simple-carbs"),
                fat: Some("data-simple-fat"),
            },
        }
    }

    /// Whether protein, carbs and fat are carried as attributes (and so usable as tie-breakers).
    pub fn has_macro_attributes(&self) -> bool {
        self.names().protein.is_some()
    }

    /// Find every card of this dialect in `text`, in document order.
    pub fn scan<'a>(&self, text: &'a str) -> Vec<FragmentMatch<'a>> {
        let names = self.names();
        let mut found = Vec::new();

        for open in OPEN_DIV.find_iter(text) {
            let attrs = parse_attributes(open.as_str());
            if !has_class(&attrs, names.class) || !attrs.contains_key(names.food) {
                continue;
            }
            let end = find_block_end(text, open.start());
            let inner_end = end
                .map(|e| e - closing_len(&text[..e]))
                .unwrap_or(text.len());
            found.push(FragmentMatch {
                dialect: *self,
                start: open.start(),
                end,
                attrs,
                inner: &text[open.end()..inner_end.max(open.end())],
            });
        }

        found
    }
}

/// One card as it appears in a document.
#[derive(Debug, Clone)]
pub struct FragmentMatch<'a> {
    pub dialect: FragmentDialect,
    /// Offset of the opening `<div`
    pub start: usize,
    /// Offset just past the balancing `</div>`, if the card is closed
    pub end: Option<usize>,
    /// Attribute values exactly as written (still entity-escaped)
    pub attrs: HashMap<String, String>,
    pub inner: &'a str,
}

impl<'a> FragmentMatch<'a> {
    pub fn range(&self) -> Option<Range<usize>> {
        self.end.map(|end| self.start..end)
    }

    pub fn raw_food(&self) -> &str {
        self.raw(self.dialect.names().food).unwrap_or("")
    }

    pub fn raw_quantity(&self) -> &str {
        self.raw(self.dialect.names().quantity).unwrap_or("")
    }

    pub fn calories(&self) -> f64 {
        self.number(Some(self.dialect.names().calories))
    }

    /// Protein, carbs and fat when the dialect carries them as attributes.
    pub fn macro_attributes(&self) -> Option<(f64, f64, f64)> {
        let names = self.dialect.names();
        if !self.dialect.has_macro_attributes() {
            return None;
        }
        Some((
            self.number(names.protein),
            self.number(names.carbs),
            self.number(names.fat),
        ))
    }

    fn raw(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn number(&self, name: Option<&str>) -> f64 {
        match name.and_then(|n| self.raw(n)) {
            Some(v) => parse_number(&unescape_attr(v)),
            None => f64::NAN,
        }
    }

    /// Decode the card back into an entry.
    pub fn entry(&self) -> NutritionEntry {
        let (protein, carbs, fat) = match self.macro_attributes() {
            Some(macros) => macros,
            None => (
                legacy_macro(&LEGACY_PROTEIN, self.inner),
                legacy_macro(&LEGACY_CARBS, self.inner),
                legacy_macro(&LEGACY_FAT, self.inner),
            ),
        };

        let mut entry = NutritionEntry::new(
            unescape_attr(self.raw_food()),
            unescape_attr(self.raw_quantity()),
            self.calories(),
            protein,
            carbs,
            fat,
        );

        if self.dialect == FragmentDialect::Current {
            entry.emoji = self.raw("data-emoji").map(unescape_attr).filter(|e| !e.is_empty());
            entry.timestamp = self.raw("data-timestamp").and_then(|t| t.trim().parse().ok());
            entry.meal_id = self.raw("data-meal-id").map(unescape_attr).filter(|m| !m.is_empty());
        }

        entry
    }
}

// Legacy cards only print macros that were known, so a missing label reads as zero.
fn legacy_macro(pattern: &Regex, inner: &str) -> f64 {
    pattern
        .captures(inner)
        .and_then(|c| c.get(1))
        .map(|m| parse_number(m.as_str()))
        .unwrap_or(0.0)
}

/// Parse `name="value"` pairs out of a single opening tag. Values are returned as written.
pub fn parse_attributes(tag: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(tag)
        .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
        .collect()
}

pub fn has_class(attrs: &HashMap<String, String>, class: &str) -> bool {
    attrs
        .get("class")
        .map_or(false, |v| v.split_whitespace().any(|c| c == class))
}

/// Offset just past the `</div>` that balances the `<div` opening at `open_start`.
///
/// Every nested `<div` deepens the count and every `</div>` lowers it; the block ends
/// at the first return to depth zero. Returns `None` for an unclosed block.
pub fn find_block_end(text: &str, open_start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for tag in DIV_TOKEN.find_iter(&text[open_start..]) {
        if tag.as_str().starts_with("</") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(open_start + tag.end());
            }
        } else {
            depth += 1;
        }
    }
    None
}

fn closing_len(up_to_close: &str) -> usize {
    up_to_close.len() - up_to_close.rfind("</").unwrap_or(up_to_close.len())
}

/// All `<div>` blocks carrying `class` in `text`, as balanced byte ranges.
pub fn block_ranges(text: &str, class: &str) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for open in OPEN_DIV.find_iter(text) {
        if ranges.last().map_or(false, |r| open.start() < r.end) {
            continue;
        }
        let attrs = parse_attributes(open.as_str());
        if !has_class(&attrs, class) {
            continue;
        }
        if let Some(end) = find_block_end(text, open.start()) {
            ranges.push(open.start()..end);
        }
    }
    ranges
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
