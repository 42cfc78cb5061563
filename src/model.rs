use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

const CALORIE_EPSILON: f64 = 1e-6;

// One food item with its estimated macros
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEntry {
    pub food: String,
    pub quantity: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Capture time, unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Informational link to the meal template this entry came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_id: Option<String>,
}

impl NutritionEntry {
    pub fn new(
        food: impl Into<String>,
        quantity: impl Into<String>,
        calories: f64,
        protein: f64,
        carbs: f64,
        fat: f64,
    ) -> Self {
        Self {
            food: food.into(),
            quantity: quantity.into(),
            calories,
            protein,
            carbs,
            fat,
            emoji: None,
            timestamp: None,
            meal_id: None,
        }
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = Some(emoji.into());
        self
    }

    pub fn with_meal_id(mut self, meal_id: impl Into<String>) -> Self {
        self.meal_id = Some(meal_id.into());
        self
    }

    /// Structural identity: food, quantity and calories. Entries carry no id of their own,
    /// so two entries agreeing on these three fields are indistinguishable.
    pub fn same_item(&self, other: &NutritionEntry) -> bool {
        self.food == other.food
            && self.quantity == other.quantity
            && numbers_match(self.calories, other.calories)
    }

    /// Name of the first macro that is not a finite non-negative number, if any.
    pub fn invalid_macro(&self) -> Option<&'static str> {
        [
            ("calories", self.calories),
            ("protein", self.protein),
            ("carbs", self.carbs),
            ("fat", self.fat),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite() || *v < 0.0)
        .map(|(name, _)| name)
    }
}

/// Reject entries that cannot be persisted: no food name, or a macro that is missing,
/// negative or not a number.
pub fn validate_entries(entries: &[NutritionEntry]) -> Result<()> {
    if entries.is_empty() {
        return Err(Error::Validation("no food items given".to_string()));
    }
    for entry in entries {
        if entry.food.trim().is_empty() {
            return Err(Error::Validation("food name is required".to_string()));
        }
        if let Some(field) = entry.invalid_macro() {
            return Err(Error::Validation(format!(
                "'{}' has no valid value for {}",
                entry.food, field
            )));
        }
    }
    Ok(())
}

pub(crate) fn numbers_match(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() < CALORIE_EPSILON
}

/// Accepts numbers, numeric strings and null. Null and unparseable strings become NaN.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => n,
        Some(Raw::Text(s)) => crate::parser::parse_number(&s),
        None => f64::NAN,
    })
}

/// Sum of the four macros over a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct NutritionTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    /// Set when at least one summed value was not a number
    pub indeterminate: bool,
}

/// Daily targets the summary card measures progress against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroGoals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Default for MacroGoals {
    fn default() -> Self {
        Self {
            calories: 2000.0,
            protein: 150.0,
            carbs: 250.0,
            fat: 65.0,
        }
    }
}

// A reusable meal template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<NutritionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial update applied by `MealStore::update`.
#[derive(Debug, Clone, Default)]
pub struct MealUpdate {
    pub name: Option<String>,
    pub items: Option<Vec<NutritionEntry>>,
    pub description: Option<Option<String>>,
    pub images: Option<Vec<String>>,
}

/// Where a rendered call-to-action points back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardContext {
    FoodLog,
    Meal(String),
}

impl CardContext {
    pub fn tag(&self) -> &'static str {
        match self {
            CardContext::FoodLog => "foodlog",
            CardContext::Meal(_) => "meal",
        }
    }
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
