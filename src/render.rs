//! HTML card markup embedded in food log and meal notes.
//!
//! Every entry card carries its fields as `data-` attributes so it can be parsed back
//! (see `dialect`). The theme only changes presentation classes and inline styles.

use chrono::{Local, TimeZone};
use uuid::Uuid;

use crate::dialect::escape_attr;
use crate::model::{CardContext, MacroGoals, NutritionEntry, NutritionTotals};
use crate::settings::{EmojiSet, Theme};

/// Read-only inputs to rendering.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub theme: Theme,
    pub goals: MacroGoals,
    pub emojis: EmojiSet,
}

// Progress bands, highest first
const STATUS_BANDS: [(i64, &str); 8] = [
    (95, "🏆"),
    (90, "🎯"),
    (80, "💪"),
    (70, "🔥"),
    (60, "📈"),
    (50, "⚡"),
    (30, "🌱"),
    (10, "🥄"),
];
const LOWEST_STATUS: &str = "💤";

/// `round(current / goal * 100)`, or 0 when there is no goal.
pub fn calculate_percentage(current: f64, goal: f64) -> i64 {
    if goal == 0.0 || !goal.is_finite() {
        return 0;
    }
    (current / goal * 100.0).round() as i64
}

pub fn status_glyph(overall: i64) -> &'static str {
    STATUS_BANDS
        .iter()
        .find(|(threshold, _)| overall >= *threshold)
        .map(|(_, glyph)| *glyph)
        .unwrap_or(LOWEST_STATUS)
}

/// Unweighted mean of the four macro percentages.
pub fn overall_progress(totals: &NutritionTotals, goals: &MacroGoals) -> i64 {
    let sum = calculate_percentage(totals.calories, goals.calories)
        + calculate_percentage(totals.protein, goals.protein)
        + calculate_percentage(totals.carbs, goals.carbs)
        + calculate_percentage(totals.fat, goals.fat);
    (sum as f64 / 4.0).round() as i64
}

/// Number as shown to a reader: at most one decimal, no trailing `.0`.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return "?".to_string();
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{:.1}", rounded)
    }
}

fn new_block_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("nt-{}", &id[..12])
}

fn card_style(theme: Theme) -> &'static str {
    match theme {
        Theme::Light => "background: #ffffff; border: 1px solid #e5e7eb; color: #1f2937; border-radius: 10px; padding: 10px 14px; margin: 6px 0;",
        Theme::Dark => "background: #1f2937; border: 1px solid #374151; color: #f9fafb; border-radius: 10px; padding: 10px 14px; margin: 6px 0;",
    }
}

fn bar_colors(theme: Theme) -> (&'static str, &'static str) {
    match theme {
        Theme::Light => ("#e5e7eb", "#10b981"),
        Theme::Dark => ("#374151", "#34d399"),
    }
}

fn format_time(timestamp: i64) -> Option<String> {
    Local
        .timestamp_millis_opt(timestamp)
        .single()
        .map(|t| t.format("%H:%M").to_string())
}

/// One entry card in the current dialect.
pub fn render_entry(entry: &NutritionEntry, opts: &RenderOptions) -> String {
    let theme = opts.theme;
    let emoji = entry
        .emoji
        .as_deref()
        .unwrap_or(opts.emojis.food.as_str());

    let mut open = format!(
        r#"<div class="nt-food-card nt-theme-{}" data-nt-block="{}" data-food="{}" data-quantity="{}" data-calories="{}" data-protein="{}" data-carbs="{}" data-fat="{}""#,
        theme.as_str(),
        new_block_id(),
        escape_attr(&entry.food),
        escape_attr(&entry.quantity),
        entry.calories,
        entry.protein,
        entry.carbs,
        entry.fat,
    );
    if let Some(ref e) = entry.emoji {
        open.push_str(&format!(r#" data-emoji="{}""#, escape_attr(e)));
    }
    if let Some(ts) = entry.timestamp {
        open.push_str(&format!(r#" data-timestamp="{}""#, ts));
    }
    if let Some(ref meal_id) = entry.meal_id {
        open.push_str(&format!(r#" data-meal-id="{}""#, escape_attr(meal_id)));
    }
    open.push_str(&format!(r#" style="{}">"#, card_style(theme)));

    let time = entry
        .timestamp
        .and_then(format_time)
        .map(|t| format!(r#" <span class="nt-food-time">{}</span>"#, t))
        .unwrap_or_default();

    let header = format!(
        r#"<div class="nt-food-header"><span class="nt-food-emoji">{}</span> <strong class="nt-food-name">{}</strong> <span class="nt-food-quantity">{}</span>{}</div>"#,
        escape_attr(emoji),
        escape_attr(&entry.food),
        escape_attr(&entry.quantity),
        time,
    );

    let macros = format!(
        r#"<div class="nt-food-macros"><span class="nt-macro nt-macro-calories">{} {} kcal</span> <span class="nt-macro nt-macro-protein">{} {}g protein</span> <span class="nt-macro nt-macro-carbs">{} {}g carbs</span> <span class="nt-macro nt-macro-fat">{} {}g fat</span></div>"#,
        opts.emojis.calories,
        format_amount(entry.calories),
        opts.emojis.protein,
        format_amount(entry.protein),
        opts.emojis.carbs,
        format_amount(entry.carbs),
        opts.emojis.fat,
        format_amount(entry.fat),
    );

    format!(
        "{}\n{}\n{}\n<div class=\"nt-food-actions\"><button class=\"nt-delete-btn\" aria-label=\"Remove entry\">✕</button></div>\n</div>",
        open, header, macros
    )
}

/// Cards for `entries`, separated by blank lines, followed by a call-to-action when a
/// context is given.
pub fn render_entries(
    entries: &[NutritionEntry],
    context: Option<&CardContext>,
    opts: &RenderOptions,
) -> String {
    let mut blocks: Vec<String> = entries.iter().map(|e| render_entry(e, opts)).collect();
    if let Some(ctx) = context {
        blocks.push(render_call_to_action(ctx, opts));
    }
    blocks.join("\n\n")
}

pub fn render_call_to_action(context: &CardContext, opts: &RenderOptions) -> String {
    let (meal_attr, label) = match context {
        CardContext::FoodLog => (String::new(), "➕ Log food"),
        CardContext::Meal(id) => (
            format!(r#" data-nt-meal="{}""#, escape_attr(id)),
            "➕ Add food to this meal",
        ),
    };
    format!(
        "<div class=\"nt-cta nt-theme-{}\" data-nt-context=\"{}\"{}>\n<button class=\"nt-cta-button\" data-nt-action=\"add\">{}</button>\n</div>",
        opts.theme.as_str(),
        context.tag(),
        meal_attr,
        label,
    )
}

fn summary_row(
    key: &str,
    label: &str,
    emoji: &str,
    current: f64,
    goal: f64,
    unit: &str,
    theme: Theme,
) -> String {
    let percent = calculate_percentage(current, goal);
    let width = percent.clamp(0, 100);
    let (track, fill) = bar_colors(theme);
    format!(
        r#"<div class="nt-summary-row" data-macro="{key}"><span class="nt-summary-label">{emoji} {label}</span> <span class="nt-summary-value">{} / {} {unit}</span> <span class="nt-summary-percent">{percent}%</span><div class="nt-progress" style="background: {track}; height: 6px; border-radius: 3px;"><div class="nt-progress-fill" style="width: {width}%; background: {fill}; height: 6px; border-radius: 3px;"></div></div></div>"#,
        format_amount(current),
        format_amount(goal),
    )
}

/// Summary card: each macro against its goal, plus an overall status glyph.
pub fn render_summary(totals: &NutritionTotals, opts: &RenderOptions) -> String {
    let goals = &opts.goals;
    let emojis = &opts.emojis;
    let theme = opts.theme;
    let overall = overall_progress(totals, goals);

    let mut lines = vec![
        format!(
            r#"<div class="nt-summary-card nt-theme-{}" data-overall="{}" style="{}">"#,
            theme.as_str(),
            overall,
            card_style(theme)
        ),
        format!(
            r#"<div class="nt-summary-header"><span class="nt-summary-status">{}</span> <strong>Overall progress: {}%</strong></div>"#,
            status_glyph(overall),
            overall
        ),
        summary_row("calories", "Calories", &emojis.calories, totals.calories, goals.calories, "kcal", theme),
        summary_row("protein", "Protein", &emojis.protein, totals.protein, goals.protein, "g", theme),
        summary_row("carbs", "Carbs", &emojis.carbs, totals.carbs, goals.carbs, "g", theme),
        summary_row("fat", "Fat", &emojis.fat, totals.fat, goals.fat, "g", theme),
    ];
    if totals.indeterminate {
        lines.push(
            r#"<div class="nt-summary-note">Some entries have values that could not be read; they count as 0.</div>"#
                .to_string(),
        );
    }
    lines.push("</div>".to_string());
    lines.join("\n")
}
