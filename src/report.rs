use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::fmt::Write;

use crate::event::{AggregationResult, Category, CompletionEvent};

fn icon(category: Category) -> &'static str {
    match category {
        Category::BuildingExtension => "🏢",
        Category::StorageUpgrade => "📦",
        Category::Specialization => "🔧",
        Category::Schooling => "🎓",
    }
}

/// `dd.mm.yyyy, HH:MM`
pub fn format_time(dt: &DateTime<Local>) -> String {
    dt.format("%d.%m.%Y, %H:%M").to_string()
}

fn render_event(out: &mut String, ev: &CompletionEvent) {
    let _ = match &ev.context {
        Some(building) => writeln!(
            out,
            "  - {}: {}\n    Fertig am {}",
            building,
            ev.label,
            format_time(&ev.completes_at)
        ),
        None => writeln!(out, "  - {}\n    Endet am {}", ev.label, format_time(&ev.completes_at)),
    };
}

/// Plain-text overview, one section per category.
pub fn render_text(result: &AggregationResult, today: &DateTime<Local>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📅 Heutige Fertigstellungen ({})", today.format("%d.%m.%Y"));
    for bucket in result.buckets() {
        let _ = writeln!(out, "\n{} {}", icon(bucket.category), bucket.category.title());
        if bucket.events.is_empty() {
            let _ = writeln!(out, "  {}", bucket.category.empty_text());
        }
        for ev in &bucket.events {
            render_event(&mut out, ev);
        }
    }
    out
}

/// Category key to event list, for machine consumers.
pub fn render_json(result: &AggregationResult) -> Value {
    let mut sections = serde_json::Map::new();
    for bucket in result.buckets() {
        let items: Vec<Value> = bucket
            .events
            .iter()
            .map(|ev| {
                json!({
                    "label": ev.label,
                    "building": ev.context,
                    "completes_at": ev.completes_at.to_rfc3339(),
                })
            })
            .collect();
        sections.insert(bucket.category.as_str().to_string(), Value::Array(items));
    }
    Value::Object(sections)
}
