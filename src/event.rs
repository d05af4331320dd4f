use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BuildingExtension,
    StorageUpgrade,
    Specialization,
    Schooling,
}

impl Category {
    /// Presentation order.
    pub const ALL: [Category; 4] = [
        Category::BuildingExtension,
        Category::StorageUpgrade,
        Category::Specialization,
        Category::Schooling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BuildingExtension => "extensions",
            Category::StorageUpgrade => "storage_upgrades",
            Category::Specialization => "specialization",
            Category::Schooling => "schoolings",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::BuildingExtension => "Gebäude-Erweiterungen",
            Category::StorageUpgrade => "Lagerräume",
            Category::Specialization => "Spezialisierungen",
            Category::Schooling => "Lehrgänge",
        }
    }

    /// Text shown when nothing in the category completes today.
    pub fn empty_text(&self) -> &'static str {
        match self {
            Category::BuildingExtension => "Heute werden keine Gebäude-Erweiterungen fertig.",
            Category::StorageUpgrade => "Heute werden keine Lagerräume fertig.",
            Category::Specialization => "Heute werden keine Spezialisierungen fertig.",
            Category::Schooling => "Heute enden keine Lehrgänge.",
        }
    }
}

/// How a course exposes who takes part in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Roster {
    /// Ids delivered inline with the listing.
    Structured {
        participant_ids: Vec<String>,
        instructor_id: Option<String>,
    },
    /// Only the instructor column text is known; participants live on the detail page.
    Document { instructor_text: String },
}

/// Back-reference from a schooling event to the course it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: String,
    pub detail_url: Option<String>,
    pub roster: Roster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub category: Category,
    pub label: String,
    /// Owning building caption, `None` for schoolings.
    pub context: Option<String>,
    pub completes_at: DateTime<Local>,
    pub source_ref: Option<CourseRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub category: Category,
    pub events: Vec<CompletionEvent>,
}

/// Today's events per category, each bucket ascending by completion time.
///
/// Every category is always present, empty buckets included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationResult {
    buckets: Vec<Bucket>,
}

impl Default for AggregationResult {
    fn default() -> Self {
        Self {
            buckets: Category::ALL
                .iter()
                .map(|&category| Bucket { category, events: Vec::new() })
                .collect(),
        }
    }
}

impl AggregationResult {
    pub fn get(&self, category: Category) -> &[CompletionEvent] {
        self.buckets
            .iter()
            .find(|b| b.category == category)
            .map(|b| b.events.as_slice())
            .unwrap_or(&[])
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub(crate) fn bucket_mut(&mut self, category: Category) -> &mut Vec<CompletionEvent> {
        let idx = match self.buckets.iter().position(|b| b.category == category) {
            Some(idx) => idx,
            None => {
                self.buckets.push(Bucket { category, events: Vec::new() });
                self.buckets.len() - 1
            }
        };
        &mut self.buckets[idx].events
    }
}
