use chrono::{DateTime, Local};

use crate::event::{AggregationResult, Category, CompletionEvent};
use crate::logging::{log, obj, v_num, Domain, Level};
use crate::membership::MembershipResolver;
use crate::source::{CourseDetailSource, Viewer};
use crate::today::is_today;

/// Group events by category and sort each group by completion time.
///
/// The sort is stable, so equal times keep discovery order.
pub fn bucket(events: Vec<CompletionEvent>) -> AggregationResult {
    let mut result = AggregationResult::default();
    for ev in events {
        result.bucket_mut(ev.category).push(ev);
    }
    for category in Category::ALL {
        result.bucket_mut(category).sort_by_key(|e| e.completes_at);
    }
    result
}

/// Today's events for the viewer, grouped and ordered.
///
/// `reference_now` is the single clock reading for the whole pass. Only
/// schooling events go through the membership check.
pub async fn aggregate<D>(
    events: Vec<CompletionEvent>,
    reference_now: &DateTime<Local>,
    viewer: &Viewer,
    resolver: &MembershipResolver<'_, D>,
) -> AggregationResult
where
    D: CourseDetailSource + ?Sized,
{
    let total = events.len();
    let (schoolings, others): (Vec<_>, Vec<_>) = events
        .into_iter()
        .filter(|e| is_today(&e.completes_at, reference_now))
        .partition(|e| e.category == Category::Schooling);

    let candidates = schoolings.len();
    let relevant = resolver.retain_relevant(schoolings, viewer).await;

    // Categories never mix, so appending keeps per-category discovery order.
    let mut kept = others;
    kept.extend(relevant);
    let result = bucket(kept);

    log(
        Level::Info,
        Domain::Aggregate,
        "aggregated",
        obj(&[
            ("events_in", v_num(total as f64)),
            ("course_candidates", v_num(candidates as f64)),
            ("events_out", v_num(result.total() as f64)),
        ]),
    );
    result
}
