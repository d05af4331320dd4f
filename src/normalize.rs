//! Raw source records to `CompletionEvent`s.
//!
//! Each record shape has its own conversion. Time values are resolved
//! against the pass's reference time here, so nothing relative survives
//! into aggregation. Records without a completion time mean "nothing
//! pending" and are skipped; records that cannot be read are dropped
//! with a log line.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::OverviewError;
use crate::event::{Category, CompletionEvent, CourseRef, Roster};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::source::{CourseRow, RawBuilding, RawCourse, RawTime, RawUpgrade, StructuredCourse};

/// Everything the normalizer accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    Building(RawBuilding),
    Course(RawCourse),
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Date-like text to an instant.
///
/// Offsets are honoured; a naive date-time is local wall clock; a bare
/// date is UTC midnight.
pub fn parse_absolute(text: &str) -> Option<DateTime<Local>> {
    let s = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Local));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Local.from_local_datetime(&naive).earliest();
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight).with_timezone(&Local))
}

pub fn resolve_time(raw: &RawTime, reference_now: &DateTime<Local>) -> Option<DateTime<Local>> {
    match raw {
        RawTime::Absolute(text) => parse_absolute(text),
        RawTime::EpochSeconds(secs) => Local.timestamp_opt(*secs, 0).single(),
        RawTime::RemainingSeconds(secs) => {
            Duration::try_seconds(*secs).and_then(|d| reference_now.checked_add_signed(d))
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|v| !v.is_empty())
}

fn dropped(category: Category, context: &str, err: OverviewError) {
    log(
        Level::Debug,
        Domain::Normalize,
        "record_dropped",
        obj(&[
            ("category", v_str(category.as_str())),
            ("context", v_str(context)),
            ("reason", v_str(&err.to_string())),
        ]),
    );
}

fn upgrade_event(
    category: Category,
    building: &RawBuilding,
    item: &RawUpgrade,
    reference_now: &DateTime<Local>,
) -> Result<Option<CompletionEvent>, OverviewError> {
    let Some(raw_time) = &item.available_at else {
        return Ok(None);
    };
    let label = non_empty(item.caption.as_deref())
        .or_else(|| non_empty(item.upgrade_type.as_deref()))
        .ok_or_else(|| OverviewError::MalformedRecord("upgrade without caption or type".into()))?;
    let completes_at = resolve_time(raw_time, reference_now)
        .ok_or_else(|| OverviewError::MalformedRecord(format!("unreadable time {:?}", raw_time)))?;
    Ok(Some(CompletionEvent {
        category,
        label: label.to_string(),
        context: Some(building.caption.clone()),
        completes_at,
        source_ref: None,
    }))
}

/// Events of one building: its specialization, extensions and storage upgrades.
///
/// Absent and empty collections both contribute nothing.
pub fn normalize_building(building: &RawBuilding, reference_now: &DateTime<Local>) -> Vec<CompletionEvent> {
    let slots = building
        .specialization
        .iter()
        .map(|sp| (Category::Specialization, sp))
        .chain(building.extensions.iter().flatten().map(|e| (Category::BuildingExtension, e)))
        .chain(building.storage_upgrades.iter().flatten().map(|s| (Category::StorageUpgrade, s)));

    let mut out = Vec::new();
    for (category, item) in slots {
        match upgrade_event(category, building, item, reference_now) {
            Ok(Some(ev)) => out.push(ev),
            Ok(None) => {}
            Err(err) => dropped(category, &building.caption, err),
        }
    }
    out
}

fn structured_course_event(
    course: &StructuredCourse,
    reference_now: &DateTime<Local>,
) -> Result<Option<CompletionEvent>, OverviewError> {
    let Some(raw_time) = &course.finish else {
        return Ok(None);
    };
    let label = non_empty(course.caption.as_deref())
        .ok_or_else(|| OverviewError::MalformedRecord("course without name".into()))?;
    let completes_at = resolve_time(raw_time, reference_now)
        .ok_or_else(|| OverviewError::MalformedRecord(format!("unreadable time {:?}", raw_time)))?;
    Ok(Some(CompletionEvent {
        category: Category::Schooling,
        label: label.to_string(),
        context: None,
        completes_at,
        source_ref: Some(CourseRef {
            id: course.id.clone().unwrap_or_default(),
            detail_url: None,
            roster: Roster::Structured {
                participant_ids: course.participant_ids.clone(),
                instructor_id: course.instructor_id.clone(),
            },
        }),
    }))
}

fn row_course_event(row: &CourseRow, reference_now: &DateTime<Local>) -> Result<Option<CompletionEvent>, OverviewError> {
    let Some(raw_time) = &row.remaining else {
        return Ok(None);
    };
    let completes_at = resolve_time(raw_time, reference_now)
        .ok_or_else(|| OverviewError::MalformedRecord(format!("unreadable time {:?}", raw_time)))?;
    Ok(Some(CompletionEvent {
        category: Category::Schooling,
        label: row.name.clone(),
        context: None,
        completes_at,
        source_ref: Some(CourseRef {
            id: row.id.clone(),
            detail_url: Some(row.detail_url.clone()),
            roster: Roster::Document {
                instructor_text: row.instructor_text.clone(),
            },
        }),
    }))
}

pub fn normalize_course(course: &RawCourse, reference_now: &DateTime<Local>) -> Option<CompletionEvent> {
    let (converted, context) = match course {
        RawCourse::Structured(c) => (structured_course_event(c, reference_now), c.id.clone().unwrap_or_default()),
        RawCourse::Row(r) => (row_course_event(r, reference_now), r.id.clone()),
    };
    match converted {
        Ok(ev) => ev,
        Err(err) => {
            dropped(Category::Schooling, &context, err);
            None
        }
    }
}

/// All records to events, in discovery order.
pub fn normalize(records: &[SourceRecord], reference_now: &DateTime<Local>) -> Vec<CompletionEvent> {
    let mut out = Vec::new();
    for record in records {
        match record {
            SourceRecord::Building(b) => out.extend(normalize_building(b, reference_now)),
            SourceRecord::Course(c) => out.extend(normalize_course(c, reference_now)),
        }
    }
    out
}
