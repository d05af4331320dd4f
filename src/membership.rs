//! Whether a course concerns the viewer.
//!
//! Structured listings carry participant and instructor ids, which settle
//! the question directly. Document listings only name the instructor, so
//! the participant table on each course's detail page is fetched and
//! scanned. Those fetches go out in fixed-size batches; a failed fetch
//! drops that course and nothing else.

use futures_util::future::join_all;

use crate::error::OverviewError;
use crate::event::{CompletionEvent, CourseRef, Roster};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::source::{CourseDetailSource, Viewer};

/// Viewer's id in the participant list or equal to the instructor id.
pub fn structured_membership(participant_ids: &[String], instructor_id: Option<&str>, viewer_id: &str) -> bool {
    participant_ids.iter().any(|p| p == viewer_id) || instructor_id == Some(viewer_id)
}

/// Instructor column text contains the viewer's display name.
///
/// Plain substring test: case and accent sensitive, no word boundaries, so a
/// short name can match someone else's. An empty name never matches, with or
/// without `INSTRUCTOR_NAME_MATCH`: a substring test against "" would claim
/// every course, so such courses always go to the detail page instead.
pub fn instructor_text_matches(instructor_text: &str, viewer_name: &str) -> bool {
    !viewer_name.is_empty() && instructor_text.contains(viewer_name)
}

pub struct MembershipResolver<'a, D: CourseDetailSource + ?Sized> {
    details: &'a D,
    batch_size: usize,
    instructor_name_match: bool,
}

impl<'a, D: CourseDetailSource + ?Sized> MembershipResolver<'a, D> {
    pub fn new(details: &'a D, batch_size: usize, instructor_name_match: bool) -> Self {
        Self {
            details,
            batch_size: batch_size.max(1),
            instructor_name_match,
        }
    }

    /// Answer without any fetch, if the record allows it.
    fn decide_offline(&self, course: &CourseRef, viewer: &Viewer) -> Option<bool> {
        match &course.roster {
            Roster::Structured { participant_ids, instructor_id } => {
                Some(structured_membership(participant_ids, instructor_id.as_deref(), &viewer.id))
            }
            Roster::Document { instructor_text } => {
                if self.instructor_name_match && instructor_text_matches(instructor_text, &viewer.name) {
                    Some(true)
                } else if course.detail_url.is_none() {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    async fn detail_membership(&self, course: &CourseRef, viewer: &Viewer) -> Result<bool, OverviewError> {
        let reference = course.detail_url.as_deref().unwrap_or(&course.id);
        let doc = self
            .details
            .course_detail(reference)
            .await
            .map_err(|e| OverviewError::DetailFetch {
                reference: reference.to_string(),
                message: format!("{:#}", e),
            })?;
        Ok(doc.participant_ids().iter().any(|id| *id == viewer.id))
    }

    /// Single-course check; fetches the detail page when needed.
    pub async fn is_relevant_to_viewer(&self, course: &CourseRef, viewer: &Viewer) -> Result<bool, OverviewError> {
        match self.decide_offline(course, viewer) {
            Some(decision) => Ok(decision),
            None => self.detail_membership(course, viewer).await,
        }
    }

    /// Keep the schooling events that concern the viewer, order preserved.
    ///
    /// Events without a course reference are dropped.
    pub async fn retain_relevant(&self, events: Vec<CompletionEvent>, viewer: &Viewer) -> Vec<CompletionEvent> {
        let mut decisions: Vec<Option<bool>> = events
            .iter()
            .map(|ev| match &ev.source_ref {
                Some(course) => self.decide_offline(course, viewer),
                None => Some(false),
            })
            .collect();

        let pending: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_none())
            .map(|(i, _)| i)
            .collect();

        let events_ref = &events;
        for (batch_no, batch) in pending.chunks(self.batch_size).enumerate() {
            log(
                Level::Debug,
                Domain::Membership,
                "detail_batch",
                obj(&[("batch", v_num(batch_no as f64)), ("size", v_num(batch.len() as f64))]),
            );
            let results = join_all(batch.iter().map(|&i| async move {
                match &events_ref[i].source_ref {
                    Some(course) => self.detail_membership(course, viewer).await,
                    None => Ok(false),
                }
            }))
            .await;

            for (&i, result) in batch.iter().zip(results) {
                decisions[i] = Some(match result {
                    Ok(member) => member,
                    Err(err) => {
                        log(
                            Level::Warn,
                            Domain::Membership,
                            "detail_failed",
                            obj(&[("course", v_str(&events[i].label)), ("error", v_str(&err.to_string()))]),
                        );
                        false
                    }
                });
            }
        }

        events
            .into_iter()
            .zip(decisions)
            .filter_map(|(ev, d)| d.unwrap_or(false).then_some(ev))
            .collect()
    }
}
