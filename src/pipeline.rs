use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::aggregate::aggregate;
use crate::cache::Aggregation;
use crate::config::Config;
use crate::error::OverviewError;
use crate::event::AggregationResult;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::membership::MembershipResolver;
use crate::normalize::{normalize, SourceRecord};
use crate::source::{CourseDetailSource, GameSource, Viewer};

/// Fetches every source and turns it into today's overview.
pub struct Pipeline<S> {
    source: S,
    batch_size: usize,
    instructor_name_match: bool,
}

impl<S: GameSource + CourseDetailSource> Pipeline<S> {
    pub fn new(source: S, cfg: &Config) -> Self {
        Self {
            source,
            batch_size: cfg.batch_size(),
            instructor_name_match: cfg.instructor_name_match,
        }
    }

    /// Viewer plus every raw record. Any failing source fails the pass.
    pub async fn collect(&self) -> Result<(Viewer, Vec<SourceRecord>), OverviewError> {
        let (viewer, buildings) = tokio::join!(self.source.viewer(), self.source.buildings());
        let viewer = viewer.map_err(|e| OverviewError::source_fetch("userinfo", e))?;
        let buildings = buildings.map_err(|e| OverviewError::source_fetch("buildings", e))?;
        let courses = self
            .source
            .courses()
            .await
            .map_err(|e| OverviewError::source_fetch("schoolings", e))?;

        log(
            Level::Info,
            Domain::Source,
            "collected",
            obj(&[
                ("viewer", v_str(&viewer.id)),
                ("buildings", v_num(buildings.len() as f64)),
                ("courses", v_num(courses.len() as f64)),
            ]),
        );

        let records = buildings
            .into_iter()
            .map(SourceRecord::Building)
            .chain(courses.into_iter().map(SourceRecord::Course))
            .collect();
        Ok((viewer, records))
    }
}

#[async_trait]
impl<S: GameSource + CourseDetailSource> Aggregation for Pipeline<S> {
    async fn run(&self, reference_now: DateTime<Local>) -> Result<AggregationResult, OverviewError> {
        let collected = self.collect().await;
        let (viewer, records) = match collected {
            Ok(v) => v,
            Err(err) => {
                log(Level::Error, Domain::Source, "pass_failed", obj(&[("error", v_str(&err.to_string()))]));
                return Err(err);
            }
        };
        let events = normalize(&records, &reference_now);
        let resolver = MembershipResolver::new(&self.source, self.batch_size, self.instructor_name_match);
        Ok(aggregate(events, &reference_now, &viewer, &resolver).await)
    }
}
