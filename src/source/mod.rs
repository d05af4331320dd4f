//! Remote collaborators and the raw record shapes they deliver.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use url::Url;

use crate::error::OverviewError;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub mod document;
pub mod http;

pub use http::HttpSource;

/// Completion time as a source encodes it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireTime")]
pub enum RawTime {
    /// Date-like text, e.g. `2024-05-10T14:30:00+02:00`.
    Absolute(String),
    /// Unix epoch seconds.
    EpochSeconds(i64),
    /// Seconds left, relative to the pass's reference time.
    RemainingSeconds(i64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTime {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<WireTime> for RawTime {
    fn from(w: WireTime) -> Self {
        match w {
            WireTime::Int(v) => RawTime::EpochSeconds(v),
            WireTime::Float(v) => RawTime::EpochSeconds(v as i64),
            WireTime::Text(s) => RawTime::Absolute(s),
        }
    }
}

/// Accepts a JSON string or number and keeps it as text.
pub(crate) fn lenient_string<'de, D>(de: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_string_list<'de, D>(de: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Vec<serde_json::Value>>::deserialize(de)?;
    Ok(v.unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// Decode every element on its own. Elements that do not fit `T` are
/// malformed records: logged and dropped, the rest survive.
pub fn decode_each<T: DeserializeOwned>(items: Vec<Value>, kind: &str) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(record) => out.push(record),
            Err(err) => log(
                Level::Debug,
                Domain::Normalize,
                "record_dropped",
                obj(&[
                    ("kind", v_str(kind)),
                    ("index", v_num(index as f64)),
                    ("reason", v_str(&OverviewError::MalformedRecord(err.to_string()).to_string())),
                ]),
            ),
        }
    }
    out
}

fn lenient_upgrade<'de, D>(de: D) -> std::result::Result<Option<RawUpgrade>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(v.and_then(|item| decode_each(vec![item], "specialization").pop()))
}

fn lenient_upgrade_list<'de, D>(de: D) -> std::result::Result<Option<Vec<RawUpgrade>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Vec<Value>>::deserialize(de)?;
    Ok(v.map(|items| decode_each(items, "upgrade")))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawUpgrade {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub upgrade_type: Option<String>,
    #[serde(default)]
    pub available_at: Option<RawTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawBuilding {
    #[serde(default)]
    pub caption: String,
    #[serde(default, deserialize_with = "lenient_upgrade")]
    pub specialization: Option<RawUpgrade>,
    #[serde(default, deserialize_with = "lenient_upgrade_list")]
    pub extensions: Option<Vec<RawUpgrade>>,
    #[serde(default, deserialize_with = "lenient_upgrade_list")]
    pub storage_upgrades: Option<Vec<RawUpgrade>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StructuredCourse {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, alias = "name", alias = "education_title")]
    pub caption: Option<String>,
    #[serde(default, alias = "participants", deserialize_with = "lenient_string_list")]
    pub participant_ids: Vec<String>,
    #[serde(default, alias = "leader_id", deserialize_with = "lenient_string")]
    pub instructor_id: Option<String>,
    #[serde(default, alias = "finish_time", alias = "available_at")]
    pub finish: Option<RawTime>,
}

/// One row of the course listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRow {
    pub id: String,
    pub name: String,
    pub remaining: Option<RawTime>,
    pub instructor_text: String,
    pub detail_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawCourse {
    Structured(StructuredCourse),
    Row(CourseRow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait GameSource: Send + Sync {
    async fn viewer(&self) -> Result<Viewer>;
    async fn buildings(&self) -> Result<Vec<RawBuilding>>;
    async fn courses(&self) -> Result<Vec<RawCourse>>;
}

/// A fetched course detail page and the address it was served from.
#[derive(Debug, Clone)]
pub struct DetailDocument {
    pub url: Url,
    pub html: String,
}

impl DetailDocument {
    /// Participant profile ids, links resolved against the page address.
    pub fn participant_ids(&self) -> Vec<String> {
        document::parse_participant_ids(&self.html, &self.url)
    }
}

#[async_trait]
pub trait CourseDetailSource: Send + Sync {
    async fn course_detail(&self, reference: &str) -> Result<DetailDocument>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_building_with_mixed_times() {
        let raw = r#"{
            "caption": "Wache 1",
            "specialization": {"caption": "Wasserrettung", "available_at": "2024-05-10T14:30:00+02:00"},
            "extensions": [{"caption": "Rettungsdienst", "available_at": 1715344200}],
            "storage_upgrades": null
        }"#;
        let b: RawBuilding = serde_json::from_str(raw).unwrap();
        assert_eq!(b.caption, "Wache 1");
        assert_eq!(
            b.specialization.unwrap().available_at,
            Some(RawTime::Absolute("2024-05-10T14:30:00+02:00".into()))
        );
        let ext = b.extensions.unwrap();
        assert_eq!(ext[0].available_at, Some(RawTime::EpochSeconds(1715344200)));
        assert!(b.storage_upgrades.is_none());
    }

    #[test]
    fn test_upgrade_type_accepts_numbers() {
        let u: RawUpgrade = serde_json::from_str(r#"{"upgrade_type": 3}"#).unwrap();
        assert_eq!(u.upgrade_type.as_deref(), Some("3"));
        assert!(u.caption.is_none());
        assert!(u.available_at.is_none());
    }

    #[test]
    fn test_structured_course_aliases() {
        let raw = r#"{"id": 9, "name": "GW-Messtechnik", "participants": [1, "2"], "leader_id": 5, "finish_time": 1715344200}"#;
        let c: StructuredCourse = serde_json::from_str(raw).unwrap();
        assert_eq!(c.id.as_deref(), Some("9"));
        assert_eq!(c.caption.as_deref(), Some("GW-Messtechnik"));
        assert_eq!(c.participant_ids, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(c.instructor_id.as_deref(), Some("5"));
        assert_eq!(c.finish, Some(RawTime::EpochSeconds(1715344200)));
    }

    #[test]
    fn test_bad_building_dropped_good_one_kept() {
        let raw = r#"[
            {"caption": "Wache 1", "extensions": [{"caption": "Rettungsdienst", "available_at": 1715344200}]},
            {"caption": null, "extensions": []},
            {"caption": "Wache 3", "storage_upgrades": [{"caption": "Lager", "available_at": true}]}
        ]"#;
        let items: Vec<Value> = serde_json::from_str(raw).unwrap();
        let buildings: Vec<RawBuilding> = decode_each(items, "building");
        let captions: Vec<&str> = buildings.iter().map(|b| b.caption.as_str()).collect();
        assert_eq!(captions, vec!["Wache 1", "Wache 3"]);
        assert_eq!(buildings[0].extensions.as_ref().unwrap().len(), 1);
        // Only the unreadable upgrade goes, not its building.
        assert_eq!(buildings[1].storage_upgrades, Some(vec![]));
    }

    #[test]
    fn test_bad_upgrades_dropped_siblings_kept() {
        let raw = r#"{
            "caption": "Wache 1",
            "specialization": {"caption": "Wasserrettung", "available_at": {"at": 1}},
            "extensions": [
                {"caption": "Rettungsdienst", "available_at": 1715344200},
                {"caption": ["x"], "available_at": 1715344200}
            ]
        }"#;
        let b: RawBuilding = serde_json::from_str(raw).unwrap();
        assert!(b.specialization.is_none());
        let ext = b.extensions.unwrap();
        assert_eq!(ext.len(), 1);
        assert_eq!(ext[0].caption.as_deref(), Some("Rettungsdienst"));
    }

    #[test]
    fn test_bad_course_dropped() {
        let items: Vec<Value> =
            serde_json::from_str(r#"[{"id": 1, "name": "Notarzt"}, {"id": 2, "finish_time": false}]"#).unwrap();
        let courses: Vec<StructuredCourse> = decode_each(items, "course");
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].caption.as_deref(), Some("Notarzt"));
    }
}
