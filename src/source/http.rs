use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::document::parse_course_listing;
use super::{
    decode_each, lenient_string, CourseDetailSource, DetailDocument, GameSource, RawBuilding, RawCourse, StructuredCourse,
    Viewer,
};
use crate::config::{Config, CourseListing};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Deserialize, Debug)]
struct UserInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    user_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Structured listing is served either as a bare array or wrapped in `result`.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CourseEnvelope {
    Bare(Vec<Value>),
    Wrapped { result: Vec<Value> },
}

/// Game endpoints over HTTP, authenticated with the browser session cookie.
pub struct HttpSource {
    client: Client,
    base: Url,
    listing: CourseListing,
}

impl HttpSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &cfg.session_cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie).context("invalid LSS_COOKIE")?);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .default_headers(headers)
            .build()?;
        let base = Url::parse(&format!("{}/", cfg.base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid base url {}", cfg.base_url))?;
        Ok(Self {
            client,
            base,
            listing: cfg.course_listing,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("cannot join {} onto {}", path, self.base))
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        let status = resp.status();
        log(
            Level::Debug,
            Domain::Source,
            "response",
            obj(&[("url", v_str(url.as_str())), ("status", v_num(status.as_u16() as f64))]),
        );
        if !status.is_success() {
            return Err(anyhow!("{}: {}", url, status.as_u16()));
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let resp = self.get(url.clone()).await?;
        resp.json::<T>().await.with_context(|| format!("decoding {}", url))
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        let resp = self.get(url.clone()).await?;
        resp.text().await.with_context(|| format!("reading {}", url))
    }
}

#[async_trait]
impl GameSource for HttpSource {
    async fn viewer(&self) -> Result<Viewer> {
        let info: UserInfo = self.get_json("/api/userinfo").await?;
        let id = info.user_id.ok_or_else(|| anyhow!("userinfo without user_id"))?;
        Ok(Viewer {
            id,
            name: info.name.unwrap_or_default(),
        })
    }

    async fn buildings(&self) -> Result<Vec<RawBuilding>> {
        let items: Vec<Value> = self.get_json("/api/buildings").await?;
        Ok(decode_each(items, "building"))
    }

    async fn courses(&self) -> Result<Vec<RawCourse>> {
        match self.listing {
            CourseListing::Structured => {
                let envelope: CourseEnvelope = self.get_json("/api/schoolings").await?;
                let items = match envelope {
                    CourseEnvelope::Bare(v) => v,
                    CourseEnvelope::Wrapped { result } => result,
                };
                let courses: Vec<StructuredCourse> = decode_each(items, "course");
                Ok(courses.into_iter().map(RawCourse::Structured).collect())
            }
            CourseListing::Document => {
                let html = self.get_text(self.endpoint("/schoolings")?).await?;
                Ok(parse_course_listing(&html, &self.base)
                    .into_iter()
                    .map(RawCourse::Row)
                    .collect())
            }
        }
    }
}

#[async_trait]
impl CourseDetailSource for HttpSource {
    async fn course_detail(&self, reference: &str) -> Result<DetailDocument> {
        let url = self
            .base
            .join(reference)
            .with_context(|| format!("bad course reference {}", reference))?;
        let html = self.get_text(url.clone()).await?;
        Ok(DetailDocument { url, html })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_under_base() {
        let cfg = Config { base_url: "https://example.test/game/".into(), ..Default::default() };
        let src = HttpSource::new(&cfg).unwrap();
        assert_eq!(src.endpoint("/api/buildings").unwrap().as_str(), "https://example.test/game/api/buildings");
    }

    #[test]
    fn test_userinfo_numeric_id() {
        let info: UserInfo = serde_json::from_str(r#"{"user_id": 1234, "name": "Anna"}"#).unwrap();
        assert_eq!(info.user_id.as_deref(), Some("1234"));
        assert_eq!(info.name.as_deref(), Some("Anna"));
    }

    #[test]
    fn test_course_envelope_shapes() {
        let bare: CourseEnvelope = serde_json::from_str(r#"[{"id": 1}]"#).unwrap();
        assert!(matches!(bare, CourseEnvelope::Bare(v) if v.len() == 1));
        let wrapped: CourseEnvelope = serde_json::from_str(r#"{"result": [{"id": 1}, {"id": 2}]}"#).unwrap();
        assert!(matches!(wrapped, CourseEnvelope::Wrapped { result } if result.len() == 2));
    }

    #[test]
    fn test_bad_cookie_rejected() {
        let cfg = Config { session_cookie: Some("bad\nvalue".into()), ..Default::default() };
        assert!(HttpSource::new(&cfg).is_err());
    }
}
