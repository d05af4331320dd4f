/// Which listing endpoint the course source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseListing {
    /// `/schoolings` page, one table row per course, membership via detail pages.
    Document,
    /// `/api/schoolings` JSON with participant and instructor ids inline.
    Structured,
}

impl CourseListing {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "structured" | "json" | "api" => CourseListing::Structured,
            _ => CourseListing::Document,
        }
    }
}

/// Boolean env value; `None` for anything unrecognised.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub session_cookie: Option<String>,
    pub http_timeout_secs: u64,
    /// How long a computed overview is served before recomputation.
    pub cache_validity_secs: u64,
    /// Detail pages fetched concurrently per batch.
    pub detail_batch_size: usize,
    /// Count an instructor free-text that contains the viewer's name as membership.
    pub instructor_name_match: bool,
    pub course_listing: CourseListing,
    pub cache_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://www.leitstellenspiel.de".to_string(),
            session_cookie: None,
            http_timeout_secs: 10,
            cache_validity_secs: 300,
            detail_batch_size: 3,
            instructor_name_match: true,
            course_listing: CourseListing::Document,
            cache_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: std::env::var("LSS_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(d.base_url),
            session_cookie: std::env::var("LSS_COOKIE").ok().filter(|v| !v.is_empty()),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.http_timeout_secs),
            cache_validity_secs: std::env::var("CACHE_VALIDITY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.cache_validity_secs),
            detail_batch_size: std::env::var("DETAIL_BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.detail_batch_size),
            instructor_name_match: std::env::var("INSTRUCTOR_NAME_MATCH")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(d.instructor_name_match),
            course_listing: std::env::var("COURSE_LISTING")
                .map(|v| CourseListing::parse(&v))
                .unwrap_or(d.course_listing),
            cache_path: std::env::var("CACHE_PATH").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Batch size with the zero case clamped to one.
    pub fn batch_size(&self) -> usize {
        self.detail_batch_size.max(1)
    }

    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_validity_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_parse() {
        assert_eq!(CourseListing::parse("structured"), CourseListing::Structured);
        assert_eq!(CourseListing::parse(" JSON "), CourseListing::Structured);
        assert_eq!(CourseListing::parse("document"), CourseListing::Document);
        assert_eq!(CourseListing::parse("bogus"), CourseListing::Document);
    }

    #[test]
    fn test_flag_parse() {
        assert_eq!(parse_flag("on"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_batch_size_clamped() {
        let cfg = Config { detail_batch_size: 0, ..Default::default() };
        assert_eq!(cfg.batch_size(), 1);
        assert_eq!(Config::default().batch_size(), 3);
    }

    #[test]
    fn test_validity_duration() {
        let cfg = Config { cache_validity_secs: 90, ..Default::default() };
        assert_eq!(cfg.validity(), chrono::Duration::seconds(90));
    }
}
