//! Table scanning for the course listing and course detail pages.
//!
//! Both pages render a `table.table-striped` whose body rows carry the data.
//! The pages are small and regular, so rows and cells are matched with
//! regexes instead of building a DOM.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use super::{CourseRow, RawTime};

static TABLE_RE: OnceLock<Regex> = OnceLock::new();
static TBODY_RE: OnceLock<Regex> = OnceLock::new();
static ROW_RE: OnceLock<Regex> = OnceLock::new();
static CELL_RE: OnceLock<Regex> = OnceLock::new();
static HREF_RE: OnceLock<Regex> = OnceLock::new();
static SORTVALUE_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_RE: OnceLock<Regex> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// One `<td>`: its raw attribute text and inner html.
struct Cell<'a> {
    attrs: &'a str,
    inner: &'a str,
}

impl<'a> Cell<'a> {
    fn text(&self) -> String {
        text_content(self.inner)
    }

    fn first_href(&self) -> Option<&'a str> {
        compiled(&HREF_RE, r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["']"#)
            .captures(self.inner)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    fn sortvalue(&self) -> Option<&'a str> {
        compiled(&SORTVALUE_RE, r#"(?i)\bsortvalue\s*=\s*["']([^"']*)["']"#)
            .captures(self.attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

/// Cells of every body row in every striped table, in document order.
fn striped_rows(html: &str) -> Vec<Vec<Cell<'_>>> {
    let table_re = compiled(
        &TABLE_RE,
        r#"(?is)<table\b[^>]*?\bclass\s*=\s*["'][^"']*\btable-striped\b[^"']*["'][^>]*>(.*?)</table>"#,
    );
    let tbody_re = compiled(&TBODY_RE, r"(?is)<tbody\b[^>]*>(.*?)</tbody>");
    let row_re = compiled(&ROW_RE, r"(?is)<tr\b[^>]*>(.*?)</tr>");
    let cell_re = compiled(&CELL_RE, r"(?is)<td\b([^>]*)>(.*?)</td>");

    let mut rows = Vec::new();
    for table in table_re.captures_iter(html) {
        let Some(table_body) = table.get(1) else { continue };
        for tbody in tbody_re.captures_iter(table_body.as_str()) {
            let Some(body) = tbody.get(1) else { continue };
            for row in row_re.captures_iter(body.as_str()) {
                let Some(row_inner) = row.get(1) else { continue };
                let cells = cell_re
                    .captures_iter(row_inner.as_str())
                    .filter_map(|c| {
                        Some(Cell {
                            attrs: c.get(1)?.as_str(),
                            inner: c.get(2)?.as_str(),
                        })
                    })
                    .collect();
                rows.push(cells);
            }
        }
    }
    rows
}

/// Visible text of an html fragment, trimmed.
pub fn text_content(fragment: &str) -> String {
    let stripped = compiled(&TAG_RE, r"(?s)<[^>]*>").replace_all(fragment, "");
    decode_entities(&stripped).trim().to_string()
}

fn decode_entities(s: &str) -> String {
    compiled(&ENTITY_RE, r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);")
        .replace_all(s, |caps: &regex::Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    "auml" => Some('ä'),
                    "ouml" => Some('ö'),
                    "uuml" => Some('ü'),
                    "Auml" => Some('Ä'),
                    "Ouml" => Some('Ö'),
                    "Uuml" => Some('Ü'),
                    "szlig" => Some('ß'),
                    _ => None,
                }
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Leading integer of `s`, ignoring surrounding whitespace and trailing junk.
pub fn parse_leading_int(s: &str) -> Option<i64> {
    let t = s.trim_start();
    let (sign, digits) = match t.as_bytes().first() {
        Some(b'-') => (-1, &t[1..]),
        Some(b'+') => (1, &t[1..]),
        _ => (1, t),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|v| v * sign)
}

/// Absolute link target and its last non-empty path segment.
///
/// A trailing slash is ignored, so `/profile/7/` yields `7` rather than an
/// empty id that could never match. Query and fragment are not part of the id.
fn resolve_link(base: &Url, href: &str) -> Option<(String, String)> {
    let target = base.join(href).ok()?;
    let id = target
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();
    Some((target.to_string(), id))
}

/// Course listing rows: name with detail link, remaining seconds, instructor.
///
/// Rows with fewer than three cells or without a detail link are skipped.
pub fn parse_course_listing(html: &str, base: &Url) -> Vec<CourseRow> {
    striped_rows(html)
        .into_iter()
        .filter(|cells| cells.len() >= 3)
        .filter_map(|cells| {
            let (detail_url, id) = resolve_link(base, cells[0].first_href()?)?;
            Some(CourseRow {
                id,
                name: cells[0].text(),
                remaining: cells[1]
                    .sortvalue()
                    .and_then(parse_leading_int)
                    .map(RawTime::RemainingSeconds),
                instructor_text: cells[2].text(),
                detail_url,
            })
        })
        .collect()
}

/// Profile ids linked from the participant table of a course detail page.
pub fn parse_participant_ids(html: &str, base: &Url) -> Vec<String> {
    striped_rows(html)
        .into_iter()
        .filter(|cells| cells.len() >= 4)
        .filter_map(|cells| {
            let href = cells[2].first_href()?;
            resolve_link(base, href).map(|(_, id)| id)
        })
        .collect()
}
