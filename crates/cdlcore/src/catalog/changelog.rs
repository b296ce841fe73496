//! Build-server changelog.
//!
//! The build server exposes its recent builds as XML:
//!
//! ```xml
//! <builds>
//!   <build>
//!     <building>false</building>
//!     <number>10600</number>
//!     <result>SUCCESS</result>
//!     <timestamp>1583065800000</timestamp>
//!     <changeSet><item><msg>Fix #1234</msg></item></changeSet>
//!   </build>
//! </builds>
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::download::ContentFetcher;
use crate::error::{LauncherError, Result};
use crate::task::TaskContext;

pub const CHANGELOG_URL: &str = "http://gorgon.narc.ro:8080/job/Cataclysm-Matrix/api/xml?tree=builds[number,timestamp,building,result,changeSet[items[msg]]]&xpath=//builds&wrapper=builds";

pub const ISSUE_URL: &str = "https://github.com/CleverRaven/Cataclysm-DDA/issues/";

static ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)").expect("valid issue regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub number: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub building: bool,
    /// `SUCCESS`, `FAILURE`, ... Absent while building.
    pub result: Option<String>,
    pub changes: Vec<String>,
}

/// Parse the build-server XML. Builds without a number are dropped.
pub fn parse_changelog(xml: &str) -> Result<Vec<ChangelogEntry>> {
    // Text is trimmed per element; trimming events would eat the spaces
    // around entity references.
    let mut reader = Reader::from_str(xml);

    let mut entries = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<ChangelogEntry> = None;
    let mut number: Option<i64> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"build" {
                    current = Some(ChangelogEntry::default());
                    number = None;
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(e)) => {
                let decoded = e
                    .decode()
                    .map_err(|e| LauncherError::Parse(format!("changelog: {e}")))?;
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(e)) => {
                let name = e
                    .decode()
                    .map_err(|e| LauncherError::Parse(format!("changelog: {e}")))?;
                text.push_str(&resolve_entity(&name));
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = e.name().as_ref().to_vec();
                if let Some(entry) = current.as_mut() {
                    let value = text.trim();
                    let parent = path.len().checked_sub(2).and_then(|i| path.get(i));
                    let in_build = parent.map(|p| p.as_slice() == b"build").unwrap_or(false);
                    match name.as_slice() {
                        b"number" if in_build => number = value.parse().ok(),
                        b"building" if in_build => entry.building = value == "true",
                        b"result" if in_build => entry.result = Some(value.to_string()),
                        b"timestamp" if in_build => {
                            entry.published_at = value
                                .parse::<i64>()
                                .ok()
                                .and_then(DateTime::from_timestamp_millis);
                        }
                        b"msg" if !value.is_empty() => entry.changes.push(value.to_string()),
                        b"build" => {
                            if let (Some(mut entry), Some(n)) = (current.take(), number) {
                                entry.number = n;
                                entries.push(entry);
                            }
                        }
                        _ => {}
                    }
                }
                path.pop();
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LauncherError::Parse(format!(
                    "changelog at position {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
        buf.clear();
    }

    Ok(entries)
}

fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{name};"))
        }
    }
}

/// Rewrite `#1234` tokens into issue links. `text` must already be
/// HTML-escaped.
pub fn link_issues(text: &str) -> String {
    ISSUE_RE
        .replace_all(text, |caps: &regex::Captures| {
            format!("<a href=\"{ISSUE_URL}{n}\">#{n}</a>", n = &caps[1])
        })
        .into_owned()
}

/// Render entries as an HTML fragment for the changelog view.
pub fn render_html(entries: &[ChangelogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let date = entry
            .published_at
            .map(|d| format!(" ({})", d.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        let state = if entry.building {
            "building".to_string()
        } else {
            entry.result.clone().unwrap_or_default().to_lowercase()
        };
        out.push_str(&format!("<h4>Build #{}{date} - {state}</h4>\n", entry.number));
        if entry.changes.is_empty() {
            out.push_str("<p>No changes</p>\n");
            continue;
        }
        out.push_str("<ul>\n");
        for change in &entry.changes {
            let escaped = quick_xml::escape::escape(change.as_str());
            out.push_str(&format!("<li>{}</li>\n", link_issues(&escaped)));
        }
        out.push_str("</ul>\n");
    }
    out
}

pub fn fetch_changelog(
    fetcher: &ContentFetcher,
    url: &str,
    ctx: &TaskContext,
) -> Result<Vec<ChangelogEntry>> {
    ctx.stage("Fetching changelog");
    let xml = fetcher.get_text(url, ctx)?;
    parse_changelog(&xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<builds>
  <build _class="hudson.matrix.MatrixBuild">
    <building>false</building>
    <number>10600</number>
    <result>SUCCESS</result>
    <timestamp>1583065800000</timestamp>
    <changeSet _class="hudson.plugins.git.GitChangeSetList">
      <item><msg>Fix crash when butchering (#1234)</msg></item>
      <item><msg>Balance &amp; cleanup</msg></item>
    </changeSet>
  </build>
  <build>
    <building>true</building>
    <number>10601</number>
    <changeSet/>
  </build>
  <build><result>FAILURE</result></build>
</builds>"#;

    #[test]
    fn test_parse_changelog() {
        let entries = parse_changelog(XML).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.number, 10600);
        assert!(!first.building);
        assert_eq!(first.result.as_deref(), Some("SUCCESS"));
        assert_eq!(
            first.published_at.unwrap().format("%Y-%m-%d").to_string(),
            "2020-03-01"
        );
        assert_eq!(
            first.changes,
            vec!["Fix crash when butchering (#1234)", "Balance & cleanup"]
        );

        assert!(entries[1].building);
        assert!(entries[1].changes.is_empty());
    }

    #[test]
    fn test_link_issues() {
        assert_eq!(
            link_issues("See #42 and #7."),
            format!("See <a href=\"{ISSUE_URL}42\">#42</a> and <a href=\"{ISSUE_URL}7\">#7</a>.")
        );
        assert_eq!(link_issues("no refs #x"), "no refs #x");
    }

    #[test]
    fn test_render_escapes_before_linking() {
        let entries = parse_changelog(XML).unwrap();
        let html = render_html(&entries);
        assert!(html.contains("<h4>Build #10600 (2020-03-01 12:30) - success</h4>"));
        assert!(html.contains("Balance &amp; cleanup"));
        assert!(html.contains(&format!("<a href=\"{ISSUE_URL}1234\">#1234</a>")));
        assert!(html.contains("Build #10601 - building"));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse_changelog("<builds><build></wrong></builds>"),
            Err(LauncherError::Parse(_))
        ));
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("#x41"), "A");
        assert_eq!(resolve_entity("#66"), "B");
        assert_eq!(resolve_entity("nbsp"), "&nbsp;");
    }
}
