//! Club information scraped from the club website.
//!
//! Club pages are plain server-rendered HTML, so the scraper slices tags by
//! hand instead of building a DOM.

use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::Config;

/// Telegram's caption limit for photos.
pub const MAX_CAPTION_LENGTH: usize = 1024;
/// About Us is cut to this many characters when the full caption is too long.
pub const MAX_ABOUT_US_LENGTH: usize = 600;

const ABOUT_US_MISSING: &str = "About Us section not found";
const KEY_EVENTS_MISSING: &str = "Key Events section not found";
const ABOUT_US_FAILED: &str = "Error fetching About Us.";
const KEY_EVENTS_FAILED: &str = "Error fetching Key Events.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubInfo {
    pub icon_url: Option<String>,
    pub about_us: String,
    pub key_events: String,
}

impl ClubInfo {
    fn fetch_failed() -> Self {
        Self {
            icon_url: None,
            about_us: ABOUT_US_FAILED.to_string(),
            key_events: KEY_EVENTS_FAILED.to_string(),
        }
    }

    /// Message body for the club, shortened to fit a photo caption.
    pub fn caption(&self, club: &str, url: &str) -> String {
        let full = format!(
            "ℹ️ {club} Info:\n\nAbout Us:\n{}\n\nKey Events:\n{}",
            self.about_us, self.key_events
        );
        if full.chars().count() <= MAX_CAPTION_LENGTH {
            return full;
        }
        let about: String = self.about_us.chars().take(MAX_ABOUT_US_LENGTH).collect();
        format!(
            "ℹ️ {club} Info:\n\nAbout Us:\n{about}\n\nFor more information, please visit the club at {url}"
        )
    }
}

/// Page slug for a club name: lowercase, parentheses dropped, words joined by `-`.
pub fn club_slug(name: &str) -> String {
    name.to_lowercase()
        .replace(['(', ')'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone)]
pub struct ClubDirectory {
    http: Client,
    base_url: String,
    explore_path: String,
    names: Vec<String>,
    about_overrides: BTreeMap<String, PathBuf>,
}

impl ClubDirectory {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("camp-attendance-bot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.clubs.base_url.trim_end_matches('/').to_string(),
            explore_path: cfg.clubs.explore_path.trim_matches('/').to_string(),
            names: cfg.clubs.names.clone(),
            about_overrides: cfg
                .clubs
                .about_overrides
                .iter()
                .map(|(club, file)| (club.clone(), cfg.data_path(file)))
                .collect(),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn url_for(&self, club: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.explore_path, club_slug(club))
    }

    /// Scrape the club page. Failures are logged and turned into placeholder text.
    pub async fn fetch(&self, club: &str) -> ClubInfo {
        match self.try_fetch(club).await {
            Ok(info) => info,
            Err(err) => {
                warn!(?err, club, "failed to fetch club info");
                ClubInfo::fetch_failed()
            }
        }
    }

    #[instrument(skip(self))]
    async fn try_fetch(&self, club: &str) -> Result<ClubInfo> {
        let url = self.url_for(club);
        let html = self
            .http
            .get(&url)
            .send()
            .await
            .context("failed to reach club site")?
            .error_for_status()?
            .text()
            .await
            .context("failed to read club page")?;

        let mut info = parse_club_page(&html, &url, &self.base_url);
        if let Some(path) = self.about_overrides.get(club) {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            info.about_us = text.trim().to_string();
        }
        info!(club, icon = info.icon_url.is_some(), "fetched club info");
        Ok(info)
    }
}

/// Extract icon, About Us and Key Events from a club page.
pub fn parse_club_page(html: &str, page_url: &str, base_url: &str) -> ClubInfo {
    let lc = html.to_ascii_lowercase();

    let icon_url = lazy_img_src(html, &lc).map(|src| {
        if src.starts_with("http://") || src.starts_with("https://") {
            src
        } else {
            format!("{}{}", base_url.trim_end_matches('/'), src)
        }
    });

    let about_us = match heading_section(html, &lc, "ABOUT US") {
        Some((start, end)) => {
            let paragraphs: Vec<String> = tag_blocks(html, &lc, "p", start, end)
                .into_iter()
                .map(text_of)
                .filter(|t| !t.is_empty())
                .map(|t| format!("📝 {t}"))
                .collect();
            if paragraphs.is_empty() {
                tag_blocks(html, &lc, "p", start, html.len())
                    .into_iter()
                    .map(text_of)
                    .find(|t| !t.is_empty())
                    .map(|t| format!("📝 {t}"))
                    .unwrap_or_else(|| ABOUT_US_MISSING.to_string())
            } else {
                paragraphs.join("\n\n")
            }
        }
        None => ABOUT_US_MISSING.to_string(),
    };

    let key_events = match heading_section(html, &lc, "KEY EVENTS") {
        Some((start, end)) => {
            let events: Vec<String> = tag_blocks(html, &lc, "li", start, end)
                .into_iter()
                .filter_map(|li| {
                    let li_lc = li.to_ascii_lowercase();
                    tag_blocks(li, &li_lc, "u", 0, li.len())
                        .into_iter()
                        .next()
                        .map(text_of)
                })
                .filter(|t| !t.is_empty())
                .map(|t| format!("• {t}"))
                .collect();
            let mut out = events.join("\n");
            if !events.is_empty() {
                out.push_str(&format!(
                    "\n\nFor more information, please visit the club at {page_url}"
                ));
            }
            out
        }
        None => KEY_EVENTS_MISSING.to_string(),
    };

    ClubInfo {
        icon_url,
        about_us,
        key_events,
    }
}

/// Byte range after the `<h2>` whose text contains `needle` up to the next `<h2`.
fn heading_section(html: &str, lc: &str, needle: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(start) = find_open_tag(lc, "h2", from) {
        let (inner, end) = block_at(html, lc, "h2", start)?;
        if text_of(inner).to_uppercase().contains(needle) {
            let stop = find_open_tag(lc, "h2", end).unwrap_or(html.len());
            return Some((end, stop));
        }
        from = end;
    }
    None
}

/// Inner HTML of every `<tag>...</tag>` starting inside `[from, to)`.
fn tag_blocks<'a>(html: &'a str, lc: &str, tag: &str, from: usize, to: usize) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = from;
    while let Some(start) = find_open_tag(lc, tag, pos) {
        if start >= to {
            break;
        }
        let Some((inner, end)) = block_at(html, lc, tag, start) else {
            break;
        };
        out.push(inner);
        pos = end;
    }
    out
}

/// Position of the next `<tag` followed by `>`, `/` or whitespace.
fn find_open_tag(lc: &str, tag: &str, from: usize) -> Option<usize> {
    let pat = format!("<{tag}");
    let mut pos = from;
    loop {
        let at = lc.get(pos..)?.find(&pat)? + pos;
        let next = lc[at + pat.len()..].chars().next();
        if matches!(next, Some(c) if c == '>' || c == '/' || c.is_whitespace()) {
            return Some(at);
        }
        pos = at + pat.len();
    }
}

/// Inner HTML of the block opening at `start`, and the offset just past its close tag.
fn block_at<'a>(html: &'a str, lc: &str, tag: &str, start: usize) -> Option<(&'a str, usize)> {
    let open_end = lc[start..].find('>')? + start + 1;
    let close = format!("</{tag}");
    let close_at = lc[open_end..].find(&close)? + open_end;
    let end = lc[close_at..].find('>').map_or(lc.len(), |i| close_at + i + 1);
    Some((&html[open_end..close_at], end))
}

fn lazy_img_src(html: &str, lc: &str) -> Option<String> {
    let mut pos = 0;
    while let Some(start) = find_open_tag(lc, "img", pos) {
        let tag_end = lc[start..].find('>')? + start;
        let tag_lc = &lc[start..tag_end];
        if tag_lc.contains("loading=\"lazy\"") || tag_lc.contains("loading='lazy'") {
            return attr_value(&html[start..tag_end], tag_lc, "src");
        }
        pos = tag_end;
    }
    None
}

fn attr_value(tag: &str, tag_lc: &str, name: &str) -> Option<String> {
    let mut pos = 0;
    loop {
        let at = tag_lc.get(pos..)?.find(&format!("{name}="))? + pos;
        let preceded_by_space = tag_lc[..at].ends_with(|c: char| c.is_whitespace());
        let value_start = at + name.len() + 1;
        if preceded_by_space {
            let quote = tag[value_start..].chars().next()?;
            if quote == '"' || quote == '\'' {
                let rest = &tag[value_start + 1..];
                let len = rest.find(quote)?;
                return Some(decode_entities(&rest[..len]));
            }
            let rest = &tag[value_start..];
            let len = rest
                .find(|c: char| c.is_whitespace() || c == '/')
                .unwrap_or(rest.len());
            return Some(decode_entities(&rest[..len]));
        }
        pos = value_start;
    }
}

/// Visible text of an HTML fragment with whitespace collapsed.
fn text_of(fragment: &str) -> String {
    let mut stripped = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&rsquo;", "’")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
<header><img src="/logo-site.png" alt="site"></header>
<div class="club"><img loading="lazy" src="/sites/default/files/icon.png" alt="icon"></div>
<div class="field_body">
  <h2><strong>About Us</strong></h2>
  <p>We celebrate the <em>culture</em> of the Gulf.</p>
  <p>&nbsp;</p>
  <p>Open to all&nbsp;students &amp; staff.</p>
</div>
<div class="field_body">
  <h2>Key Events</h2>
  <ul>
    <li><u>Welcome Tea</u> in August</li>
    <li>No header here</li>
    <li><p><u>Cultural Night</u></p> in March</li>
  </ul>
</div>
<pre>not a paragraph</pre>
</body></html>"#;

    const URL: &str = "https://vivace.smu.edu.sg/explore/icon/smu-al-khaleej";

    #[test]
    fn slug_matches_site_paths() {
        assert_eq!(club_slug("SMU Al Khaleej"), "smu-al-khaleej");
        assert_eq!(
            club_slug("SMU Komunitas Indonesia (SMUKI)"),
            "smu-komunitas-indonesia-smuki"
        );
    }

    #[test]
    fn parses_sections_and_icon() {
        let info = parse_club_page(PAGE, URL, "https://vivace.smu.edu.sg/");
        assert_eq!(
            info.icon_url.as_deref(),
            Some("https://vivace.smu.edu.sg/sites/default/files/icon.png")
        );
        assert_eq!(
            info.about_us,
            "📝 We celebrate the culture of the Gulf.\n\n📝 Open to all students & staff."
        );
        assert_eq!(
            info.key_events,
            format!("• Welcome Tea\n• Cultural Night\n\nFor more information, please visit the club at {URL}")
        );
    }

    #[test]
    fn missing_sections_use_placeholders() {
        let info = parse_club_page("<html><h2>Gallery</h2><p>x</p></html>", URL, "");
        assert_eq!(info.icon_url, None);
        assert_eq!(info.about_us, ABOUT_US_MISSING);
        assert_eq!(info.key_events, KEY_EVENTS_MISSING);
    }

    #[test]
    fn long_captions_are_shortened() {
        let info = ClubInfo {
            icon_url: None,
            about_us: "a".repeat(1000),
            key_events: "• Event".into(),
        };
        let caption = info.caption("SMU Roots", URL);
        assert!(caption.chars().count() <= MAX_CAPTION_LENGTH);
        assert!(caption.contains(&"a".repeat(MAX_ABOUT_US_LENGTH)));
        assert!(!caption.contains(&"a".repeat(MAX_ABOUT_US_LENGTH + 1)));
        assert!(caption.ends_with(URL));

        let short = ClubInfo {
            about_us: "📝 Hi".into(),
            ..info
        };
        assert_eq!(
            short.caption("SMU Roots", URL),
            "ℹ️ SMU Roots Info:\n\nAbout Us:\n📝 Hi\n\nKey Events:\n• Event"
        );
    }
}
