use crate::models::Review;
use crate::scrape::dates;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// One review card as snapshotted in-page by [`CARD_SNAPSHOT_JS`]. Every
/// field is a raw candidate; resolution into a [`Review`] happens in Rust so
/// each fallback strategy stays testable without a browser.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCard {
    #[serde(default)]
    pub name_label: Option<String>,
    #[serde(default)]
    pub contrib_text: Option<String>,
    #[serde(default)]
    pub contrib_href: Option<String>,
    #[serde(default)]
    pub avatar_alt: Option<String>,
    #[serde(default)]
    pub avatar_src: Option<String>,
    #[serde(default)]
    pub rating_aria: Option<String>,
    #[serde(default)]
    pub date_label: Option<String>,
    #[serde(default)]
    pub text_candidates: Vec<String>,
    #[serde(default)]
    pub local_guide: bool,
    #[serde(default)]
    pub photo_sources: Vec<String>,
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Author name and profile URL, tried in order: visible name label, the
/// contributor link (which also yields the URL), the avatar alt text.
pub fn resolve_author(card: &RawCard) -> (Option<String>, Option<String>) {
    let author_url = card.contrib_href.as_deref().and_then(non_empty).map(|u| {
        if u.starts_with('/') {
            format!("https://www.google.com{u}")
        } else {
            u
        }
    });

    if let Some(name) = card.name_label.as_deref().and_then(non_empty) {
        return (Some(name), author_url);
    }
    if let Some(name) = card.contrib_text.as_deref().and_then(non_empty) {
        return (Some(name), author_url);
    }
    if let Some(alt) = card.avatar_alt.as_deref() {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(?i)(?:Profile photo of|Фото профиля)\s+(.+)").unwrap()
        });
        if let Some(name) = re
            .captures(alt)
            .and_then(|c| c.get(1))
            .and_then(|m| non_empty(m.as_str()))
        {
            return (Some(name), author_url);
        }
    }
    (None, author_url)
}

/// Rating out of an accessible "4 out of 5 stars"-style label. Only the
/// leading number matters, so the label language does not.
pub fn parse_rating(aria: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"([\d.,]+)").unwrap());
    re.captures(aria)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
        .filter(|r| (0.0..=5.0).contains(r))
}

/// First non-empty body candidate wins; the snapshot already lists them in
/// priority order.
pub fn resolve_body(candidates: &[String]) -> Option<String> {
    candidates.iter().find_map(|c| non_empty(c))
}

fn photo_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https://lh3\.googleusercontent\.com/[^\s"'()]+"#).unwrap())
}

/// Rewrites a thumbnail URL to its canonical full-size form.
pub fn normalize_photo_url(url: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"/p/([^=/?]+)").unwrap());
    match re.captures(url).and_then(|c| c.get(1)) {
        Some(id) => format!("https://lh3.googleusercontent.com/p/{}=s0", id.as_str()),
        None => url.to_string(),
    }
}

/// Pulls photo URLs out of thumbnail hrefs and inline styles, normalized and
/// de-duplicated with order preserved.
pub fn extract_photo_urls(sources: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for src in sources {
        if let Some(m) = photo_url_re().find(src) {
            let url = normalize_photo_url(m.as_str());
            if !out.contains(&url) {
                out.push(url);
            }
        }
    }
    out
}

/// Correlates a card with one of the intercepted review-list payloads.
/// Matching is textual and deliberately loose: the review id, a text
/// prefix, or the author name appearing in the serialized blob is enough.
pub fn match_raw_payload(
    review_id: &str,
    text: Option<&str>,
    author: Option<&str>,
    blobs: &[String],
) -> Option<serde_json::Value> {
    let text_key: Option<String> = text.map(|t| t.chars().take(32).collect());
    for blob in blobs {
        let hit = blob.contains(review_id)
            || text_key.as_deref().is_some_and(|k| !k.is_empty() && blob.contains(k))
            || author.is_some_and(|a| !a.is_empty() && blob.contains(a));
        if hit {
            return serde_json::from_str(blob).ok();
        }
    }
    None
}

/// Assembles a [`Review`] from a raw snapshot. Every field resolves
/// independently; a missing field never voids the record.
pub fn build_review(review_id: &str, card: &RawCard, now: DateTime<Utc>) -> Review {
    let (author, author_url) = resolve_author(card);
    let mut review = Review::empty(review_id);
    review.rating = card.rating_aria.as_deref().and_then(parse_rating);
    review.date = card
        .date_label
        .as_deref()
        .and_then(|d| dates::relative_to_utc(d, now));
    review.author = author;
    review.author_url = author_url;
    review.author_photo = card.avatar_src.as_deref().and_then(non_empty);
    review.is_local_guide = card.local_guide;
    review.text = resolve_body(&card.text_candidates);
    review.photo_urls = extract_photo_urls(&card.photo_sources);
    review
}

/// Snapshots one card subtree by review id. Clicks any "read more" control
/// scoped to the card first (idempotent; expanding twice is a no-op), then
/// collects raw candidates for every field.
pub const CARD_SNAPSHOT_JS: &str = r#"
(rid) => {
    const anchor = document.querySelector('div[data-review-id="' + rid + '"]');
    if (!anchor) return null;
    const card = anchor.closest('div.jftiEf') || anchor;

    card.querySelectorAll(
        'button[jsname="gxjVle"], button[jsname="fk8dgd"], button[aria-expanded="false"]'
    ).forEach(b => { try { b.click(); } catch (e) {} });

    const text = el => el ? (el.innerText || el.textContent || '').trim() : '';
    const attr = (el, a) => el ? (el.getAttribute(a) || '') : '';

    const nameEl = card.querySelector('.d4r55');
    const contribEl = card.querySelector('a[href*="/maps/contrib/"], button[data-href*="/maps/contrib/"]');
    const avatarEl = card.querySelector('img[alt*="Profile photo of"], img[alt*="Фото профиля"]');
    const photoEl = card.querySelector('img.NBa7we, img[src*="googleusercontent.com"]');
    const ratingEl = card.querySelector('.kvMYJc, span[aria-label*="out of 5"], span[aria-label*="из 5"]');
    const dateEl = card.querySelector('.rsqaWe');

    const textCandidates = [];
    for (const sel of ['span[jsname="bN97Pc"]', 'div[data-review-text]', 'span.wiI7pd', 'span[class*="wiI7pd"]']) {
        const el = card.querySelector(sel);
        if (el) textCandidates.push(text(el));
    }

    const badge = /Local Guide|Местный эксперт/i.test(card.innerText || '');

    const photoSources = [];
    card.querySelectorAll('.Tya61d, [href*="lh3.googleusercontent.com"], [style*="lh3.googleusercontent.com"]')
        .forEach(el => {
            const v = attr(el, 'href') || attr(el, 'style');
            if (v) photoSources.push(v);
        });

    return {
        name_label: text(nameEl) || null,
        contrib_text: text(contribEl) || null,
        contrib_href: attr(contribEl, 'data-href') || attr(contribEl, 'href') || null,
        avatar_alt: attr(avatarEl, 'alt') || null,
        avatar_src: attr(photoEl, 'src') || null,
        rating_aria: attr(ratingEl, 'aria-label') || null,
        date_label: text(dateEl) || null,
        text_candidates: textCandidates,
        local_guide: badge,
        photo_sources: photoSources
    };
}
"#;

/// Lists the review ids currently rendered, preferring full cards so a bare
/// anchor node inside a half-rendered card does not get extracted early.
pub const VISIBLE_IDS_JS: &str = r#"
() => {
    const out = new Set();
    document.querySelectorAll('div.jftiEf div[data-review-id]').forEach(n => {
        const rid = n.getAttribute('data-review-id');
        if (rid) out.add(rid);
    });
    if (out.size === 0) {
        document.querySelectorAll('div[data-review-id]').forEach(n => {
            const rid = n.getAttribute('data-review-id');
            if (rid) out.add(rid);
        });
    }
    return Array.from(out);
}
"#;
