use crate::config::Config;
use crate::error::{AppError, Result};
use crate::io::proxies::{is_tunnel_error, ProxyEndpoint};
use crate::models::{Place, PlaceScrape, Review};
use crate::scrape::card::{
    build_review, match_raw_payload, RawCard, CARD_SNAPSHOT_JS, VISIBLE_IDS_JS,
};
use crate::scrape::container::{
    ContainerHandle, LocatedContainer, ScrollMetrics, CONTAINER_METRICS_JS, LOCATE_CONTAINER_JS,
    SCROLL_STEP_JS, SCROLL_TO_TOP_JS,
};
use crate::scrape::scroll::{collect_reviews, FeedSurface, SessionState};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventResponseReceived, GetResponseBodyParams, Headers,
    SetBlockedUrLsParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Response URLs worth capturing for raw-payload correlation.
const REVIEW_FEED_ENDPOINTS: [&str; 3] = ["listugcposts", "review/listreviews", "/_/localreviewsui/"];

/// Non-essential traffic dropped when resource blocking is on.
const BLOCKED_URL_PATTERNS: [&str; 7] = [
    "*doubleclick.net*",
    "*googlesyndication.com*",
    "*google-analytics.com*",
    "*.woff",
    "*.woff2",
    "*.mp4",
    "*.webm",
];

const WINDOW_OPEN_GUARD_JS: &str = "window.open = function() { return null; };";

/// Clicks a consent interstitial away, preferring the reject variants.
const CONSENT_JS: &str = r#"
() => {
    const reject = [/reject all/i, /tout refuser/i, /alle ablehnen/i, /rechazar todo/i,
                    /rifiuta tutto/i, /отклонить все/i, /hepsini reddet/i, /afvis alle/i];
    const accept = [/accept all/i, /tout accepter/i, /alle akzeptieren/i, /aceptar todo/i,
                    /accetta tutto/i, /принять всё/i, /tümünü kabul et/i];
    const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    const clickMatching = pats => {
        for (const btn of document.querySelectorAll('button, [role="button"]')) {
            const label = (btn.innerText || btn.getAttribute('aria-label') || '').trim();
            if (visible(btn) && pats.some(p => p.test(label))) { btn.click(); return true; }
        }
        return false;
    };
    return clickMatching(reject) || clickMatching(accept);
}
"#;

const REVIEWS_VISIBLE_JS: &str = r#"
() => document.querySelectorAll('[role="dialog"] div[data-review-id], div[data-review-id]').length > 0
"#;

const CLICK_ALL_REVIEWS_JS: &str = r#"
() => {
    try { window.scrollTo(0, 0); } catch (e) {}
    const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    const byAction = document.querySelector('button[jsaction*="pane.review.moreReviews"]');
    if (byAction && visible(byAction)) { byAction.click(); return true; }
    const texts = [/^all reviews$/i, /^see all reviews$/i, /все отзывы/i, /tous les avis/i,
                   /alle bewertungen/i, /todas las (reseñas|opiniones)/i, /tutte le recensioni/i,
                   /todas as avaliações/i];
    for (const btn of document.querySelectorAll('button')) {
        const label = (btn.innerText || '').trim();
        if (visible(btn) && texts.some(p => p.test(label))) { btn.click(); return true; }
    }
    return false;
}
"#;

const CLICK_REVIEWS_TAB_JS: &str = r#"
() => {
    const pats = /reviews|отзыв|avis|bewert|reseñ|recensioni|opini[oó]es/i;
    const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    for (const tab of document.querySelectorAll('[role="tab"]')) {
        const label = (tab.innerText || tab.getAttribute('aria-label') || '').trim();
        if (visible(tab) && pats.test(label)) { tab.click(); return true; }
    }
    return false;
}
"#;

const CLICK_SORT_BUTTON_JS: &str = r#"
() => {
    const pats = /sort|сортировать|сорт|ordenar|trier/i;
    const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    for (const btn of document.querySelectorAll('button')) {
        const label = (btn.innerText || btn.getAttribute('aria-label') || '').trim();
        if (visible(btn) && pats.test(label)) { btn.click(); return true; }
    }
    return false;
}
"#;

const CLICK_NEWEST_ITEM_JS: &str = r#"
() => {
    const pats = /newest|новые|más recientes|les plus récentes/i;
    const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    for (const item of document.querySelectorAll('[role="menuitem"], [role="menuitemradio"]')) {
        const label = (item.innerText || '').trim();
        if (visible(item) && pats.test(label)) { item.click(); return true; }
    }
    return false;
}
"#;

const CLICK_TRANSLATE_JS: &str = r#"
() => {
    const pats = /translate reviews|translate to english|перевести отзывы|перевод отзывов|übersetzen|traducir|traduire/i;
    const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    for (const btn of document.querySelectorAll('button, [role="switch"]')) {
        const label = (btn.innerText || btn.getAttribute('aria-label') || '').trim();
        if (visible(btn) && pats.test(label)) { btn.click(); return true; }
    }
    return false;
}
"#;

/// Aria labels first, visible texts second, so the parser sees the more
/// reliable source before the noisy one.
const UI_TOTAL_STRINGS_JS: &str = r#"
() => {
    const root = document.querySelector('[role="dialog"]') || document;
    const nodes = Array.from(root.querySelectorAll('h1, h2, h3, [aria-label], [role="heading"], button, div, span')).slice(0, 1600);
    const arias = [];
    const texts = [];
    for (const el of nodes) {
        const aria = (el.getAttribute && el.getAttribute('aria-label')) || '';
        if (aria) arias.push(aria.trim());
        const t = (el.innerText || el.textContent || '').trim();
        if (t && t.length < 80) texts.push(t);
    }
    return arias.concat(texts);
}
"#;

const COORD_HREFS_JS: &str = r#"
() => Array.from(document.querySelectorAll('[href],[data-href],[aria-label]'))
    .map(el => el.getAttribute('href') || el.getAttribute('data-href') || el.getAttribute('aria-label') || '')
    .filter(Boolean)
    .slice(0, 400)
"#;

const PLACE_HEADER_JS: &str = r#"
() => {
    const text = el => el ? (el.innerText || el.textContent || '').trim() : '';
    let title = null;
    for (const sel of ['h1.DUwDvf', 'div.DUwDvf[role="heading"]', '[role="dialog"] h1[role="heading"]', 'h1[aria-level="1"]']) {
        const t = text(document.querySelector(sel));
        if (t) { title = t; break; }
    }
    const cid = document.querySelector('a[href^="https://maps.google.com/?cid="]');
    return { title: title, href: cid ? cid.getAttribute('href') : null, doc_title: document.title || '' };
}
"#;

fn ui_total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(\d{1,3}(?:[ .,]\d{3})*)\s*(?:google\s+)?(?:reviews?|отзыв(?:ов|а)?|avis|bewertungen|reseñ[ae]s|recensioni|avaliaç(?:ões|oes))\b",
        )
        .expect("invalid ui-total pattern")
    })
}

/// Picks the UI-advertised review total out of heading/label strings.
pub fn parse_ui_total(strings: &[String]) -> Option<u64> {
    for s in strings {
        if let Some(cap) = ui_total_re().captures(s) {
            let digits: String = cap[1].chars().filter(|c| c.is_ascii_digit()).collect();
            if let Ok(n) = digits.parse::<u64>() {
                if (1..=200_000).contains(&n) {
                    return Some(n);
                }
            }
        }
    }
    None
}

fn coord_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(-?\d+(?:\.\d+)?),\s*(-?\d+(?:\.\d+)?)").expect("invalid coord pattern"))
}

/// `@lat,lng` as embedded in maps URLs and aria labels.
pub fn parse_coords(s: &str) -> Option<(f64, f64)> {
    let cap = coord_re().captures(s)?;
    Some((cap[1].parse().ok()?, cap[2].parse().ok()?))
}

/// Strips the " - Google Maps" suffix off a document title.
pub fn clean_place_title(doc_title: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\s*-\s*Google Maps.*$").expect("invalid title pattern"));
    let t = re.replace(doc_title, "").trim().to_string();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

/// Wraps a `(arg) => {...}` snippet so chromiumoxide can evaluate it as a
/// zero-argument function with the argument inlined as a JSON literal.
fn call1(snippet: &str, arg: &str) -> String {
    let literal = serde_json::Value::String(arg.to_string());
    format!("() => {{ return ({snippet})({literal}); }}")
}

/// One browser session bound to one place. Owns the Chrome instance for its
/// whole lifetime and implements [`FeedSurface`] for the scroll controller.
pub struct PlaceSession {
    browser: Option<Browser>,
    page: Page,
    cfg: Config,
    raw_blobs: Arc<Mutex<Vec<String>>>,
}

impl PlaceSession {
    /// Launches an isolated Chrome, optionally tunneled through `proxy`.
    /// Launch is retried like any other flaky external process start.
    pub async fn launch(cfg: &Config, proxy: Option<&ProxyEndpoint>) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(1360, 900)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--lang={}", cfg.browser.language));

        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.server()));
        }
        if cfg.browser.headless {
            builder = builder.arg("--headless").arg("--disable-gpu");
        } else {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| AppError::Browser(format!("failed to build browser config: {e}")))?;

        let mut last_error = None;
        for attempt in 1..=3u64 {
            match Browser::launch(browser_config.clone()).await {
                Ok((browser, mut handler)) => {
                    tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                let msg = format!("{e:?}");
                                // Protocol deserialization chatter is not an error.
                                if !msg.contains("data did not match any variant") {
                                    debug!("browser handler error: {e}");
                                }
                            }
                        }
                    });

                    let page = browser
                        .new_page("about:blank")
                        .await
                        .map_err(|e| AppError::Browser(format!("failed to create page: {e}")))?;

                    let session = Self {
                        browser: Some(browser),
                        page,
                        cfg: cfg.clone(),
                        raw_blobs: Arc::new(Mutex::new(Vec::new())),
                    };
                    session.install_safeguards(proxy).await?;
                    return Ok(session);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < 3 {
                        warn!("browser launch attempt {attempt} failed, retrying");
                        tokio::time::sleep(Duration::from_millis(1000 * attempt)).await;
                    }
                }
            }
        }

        Err(AppError::Browser(format!(
            "failed to launch browser after 3 attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// New-window suppression, resource blocking, proxy credentials, and
    /// the review-payload capture task.
    async fn install_safeguards(&self, proxy: Option<&ProxyEndpoint>) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                WINDOW_OPEN_GUARD_JS.to_string(),
            ))
            .await
            .map_err(|e| AppError::Browser(format!("failed to install window guard: {e}")))?;

        self.page
            .execute(NetworkEnableParams::default())
            .await
            .map_err(|e| AppError::Browser(format!("failed to enable network domain: {e}")))?;

        if self.cfg.browser.block_resources {
            let urls = BLOCKED_URL_PATTERNS.iter().map(|s| s.to_string()).collect();
            self.page
                .execute(SetBlockedUrLsParams::new(urls))
                .await
                .map_err(|e| AppError::Browser(format!("failed to set blocked URLs: {e}")))?;
        }

        if let Some((user, pass)) = proxy.and_then(|p| p.credentials()) {
            let token =
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            let headers = Headers::new(serde_json::json!({
                "Proxy-Authorization": format!("Basic {token}")
            }));
            self.page
                .execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(|e| AppError::Browser(format!("failed to set proxy credentials: {e}")))?;
        }

        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| AppError::Browser(format!("failed to listen for responses: {e}")))?;
        let page = self.page.clone();
        let blobs = self.raw_blobs.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let url = event.response.url.to_lowercase();
                if !REVIEW_FEED_ENDPOINTS.iter().any(|k| url.contains(k)) {
                    continue;
                }
                let request = GetResponseBodyParams::new(event.request_id.clone());
                if let Ok(resp) = page.execute(request).await {
                    let body = if resp.result.base64_encoded {
                        base64::engine::general_purpose::STANDARD
                            .decode(resp.result.body.as_bytes())
                            .map(|b| String::from_utf8_lossy(&b).into_owned())
                            .unwrap_or_default()
                    } else {
                        resp.result.body.clone()
                    };
                    if !body.is_empty() {
                        let mut guard = blobs.lock().await;
                        guard.push(body);
                        // Only recent payloads are worth correlating.
                        if guard.len() > 64 {
                            guard.remove(0);
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn eval_value(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| AppError::Browser(format!("script evaluation failed: {e}")))?;
        result
            .into_value::<serde_json::Value>()
            .map_err(|e| AppError::Browser(format!("script result unreadable: {e}")))
    }

    async fn eval_best_effort(&self, script: &str) -> Option<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .ok()?
            .into_value::<serde_json::Value>()
            .ok()
    }

    async fn eval_bool(&self, script: &str) -> bool {
        self.eval_best_effort(script)
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    async fn settle_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Opens the place page, with retries and tunnel-failure classification.
    async fn navigate(&self, place: &Place) -> Result<()> {
        let base = place.resolve_url();
        let sep = if base.contains('?') { '&' } else { '?' };
        let url = format!("{base}{sep}hl={}", self.cfg.browser.language);
        let nav_timeout = Duration::from_millis(self.cfg.browser.nav_timeout_ms);

        let mut last_err = String::new();
        for attempt in 1..=3u64 {
            let nav = tokio::time::timeout(nav_timeout, async {
                self.page.goto(url.as_str()).await?;
                self.page.wait_for_navigation().await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            })
            .await;

            match nav {
                Ok(Ok(())) => {
                    debug!(%url, "navigation complete");
                    self.settle_ms(500).await;
                    if self.eval_bool(CONSENT_JS).await {
                        debug!("consent interstitial dismissed");
                        self.settle_ms(250).await;
                    }
                    self.close_stray_pages().await;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    let msg = e.to_string();
                    if is_tunnel_error(&msg) {
                        return Err(AppError::ProxyTunnel(msg));
                    }
                    last_err = msg;
                }
                Err(_) => {
                    last_err = format!("navigation timed out after {}ms", nav_timeout.as_millis());
                }
            }

            warn!(%url, attempt, "navigation attempt failed: {last_err}");
            let jitter = rand::thread_rng().gen_range(0..300u64);
            tokio::time::sleep(Duration::from_millis(700 * attempt + jitter)).await;
        }

        Err(AppError::Navigation(format!("failed to open {url}: {last_err}")))
    }

    /// Popups routed through flaky proxies occasionally land on non-Google
    /// hosts; close everything that is not part of the surface under test.
    async fn close_stray_pages(&self) {
        let Some(browser) = self.browser.as_ref() else { return };
        let Ok(pages) = browser.pages().await else { return };
        for p in pages {
            if p.target_id() == self.page.target_id() {
                continue;
            }
            let host = match p.url().await {
                Ok(Some(u)) => Url::parse(&u)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            let allowed = host.contains("google.") || host.ends_with("gstatic.com");
            if !allowed {
                debug!(%host, "closing stray page");
                let _ = p.close().await;
            }
        }
    }

    async fn reviews_visible(&self) -> bool {
        self.eval_bool(REVIEWS_VISIBLE_JS).await
    }

    async fn try_open_reviews(&self) -> bool {
        if self.reviews_visible().await {
            return true;
        }
        if self.eval_bool(CLICK_ALL_REVIEWS_JS).await {
            let budget = self.cfg.browser.nav_timeout_ms.min(9_000);
            let deadline = Instant::now() + Duration::from_millis(budget);
            while Instant::now() < deadline {
                if self.reviews_visible().await {
                    return true;
                }
                self.settle_ms(150).await;
            }
        }
        false
    }

    /// Forces the full review surface open: direct click, reviews-tab
    /// fallback, scroll-and-retry fallback, bounded attempts.
    async fn open_review_surface(&self) -> Result<()> {
        for _ in 0..3 {
            if self.try_open_reviews().await {
                return Ok(());
            }
            if self.eval_bool(CLICK_REVIEWS_TAB_JS).await {
                self.settle_ms(300).await;
                if self.try_open_reviews().await {
                    return Ok(());
                }
            }
            let _ = self
                .eval_best_effort("() => { window.scrollBy(0, 400); return true; }")
                .await;
            self.settle_ms(300).await;
        }
        // A degraded side panel can still expose cards without the dialog.
        if self.reviews_visible().await {
            return Ok(());
        }
        Err(AppError::UiDesync("review surface never opened".into()))
    }

    async fn toggle_translate(&self) {
        if self.eval_bool(CLICK_TRANSLATE_JS).await {
            self.settle_ms(400).await;
        }
    }

    async fn ui_total(&self) -> Option<u64> {
        let v = self.eval_best_effort(UI_TOTAL_STRINGS_JS).await?;
        let strings: Vec<String> = serde_json::from_value(v).ok()?;
        parse_ui_total(&strings)
    }

    async fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        if let Ok(Some(url)) = self.page.url().await {
            if let Some((lat, lng)) = parse_coords(&url) {
                return (Some(lat), Some(lng));
            }
        }
        if let Some(v) = self.eval_best_effort(COORD_HREFS_JS).await {
            if let Ok(hrefs) = serde_json::from_value::<Vec<String>>(v) {
                for href in hrefs {
                    if let Some((lat, lng)) = parse_coords(&href) {
                        return (Some(lat), Some(lng));
                    }
                }
            }
        }
        (None, None)
    }

    async fn place_header(&self) -> (Option<String>, Option<String>) {
        let Some(v) = self.eval_best_effort(PLACE_HEADER_JS).await else {
            return (None, None);
        };
        let title = v
            .get("title")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .or_else(|| {
                v.get("doc_title")
                    .and_then(|t| t.as_str())
                    .and_then(clean_place_title)
            });
        let href = v
            .get("href")
            .and_then(|h| h.as_str())
            .map(|h| h.to_string());
        (title, href)
    }

    /// Full place run: open the review surface, acquire the feed container,
    /// drive the scroll controller, and package the outcome.
    pub async fn run(&mut self, place: &Place) -> Result<PlaceScrape> {
        self.navigate(place).await?;
        self.open_review_surface().await?;
        if self.cfg.browser.translate_reviews {
            self.toggle_translate().await;
        }
        self.apply_newest_sort().await;

        let (place_title_ui, place_url_ui) = self.place_header().await;
        let ui_total = self.ui_total().await;
        debug!(?ui_total, ?place_title_ui, "review surface ready");
        let (lat, lng) = self.coordinates().await;

        let mut container = self.locate_container().await?;
        if container.is_none() {
            // The dialog may still be settling; one cheap relocate.
            self.settle_ms(500).await;
            container = self.locate_container().await?;
        }
        let Some(container) = container else {
            return Err(AppError::UiDesync("no scrollable review container found".into()));
        };
        let _ = self
            .eval_best_effort(&call1(SCROLL_TO_TOP_JS, &container.guid))
            .await;

        let scroll_cfg = self.cfg.scroll.clone();
        let mut state = SessionState::new(container, ui_total);
        let (reviews, stop_reason) = collect_reviews(self, &mut state, &scroll_cfg).await?;

        Ok(PlaceScrape {
            place_title_ui,
            place_url_ui,
            lat,
            lng,
            ui_total,
            stop_reason,
            reviews,
        })
    }

    /// Tears the browser down. Failures are logged, never raised; the
    /// session is over either way.
    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("browser close failed: {e}");
            }
        }
    }
}

impl Drop for PlaceSession {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            tokio::spawn(async move {
                let _ = browser.close().await;
            });
        }
    }
}

#[async_trait]
impl FeedSurface for PlaceSession {
    async fn visible_review_ids(&mut self) -> Result<Vec<String>> {
        let v = self.eval_value(VISIBLE_IDS_JS).await?;
        Ok(serde_json::from_value(v)?)
    }

    async fn extract_card(&mut self, review_id: &str) -> Result<Review> {
        let v = self.eval_value(&call1(CARD_SNAPSHOT_JS, review_id)).await?;
        if v.is_null() {
            return Err(AppError::UiDesync(format!("card {review_id} not in DOM")));
        }
        let raw: RawCard = serde_json::from_value(v)?;
        let mut review = build_review(review_id, &raw, Utc::now());
        let blobs = self.raw_blobs.lock().await;
        review.raw_payload = match_raw_payload(
            review_id,
            review.text.as_deref(),
            review.author.as_deref(),
            &blobs,
        );
        Ok(review)
    }

    async fn locate_container(&mut self) -> Result<Option<ContainerHandle>> {
        let v = self.eval_value(LOCATE_CONTAINER_JS).await?;
        if v.is_null() {
            return Ok(None);
        }
        let located: LocatedContainer = serde_json::from_value(v)?;
        Ok(Some(located.handle()))
    }

    async fn reopen_reviews(&mut self) -> Result<bool> {
        let clicked = self.eval_bool(CLICK_ALL_REVIEWS_JS).await;
        if clicked {
            self.settle_ms(600).await;
        }
        Ok(clicked)
    }

    async fn apply_newest_sort(&mut self) {
        if self.eval_bool(CLICK_SORT_BUTTON_JS).await {
            self.settle_ms(260).await;
            if self.eval_bool(CLICK_NEWEST_ITEM_JS).await {
                self.settle_ms(380).await;
            }
        }
    }

    async fn scroll_step(&mut self, container: &ContainerHandle) -> Result<()> {
        let moved = self.eval_bool(&call1(SCROLL_STEP_JS, &container.guid)).await;
        if !moved {
            debug!(guid = %container.guid, "scroll target unreachable");
        }
        Ok(())
    }

    async fn scroll_metrics(&mut self, container: &ContainerHandle) -> Result<ScrollMetrics> {
        match self.eval_best_effort(&call1(CONTAINER_METRICS_JS, &container.guid)).await {
            Some(v) if !v.is_null() => Ok(serde_json::from_value(v)?),
            _ => Ok(ScrollMetrics::MISSING),
        }
    }

    async fn settle(&mut self, ms: u64) {
        self.settle_ms(ms).await;
    }
}

/// Scrapes one place end to end: launch, run, unconditional teardown.
pub async fn scrape_place_reviews(
    place: &Place,
    proxy: Option<&ProxyEndpoint>,
    config: &Config,
) -> Result<PlaceScrape> {
    let mut session = PlaceSession::launch(config, proxy).await?;
    let outcome = session.run(place).await;
    session.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ui_total_languages_and_separators() {
        let strings = vec![
            "Overview".to_string(),
            "4.6 stars".to_string(),
            "1,234 reviews".to_string(),
        ];
        assert_eq!(parse_ui_total(&strings), Some(1_234));

        assert_eq!(parse_ui_total(&["524 отзыва".to_string()]), Some(524));
        assert_eq!(parse_ui_total(&["1 024 avis".to_string()]), Some(1_024));
        assert_eq!(parse_ui_total(&["87 Google reviews".to_string()]), Some(87));
    }

    #[test]
    fn test_parse_ui_total_rejects_noise() {
        assert_eq!(parse_ui_total(&["reviews".to_string()]), None);
        assert_eq!(parse_ui_total(&["0 reviews".to_string()]), None);
        // A rating is not a count.
        assert_eq!(parse_ui_total(&["4.6".to_string()]), None);
        assert_eq!(parse_ui_total(&[]), None);
    }

    #[test]
    fn test_parse_coords_from_url() {
        let url = "https://www.google.com/maps/place/Cafe+X/@41.3851,2.1734,17z/data=!3m1";
        assert_eq!(parse_coords(url), Some((41.3851, 2.1734)));
        assert_eq!(parse_coords("https://maps.google.com/?cid=42"), None);
    }

    #[test]
    fn test_clean_place_title() {
        assert_eq!(
            clean_place_title("Cafe X - Google Maps").as_deref(),
            Some("Cafe X")
        );
        assert_eq!(clean_place_title(" - Google Maps"), None);
        assert_eq!(clean_place_title("Cafe X").as_deref(), Some("Cafe X"));
    }

    #[test]
    fn test_call1_quotes_arguments() {
        let js = call1("(rid) => rid", r#"abc"def"#);
        assert!(js.contains(r#""abc\"def""#));
    }
}
