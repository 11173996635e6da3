use serde::{Deserialize, Serialize};

/// Identity of the scrollable feed container currently driven by the
/// controller. The guid is minted in-page the first time the locator sees
/// an element, so re-finding the same node yields the same guid while a
/// rebuilt feed yields a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub guid: String,
}

/// Scroll position and extent snapshot used for stall detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub top: i64,
    pub extent: i64,
}

impl ScrollMetrics {
    /// Sentinel for "element currently unreachable"; two misses in a row
    /// read as frozen, which routes the controller into rebinding.
    pub const MISSING: ScrollMetrics = ScrollMetrics { top: -1, extent: -1 };
}

/// Raw locator result as returned by [`LOCATE_CONTAINER_JS`].
#[derive(Debug, Clone, Deserialize)]
pub struct LocatedContainer {
    pub guid: String,
    pub top: i64,
    pub extent: i64,
}

impl LocatedContainer {
    pub fn handle(&self) -> ContainerHandle {
        ContainerHandle {
            guid: self.guid.clone(),
        }
    }
}

/// Finds the scrollable ancestor hosting the live review cards and tags it
/// with a guid. Search order: dialog root before document; `[role="feed"]`
/// live region; ancestor walk from a review card; largest scrollable region
/// containing a card; largest scrollable region at all. A node only counts
/// as scrollable when its hidden extent exceeds 40px and overflow permits
/// scrolling. Pure query apart from the guid tag, safe to re-run.
pub const LOCATE_CONTAINER_JS: &str = r#"
() => {
    const THRESHOLD = 40;
    const sv = v => v === 'auto' || v === 'scroll';
    const isVisible = el => !!(el && (el.offsetWidth || el.offsetHeight || el.getClientRects().length));
    const scrollable = el => {
        if (!el) return false;
        const cs = getComputedStyle(el);
        return ((el.scrollHeight - el.clientHeight) > THRESHOLD) && (sv(cs.overflowY) || sv(cs.overflow));
    };
    const tag = el => {
        window.__prContainers = window.__prContainers || {};
        if (!el.__prGuid) {
            el.__prGuid = Math.random().toString(36).slice(2);
        }
        window.__prContainers[el.__prGuid] = el;
        return { guid: el.__prGuid, top: el.scrollTop, extent: el.scrollHeight };
    };

    const dlg = document.querySelector('[role="dialog"]');
    const root = (dlg && isVisible(dlg)) ? dlg : document;

    const feed = root.querySelector('[role="feed"]');
    if (feed && isVisible(feed) && scrollable(feed)) return tag(feed);

    const card = root.querySelector('div[data-review-id]');
    if (card) {
        let n = card;
        while (n && root.contains(n)) {
            if (scrollable(n)) return tag(n);
            n = n.parentElement;
        }
    }

    const candidates = withCards => Array.from(root.querySelectorAll('div,section,main,article'))
        .filter(el => {
            if (!isVisible(el) || !scrollable(el)) return false;
            return !withCards || el.querySelector('div[data-review-id]') !== null;
        })
        .sort((a, b) => (b.scrollHeight - b.clientHeight) - (a.scrollHeight - a.clientHeight));

    const withCard = candidates(true);
    if (withCard.length > 0) return tag(withCard[0]);

    const any = candidates(false);
    if (any.length > 0) return tag(any[0]);

    return null;
}
"#;

/// Reads scrollTop/scrollHeight of a previously tagged container. Returns
/// null when the guid no longer resolves (detached node).
pub const CONTAINER_METRICS_JS: &str = r#"
(guid) => {
    const el = window.__prContainers && window.__prContainers[guid];
    if (!el || !el.isConnected) return null;
    return { top: el.scrollTop, extent: el.scrollHeight };
}
"#;

/// Advances the tagged container by at least one viewport height, then nudges
/// the keyboard scroll paths the virtualized feed also listens to.
pub const SCROLL_STEP_JS: &str = r#"
(guid) => {
    const el = window.__prContainers && window.__prContainers[guid];
    if (!el || !el.isConnected) return false;
    try { document.activeElement && document.activeElement.blur(); } catch (e) {}
    try { el.scrollTo(0, el.scrollTop + Math.max(700, el.clientHeight)); } catch (e) {}
    return true;
}
"#;

/// Resets a tagged container to the top; used once after acquisition so the
/// first scan starts from the head of the feed.
pub const SCROLL_TO_TOP_JS: &str = r#"
(guid) => {
    const el = window.__prContainers && window.__prContainers[guid];
    if (!el || !el.isConnected) return false;
    try { el.scrollTo(0, 0); } catch (e) {}
    return true;
}
"#;
