use crate::config::ScrollConfig;
use crate::error::Result;
use crate::models::{Review, StopReason};
use crate::scrape::container::{ContainerHandle, ScrollMetrics};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything the scroll controller needs from the live page. The session
/// implements this over CDP; tests drive the state machine with a scripted
/// fake instead of a browser.
#[async_trait]
pub trait FeedSurface {
    /// Review ids currently rendered in the feed.
    async fn visible_review_ids(&mut self) -> Result<Vec<String>>;

    /// Snapshot and resolve one card. Card-level failures are the caller's
    /// to tolerate; they never abort the batch.
    async fn extract_card(&mut self, review_id: &str) -> Result<Review>;

    /// Re-run the container locator. `None` means nothing currently passes
    /// the scrollable threshold (retryable).
    async fn locate_container(&mut self) -> Result<Option<ContainerHandle>>;

    /// Re-trigger the "all reviews" opener. Returns whether the surface
    /// responded at all.
    async fn reopen_reviews(&mut self) -> Result<bool>;

    /// Best-effort newest-first sort; failures are swallowed by the impl.
    async fn apply_newest_sort(&mut self);

    async fn scroll_step(&mut self, container: &ContainerHandle) -> Result<()>;

    async fn scroll_metrics(&mut self, container: &ContainerHandle) -> Result<ScrollMetrics>;

    async fn settle(&mut self, ms: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scanning,
    Scrolling,
    Rebinding,
    Terminated(StopReason),
}

/// Transient per-session state, owned by exactly one orchestrator
/// invocation. The seen-id set only ever grows.
#[derive(Debug)]
pub struct SessionState {
    pub container: ContainerHandle,
    pub phase: Phase,
    pub seen: HashSet<String>,
    pub idle_rounds: u32,
    pub no_new_rounds: u32,
    pub rounds: u32,
    pub first_rebounce_done: bool,
    pub second_rebounce_done: bool,
    pub started_at: Instant,
    pub last_progress_at: Instant,
    pub ui_total: Option<u64>,
    prev_metrics: Option<ScrollMetrics>,
}

impl SessionState {
    pub fn new(container: ContainerHandle, ui_total: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            container,
            phase: Phase::Scanning,
            seen: HashSet::new(),
            idle_rounds: 0,
            no_new_rounds: 0,
            rounds: 0,
            first_rebounce_done: false,
            second_rebounce_done: false,
            started_at: now,
            last_progress_at: now,
            ui_total,
            prev_metrics: None,
        }
    }

    fn target_reached(&self, cfg: &ScrollConfig) -> bool {
        let n = self.seen.len() as u64;
        if cfg.max_reviews_per_place > 0 && n >= cfg.max_reviews_per_place {
            return true;
        }
        if let Some(total) = self.ui_total {
            return n >= total.saturating_sub(cfg.ui_lag_tolerance);
        }
        false
    }

    fn stop_reason(&self, cfg: &ScrollConfig) -> Option<StopReason> {
        if self.idle_rounds >= cfg.idle_rounds {
            return Some(StopReason::IdleExhausted);
        }
        if self.rounds >= cfg.max_scroll_rounds {
            return Some(StopReason::RoundLimit);
        }
        if self.target_reached(cfg) {
            return Some(StopReason::TargetReached);
        }
        if self.started_at.elapsed() >= Duration::from_secs(cfg.place_hard_timeout_secs) {
            return Some(StopReason::HardBudget);
        }
        if self.last_progress_at.elapsed() >= Duration::from_secs(cfg.no_progress_max_secs) {
            return Some(StopReason::NoProgressBudget);
        }
        None
    }

    fn adopt_container(&mut self, container: ContainerHandle) {
        self.container = container;
        self.idle_rounds = 0;
        self.prev_metrics = None;
    }
}

/// Re-click the review opener and, if the locator then hands back a
/// container, switch to it and reset the stall counters. Bounded by the
/// two rebounce flags in [`SessionState`]; each is burned on the attempt,
/// successful or not.
async fn rebounce<S: FeedSurface + ?Sized>(surface: &mut S, state: &mut SessionState) {
    match surface.reopen_reviews().await {
        Ok(true) => {
            if let Ok(Some(container)) = surface.locate_container().await {
                debug!(guid = %container.guid, "rebounce: adopting container");
                state.adopt_container(container);
                state.no_new_rounds = 0;
                surface.apply_newest_sort().await;
            }
        }
        Ok(false) => debug!("rebounce: opener not found"),
        Err(e) => warn!("rebounce failed: {e}"),
    }
}

/// Drives the feed to exhaustion: scan newly rendered ids, extract them,
/// scroll one viewport, and decide between another scan, a container
/// rebind, or termination. Every exit path returns whatever was collected.
pub async fn collect_reviews<S: FeedSurface + ?Sized>(
    surface: &mut S,
    state: &mut SessionState,
    cfg: &ScrollConfig,
) -> Result<(Vec<Review>, StopReason)> {
    let mut out: Vec<Review> = Vec::new();

    loop {
        if let Some(reason) = state.stop_reason(cfg) {
            state.phase = Phase::Terminated(reason);
            debug!(
                rounds = state.rounds,
                collected = out.len(),
                ui_total = ?state.ui_total,
                "scroll loop terminated: {reason:?}"
            );
            return Ok((out, reason));
        }

        state.phase = Phase::Scanning;
        let visible = surface.visible_review_ids().await?;
        let new_ids: Vec<String> = visible
            .into_iter()
            .filter(|id| !state.seen.contains(id))
            .collect();
        if new_ids.is_empty() {
            state.no_new_rounds += 1;
        } else {
            state.no_new_rounds = 0;
        }

        // First stall-recovery window: the dialog sometimes opens degraded
        // and renders only a handful of cards.
        if !state.first_rebounce_done
            && state.rounds >= 2
            && (state.seen.len() as u64) < cfg.min_plateau_count
        {
            state.first_rebounce_done = true;
            rebounce(surface, state).await;
        }

        let mut appended = 0usize;
        for rid in &new_ids {
            match surface.extract_card(rid).await {
                Ok(review) => {
                    out.push(review);
                    state.seen.insert(rid.clone());
                    state.last_progress_at = Instant::now();
                    appended += 1;
                    if cfg.max_reviews_per_place > 0
                        && state.seen.len() as u64 >= cfg.max_reviews_per_place
                    {
                        break;
                    }
                }
                Err(e) => {
                    // Card-level failure: skip the card, keep the batch.
                    warn!(review_id = %rid, "card extraction failed: {e}");
                }
            }
        }

        state.phase = Phase::Scrolling;
        surface.scroll_step(&state.container).await?;
        surface.settle(cfg.scroll_pause_ms).await;

        let metrics = surface.scroll_metrics(&state.container).await?;
        let no_growth = state.prev_metrics == Some(metrics);
        state.prev_metrics = Some(metrics);
        let ids_grew = !new_ids.is_empty();

        if state.ui_total.is_none() && (state.seen.len() as u64) < cfg.min_plateau_count {
            // Still warming up on a slow feed; do not count idleness yet.
            state.idle_rounds = 0;
        } else if !ids_grew && no_growth {
            state.idle_rounds += 1;
        } else {
            state.idle_rounds = 0;
        }

        if !ids_grew && no_growth && appended == 0 {
            state.phase = Phase::Rebinding;
            if let Some(container) = surface.locate_container().await? {
                if container.guid != state.container.guid {
                    debug!(guid = %container.guid, "rebinding to a new container");
                    state.adopt_container(container);
                    surface.apply_newest_sort().await;
                }
            }
        }

        // Second stall-recovery window, after a run of fruitless scans.
        if !state.second_rebounce_done
            && state.no_new_rounds >= 3
            && (state.seen.len() as u64) < cfg.min_plateau_count
        {
            state.second_rebounce_done = true;
            rebounce(surface, state).await;
        }

        state.rounds += 1;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Scripted stand-in for a live feed: each scroll round advances an
    /// iteration index into pre-baked id lists and scroll metrics.
    pub struct FakeFeed {
        pub id_rounds: Vec<Vec<&'static str>>,
        pub metric_rounds: Vec<ScrollMetrics>,
        pub round: usize,
        pub containers: Vec<ContainerHandle>,
        pub locate_calls: usize,
        pub reopen_calls: usize,
        pub extract_calls: Vec<String>,
        pub fail_extraction_of: Option<&'static str>,
        /// Honor the settle delay for real, so wall-clock budgets can elapse.
        pub real_settle: bool,
    }

    impl FakeFeed {
        pub fn new(id_rounds: Vec<Vec<&'static str>>, metric_rounds: Vec<ScrollMetrics>) -> Self {
            Self {
                id_rounds,
                metric_rounds,
                round: 0,
                containers: vec![ContainerHandle { guid: "c0".into() }],
                locate_calls: 0,
                reopen_calls: 0,
                extract_calls: Vec::new(),
                fail_extraction_of: None,
                real_settle: false,
            }
        }

        fn current<'a, T>(&self, rounds: &'a [T]) -> &'a T {
            let idx = self.round.min(rounds.len() - 1);
            &rounds[idx]
        }
    }

    #[async_trait]
    impl FeedSurface for FakeFeed {
        async fn visible_review_ids(&mut self) -> Result<Vec<String>> {
            Ok(self
                .current(&self.id_rounds)
                .iter()
                .map(|s| s.to_string())
                .collect())
        }

        async fn extract_card(&mut self, review_id: &str) -> Result<Review> {
            self.extract_calls.push(review_id.to_string());
            if self.fail_extraction_of == Some(review_id) {
                return Err(crate::error::AppError::UiDesync("card vanished".into()));
            }
            Ok(Review::empty(review_id))
        }

        async fn locate_container(&mut self) -> Result<Option<ContainerHandle>> {
            self.locate_calls += 1;
            let idx = (self.locate_calls - 1).min(self.containers.len() - 1);
            Ok(Some(self.containers[idx].clone()))
        }

        async fn reopen_reviews(&mut self) -> Result<bool> {
            self.reopen_calls += 1;
            Ok(true)
        }

        async fn apply_newest_sort(&mut self) {}

        async fn scroll_step(&mut self, _container: &ContainerHandle) -> Result<()> {
            Ok(())
        }

        async fn scroll_metrics(&mut self, _container: &ContainerHandle) -> Result<ScrollMetrics> {
            let m = *self.current(&self.metric_rounds);
            self.round += 1;
            Ok(m)
        }

        async fn settle(&mut self, ms: u64) {
            if self.real_settle {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
    }

    pub fn test_cfg() -> ScrollConfig {
        ScrollConfig {
            scroll_pause_ms: 0,
            idle_rounds: 3,
            max_scroll_rounds: 100,
            max_reviews_per_place: 0,
            min_plateau_count: 0,
            ui_lag_tolerance: 0,
            place_hard_timeout_secs: 600,
            no_progress_max_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{test_cfg, FakeFeed};
    use super::*;

    fn start_state(feed: &FakeFeed, ui_total: Option<u64>) -> SessionState {
        SessionState::new(feed.containers[0].clone(), ui_total)
    }

    #[tokio::test]
    async fn test_duplicate_ids_extracted_once() {
        let mut feed = FakeFeed::new(
            vec![vec!["r1", "r2"], vec!["r1", "r2", "r3"], vec!["r1", "r2", "r3"]],
            vec![
                ScrollMetrics { top: 0, extent: 1000 },
                ScrollMetrics { top: 700, extent: 1000 },
                ScrollMetrics { top: 700, extent: 1000 },
            ],
        );
        let mut state = start_state(&feed, None);
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &test_cfg())
            .await
            .unwrap();

        assert_eq!(reviews.len(), 3);
        assert_eq!(feed.extract_calls, vec!["r1", "r2", "r3"]);
        assert!(reviews.iter().all(|r| !r.review_id.is_empty()));
        // The feed stops growing, so the session drains via idle
        // exhaustion rather than any wall-clock budget.
        assert_eq!(reason, StopReason::IdleExhausted);
        assert_eq!(state.phase, Phase::Terminated(StopReason::IdleExhausted));
    }

    #[tokio::test]
    async fn test_idle_terminates_after_exact_threshold() {
        // Frozen metrics and a static id list: the first round extracts and
        // resets nothing; each following round increments idle once.
        let mut feed = FakeFeed::new(
            vec![vec!["r1"]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        let mut state = start_state(&feed, None);
        let cfg = test_cfg();
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &cfg)
            .await
            .unwrap();

        assert_eq!(reviews.len(), 1);
        assert_eq!(reason, StopReason::IdleExhausted);
        assert_eq!(state.idle_rounds, cfg.idle_rounds);
        // Round 0 scans+extracts, rounds 1..=3 are the idle run.
        assert_eq!(state.rounds, 1 + cfg.idle_rounds);
    }

    #[tokio::test]
    async fn test_target_reached_respects_ui_lag_tolerance() {
        let mut feed = FakeFeed::new(
            vec![
                vec!["r1", "r2", "r3"],
                vec!["r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8"],
            ],
            vec![
                ScrollMetrics { top: 0, extent: 1000 },
                ScrollMetrics { top: 700, extent: 2000 },
            ],
        );
        let mut state = start_state(&feed, Some(10));
        let mut cfg = test_cfg();
        cfg.ui_lag_tolerance = 2;
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &cfg)
            .await
            .unwrap();

        // Stops once seen >= 10 - 2, never collecting past the advertised
        // total plus the tolerance window.
        assert_eq!(reason, StopReason::TargetReached);
        assert_eq!(reviews.len(), 8);
    }

    #[tokio::test]
    async fn test_max_reviews_cap() {
        let mut feed = FakeFeed::new(
            vec![vec!["r1", "r2", "r3", "r4"]],
            vec![ScrollMetrics { top: 0, extent: 1000 }],
        );
        let mut state = start_state(&feed, None);
        let mut cfg = test_cfg();
        cfg.max_reviews_per_place = 2;
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &cfg)
            .await
            .unwrap();

        assert_eq!(reason, StopReason::TargetReached);
        assert_eq!(reviews.len(), 2);
    }

    #[tokio::test]
    async fn test_rebind_resets_idle_counter() {
        // One productive round, then a frozen feed; the locator starts
        // handing back a different container, which must zero the idle
        // counter on the same iteration before idle can reach 2.
        let mut feed = FakeFeed::new(
            vec![vec!["r1"]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        feed.containers = vec![
            ContainerHandle { guid: "c0".into() },
            ContainerHandle { guid: "c1".into() },
        ];
        let mut state = start_state(&feed, None);
        let mut cfg = test_cfg();
        cfg.idle_rounds = 2;
        let (_, reason) = collect_reviews(&mut feed, &mut state, &cfg).await.unwrap();

        assert_eq!(reason, StopReason::IdleExhausted);
        assert_eq!(state.container.guid, "c1");
        assert!(feed.locate_calls > 0);
        // Idle had to restart from zero after the rebind, so more rounds ran
        // than the bare threshold.
        assert!(state.rounds > 1 + cfg.idle_rounds);
    }

    #[tokio::test]
    async fn test_warmup_suppresses_idle_until_plateau() {
        let mut feed = FakeFeed::new(
            vec![vec!["r1"]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        let mut state = start_state(&feed, None);
        let mut cfg = test_cfg();
        cfg.min_plateau_count = 5;
        cfg.max_scroll_rounds = 10;
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &cfg)
            .await
            .unwrap();

        // With the total unknown and the count below plateau, idle resets
        // are suppressed; only the round cap can end this session.
        assert_eq!(reason, StopReason::RoundLimit);
        assert_eq!(reviews.len(), 1);
    }

    #[tokio::test]
    async fn test_rebounce_attempted_at_most_twice() {
        let mut feed = FakeFeed::new(
            vec![vec![]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        let mut state = start_state(&feed, None);
        let mut cfg = test_cfg();
        cfg.min_plateau_count = 20;
        cfg.max_scroll_rounds = 30;
        let (_, reason) = collect_reviews(&mut feed, &mut state, &cfg).await.unwrap();

        assert_eq!(reason, StopReason::RoundLimit);
        assert_eq!(feed.reopen_calls, 2);
        assert!(state.first_rebounce_done && state.second_rebounce_done);
    }

    #[tokio::test]
    async fn test_hard_budget_returns_collected_reviews() {
        // One productive scan, then a frozen feed. Idle is set high enough
        // that only the wall-clock budget can end the session; two real
        // 600ms settles push elapsed time past the 1s budget.
        let mut feed = FakeFeed::new(
            vec![vec!["r1"]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        feed.real_settle = true;
        let mut state = start_state(&feed, None);
        let mut cfg = test_cfg();
        cfg.scroll_pause_ms = 600;
        cfg.idle_rounds = 10;
        cfg.place_hard_timeout_secs = 1;
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &cfg)
            .await
            .unwrap();

        assert_eq!(reason, StopReason::HardBudget);
        assert_eq!(reviews.len(), 1);
        assert_eq!(state.phase, Phase::Terminated(StopReason::HardBudget));
    }

    #[tokio::test]
    async fn test_no_progress_budget_returns_collected_reviews() {
        // Progress stamps on the first extraction, then nothing new ever
        // renders; the no-progress clock runs out before idle or the hard
        // budget can.
        let mut feed = FakeFeed::new(
            vec![vec!["r1"]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        feed.real_settle = true;
        let mut state = start_state(&feed, None);
        let mut cfg = test_cfg();
        cfg.scroll_pause_ms = 600;
        cfg.idle_rounds = 10;
        cfg.no_progress_max_secs = 1;
        let (reviews, reason) = collect_reviews(&mut feed, &mut state, &cfg)
            .await
            .unwrap();

        assert_eq!(reason, StopReason::NoProgressBudget);
        assert_eq!(reviews.len(), 1);
        assert_eq!(state.phase, Phase::Terminated(StopReason::NoProgressBudget));
    }

    #[tokio::test]
    async fn test_failed_card_does_not_poison_batch() {
        let mut feed = FakeFeed::new(
            vec![vec!["r1", "r2", "r3"]],
            vec![ScrollMetrics { top: 0, extent: 500 }],
        );
        feed.fail_extraction_of = Some("r2");
        let mut state = start_state(&feed, None);
        let (reviews, _) = collect_reviews(&mut feed, &mut state, &test_cfg())
            .await
            .unwrap();

        let ids: Vec<_> = reviews.iter().map(|r| r.review_id.as_str()).collect();
        assert!(ids.contains(&"r1") && ids.contains(&"r3"));
        assert!(!state.seen.contains("r2"));
    }
}
