use serde::{Deserialize, Serialize};

/// Runtime configuration, built once in `main` and passed by reference into
/// the session orchestrator and the scroll controller. Environment variables
/// provide the defaults; CLI flags override a handful of them afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub browser: BrowserConfig,
    pub scroll: ScrollConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// UI locale appended to place URLs as `hl=` and passed to Chrome.
    pub language: String,
    pub headless: bool,
    /// Per-navigation timeout in milliseconds.
    pub nav_timeout_ms: u64,
    /// Block fonts/media/ad hosts to speed up feed loading.
    pub block_resources: bool,
    /// Best-effort click on the "translate reviews" switch.
    pub translate_reviews: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Settle delay after each scroll step, milliseconds.
    pub scroll_pause_ms: u64,
    /// Consecutive frozen iterations before the controller gives up.
    pub idle_rounds: u32,
    /// Hard cap on scroll iterations per session.
    pub max_scroll_rounds: u32,
    /// Per-place record cap; 0 means unbounded.
    pub max_reviews_per_place: u64,
    /// Below this count stall-recovery may re-open the review dialog and
    /// idle counting is suppressed while the UI total is unknown.
    pub min_plateau_count: u64,
    /// The UI-advertised total routinely overshoots what the feed actually
    /// renders; stop this many short of it.
    pub ui_lag_tolerance: u64,
    /// Wall-clock budget for one whole place session, seconds.
    pub place_hard_timeout_secs: u64,
    /// Give up after this many seconds without a newly extracted record.
    pub no_progress_max_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Full session retries per place before it is reported as failed.
    pub retries_per_place: u32,
    /// Continue without a proxy when the worker's proxy fails its probe.
    pub fallback_no_proxy: bool,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser: BrowserConfig {
                language: std::env::var("REVIEW_LANGUAGE")
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "en".to_string()),
                headless: env_flag("HEADLESS", false),
                nav_timeout_ms: env_parse("NAV_TIMEOUT_MS", 45_000),
                block_resources: env_flag("BLOCK_RESOURCES", true),
                translate_reviews: env_flag("TRANSLATE_REVIEWS", false),
            },
            scroll: ScrollConfig {
                scroll_pause_ms: env_parse("SCROLL_PAUSE_MS", 1_000),
                idle_rounds: env_parse("SCROLL_IDLE_ROUNDS", 3),
                max_scroll_rounds: env_parse("MAX_SCROLL_ROUNDS", 1_800),
                max_reviews_per_place: env_parse("MAX_REVIEWS_PER_PLACE", 0),
                min_plateau_count: env_parse("MIN_PLATEAU_COUNT", 20),
                ui_lag_tolerance: env_parse("UI_LAG_TOLERANCE", 3),
                place_hard_timeout_secs: env_parse("PLACE_HARD_TIMEOUT_SEC", 240),
                no_progress_max_secs: env_parse("NO_PROGRESS_MAX_SECS", 45),
            },
            batch: BatchConfig {
                retries_per_place: env_parse("MAX_RETRIES_PER_PLACE", 3),
                fallback_no_proxy: false,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.browser.language.is_empty() {
            errors.push("UI language must not be empty".to_string());
        }
        if self.browser.nav_timeout_ms == 0 {
            errors.push("Navigation timeout must be greater than 0".to_string());
        }
        if self.scroll.idle_rounds == 0 {
            errors.push("Idle round threshold must be greater than 0".to_string());
        }
        if self.scroll.max_scroll_rounds == 0 {
            errors.push("Max scroll rounds must be greater than 0".to_string());
        }
        if self.scroll.place_hard_timeout_secs == 0 {
            errors.push("Place hard timeout must be greater than 0".to_string());
        }
        if self.scroll.no_progress_max_secs == 0 {
            errors.push("No-progress budget must be greater than 0".to_string());
        }
        if self.batch.retries_per_place == 0 {
            errors.push("Retries per place must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scroll.idle_rounds, 3);
        assert_eq!(config.scroll.max_scroll_rounds, 1_800);
        assert_eq!(config.scroll.min_plateau_count, 20);
        assert_eq!(config.batch.retries_per_place, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.scroll.idle_rounds = 0;
        config.browser.nav_timeout_ms = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
