#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use kagami_core::{Density, FilterDefaults};

use crate::preload::PreloadConfig;

/// Tuning knobs for the browsing core. Every value can be overridden via `KAGAMI_*`.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseConfig {
    pub debounce: Duration,
    pub overlay_delay: Duration,
    pub cache_cap: usize,
    pub prefetch_delay: Duration,
    pub prefetch_ahead: u32,
    pub prefetch_behind: u32,
    /// Fraction of the first K assets that must be ready before a swap.
    pub preload_threshold: f32,
    pub preload_timeout: Duration,
    pub scroll_watch: Duration,
    pub aggregate_ttl: Duration,
    pub density: Density,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            overlay_delay: Duration::from_millis(200),
            cache_cap: 10,
            prefetch_delay: Duration::from_millis(250),
            prefetch_ahead: 2,
            prefetch_behind: 1,
            preload_threshold: 0.75,
            preload_timeout: Duration::from_millis(1200),
            scroll_watch: Duration::from_millis(1500),
            aggregate_ttl: Duration::from_secs(86_400),
            density: Density::Grid,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn env_ms(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

impl BrowseConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            debounce: env_ms("KAGAMI_DEBOUNCE_MS", d.debounce),
            overlay_delay: env_ms("KAGAMI_OVERLAY_DELAY_MS", d.overlay_delay),
            cache_cap: env_or("KAGAMI_CACHE_CAP", d.cache_cap).max(1),
            prefetch_delay: env_ms("KAGAMI_PREFETCH_DELAY_MS", d.prefetch_delay),
            prefetch_ahead: env_or("KAGAMI_PREFETCH_AHEAD", d.prefetch_ahead),
            prefetch_behind: env_or("KAGAMI_PREFETCH_BEHIND", d.prefetch_behind),
            preload_threshold: env_or("KAGAMI_PRELOAD_THRESHOLD", d.preload_threshold).clamp(0.0, 1.0),
            preload_timeout: env_ms("KAGAMI_PRELOAD_TIMEOUT_MS", d.preload_timeout),
            scroll_watch: env_ms("KAGAMI_SCROLL_WATCH_MS", d.scroll_watch),
            aggregate_ttl: Duration::from_secs(env_or("KAGAMI_AGGREGATE_TTL_SECS", d.aggregate_ttl.as_secs())),
            density: std::env::var("KAGAMI_DENSITY")
                .ok()
                .and_then(|s| Density::parse(&s))
                .unwrap_or(d.density),
        }
    }

    /// Filter defaults for the current density (page size follows density).
    pub fn filter_defaults(&self) -> FilterDefaults {
        FilterDefaults::default().with_limit(self.density.page_size())
    }

    pub fn preload(&self) -> PreloadConfig {
        PreloadConfig {
            count: self.density.preload_count(),
            threshold: self.preload_threshold,
            timeout: self.preload_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_drives_page_size_and_k() {
        let mut c = BrowseConfig::default();
        assert_eq!(c.filter_defaults().limit, 24);
        assert_eq!(c.preload().count, 12);
        c.density = Density::Table;
        assert_eq!(c.filter_defaults().limit, 50);
        assert_eq!(c.preload().count, 0);
    }
}
