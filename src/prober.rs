//! Miss-streak boundary probing over sequentially numbered namespaces.

use crate::normalizer::Normalizer;
use crate::source::CardSource;
use std::thread;
use std::time::Duration;

/// Outcome of walking one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Highest index that produced a hit.
    pub highest_hit: Option<u32>,
    /// Every index that produced a hit, ascending.
    pub hits: Vec<u32>,
    /// Number of probes issued.
    pub probes: u32,
}

impl ProbeReport {
    /// True when at least one probe hit.
    pub fn is_live(&self) -> bool {
        !self.hits.is_empty()
    }
}

/// Walks `1..=max_index` and stops after `miss_threshold` consecutive misses.
///
/// The result is a best-effort estimate: a transient failure can end the walk early, and the
/// next run simply probes again from index 1.
pub struct BoundaryProber<'a, S: CardSource + ?Sized> {
    source: &'a S,
    normalizer: &'a Normalizer,
    miss_threshold: u32,
    timeout: Duration,
    politeness_delay: Duration,
}

impl<'a, S: CardSource + ?Sized> BoundaryProber<'a, S> {
    /// Creates a prober with the given miss threshold and per-probe timeout.
    pub fn new(
        source: &'a S,
        normalizer: &'a Normalizer,
        miss_threshold: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            normalizer,
            miss_threshold: miss_threshold.max(1),
            timeout,
            politeness_delay: Duration::ZERO,
        }
    }

    /// Pause inserted after every probe.
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    /// Probes ids produced by `make_id` for indices `1..=max_index`.
    pub fn probe<F>(&self, max_index: u32, make_id: F) -> ProbeReport
    where
        F: Fn(u32) -> String,
    {
        let mut report = ProbeReport::default();
        let mut miss_streak = 0u32;
        for index in 1..=max_index {
            let card_id = make_id(index);
            report.probes += 1;
            if self.is_hit(&card_id) {
                report.hits.push(index);
                report.highest_hit = Some(index);
                miss_streak = 0;
            } else {
                miss_streak += 1;
            }
            if !self.politeness_delay.is_zero() {
                thread::sleep(self.politeness_delay);
            }
            if miss_streak >= self.miss_threshold {
                break;
            }
        }
        report
    }

    /// Single probe. Transport errors and unrecognized pages are misses.
    pub fn is_hit(&self, card_id: &str) -> bool {
        match self.source.fetch_item(card_id, self.timeout) {
            Ok(page) => self.normalizer.recognizes(&page),
            Err(err) => {
                tracing::debug!(card_id, error = %err, "probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{FetchedPage, NormalizationConfig};
    use crate::source::FetchError;
    use std::cell::Cell;
    use url::Url;

    struct RangeSource {
        last_hit: u32,
        calls: Cell<u32>,
    }

    impl CardSource for RangeSource {
        fn fetch_item(&self, card_id: &str, _timeout: Duration) -> Result<FetchedPage, FetchError> {
            self.calls.set(self.calls.get() + 1);
            let index: u32 = card_id.rsplit('-').next().unwrap().parse().unwrap();
            let body = if index <= self.last_hit {
                format!("<h1>Card {index}</h1>")
            } else {
                String::new()
            };
            let url = Url::parse(&format!("https://cards.test/detail?id={card_id}")).unwrap();
            Ok(FetchedPage::new(card_id, url, 200, body.into_bytes()))
        }
    }

    #[test]
    fn stops_after_threshold_consecutive_misses() {
        let source = RangeSource {
            last_hit: 5,
            calls: Cell::new(0),
        };
        let normalizer = Normalizer::new(NormalizationConfig::default());
        let prober = BoundaryProber::new(&source, &normalizer, 3, Duration::from_secs(1));

        let report = prober.probe(100, |i| format!("ST01-{i:03}"));

        assert_eq!(report.highest_hit, Some(5));
        assert_eq!(report.hits, vec![1, 2, 3, 4, 5]);
        assert_eq!(report.probes, 8);
        assert_eq!(source.calls.get(), 8);
    }

    #[test]
    fn empty_namespace_is_not_live() {
        let source = RangeSource {
            last_hit: 0,
            calls: Cell::new(0),
        };
        let normalizer = Normalizer::new(NormalizationConfig::default());
        let prober = BoundaryProber::new(&source, &normalizer, 2, Duration::from_secs(1));

        let report = prober.probe(19, |i| format!("PR{i:02}-001"));

        assert!(!report.is_live());
        assert_eq!(report.highest_hit, None);
        assert_eq!(report.probes, 2);
    }

    #[test]
    fn window_bounds_the_walk() {
        let source = RangeSource {
            last_hit: 50,
            calls: Cell::new(0),
        };
        let normalizer = Normalizer::new(NormalizationConfig::default());
        let prober = BoundaryProber::new(&source, &normalizer, 3, Duration::from_secs(1));

        let report = prober.probe(4, |i| format!("GD01-{i:03}"));

        assert_eq!(report.highest_hit, Some(4));
        assert_eq!(report.probes, 4);
    }
}
