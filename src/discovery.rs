//! Set discovery: turns known namespace prefixes into `(set code, scan limit)` ranges.

use crate::html::{is_set_code, set_codes_in_listing};
use crate::normalizer::Normalizer;
use crate::prober::BoundaryProber;
use crate::record::card_id;
use crate::source::CardSource;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One set to scan, with the inclusive number of items to attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetRange {
    /// Set code, e.g. `GD01`.
    pub code: String,
    /// Highest item index to attempt.
    pub limit: u32,
}

impl SetRange {
    /// Builds a range.
    pub fn new(code: impl Into<String>, limit: u32) -> Self {
        Self {
            code: code.into(),
            limit,
        }
    }
}

impl fmt::Display for SetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.limit)
    }
}

impl FromStr for SetRange {
    type Err = String;

    /// Parses `CODE` or `CODE:LIMIT`; a bare code gets limit 0, meaning "use the prefix rule".
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (code, limit) = match input.split_once(':') {
            Some((code, limit)) => {
                let limit = limit
                    .trim()
                    .parse::<u32>()
                    .map_err(|err| format!("invalid limit in {input:?}: {err}"))?;
                (code.trim(), limit)
            }
            None => (input, 0),
        };
        if !is_set_code(code) {
            return Err(format!("invalid set code {code:?}"));
        }
        Ok(Self::new(code, limit))
    }
}

/// Discovery tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Prefixes to probe, in scan order.
    pub prefixes: Vec<String>,
    /// Prefix class holding the large booster sets.
    pub booster_prefix: String,
    /// Scan limit for booster sets.
    pub booster_limit: u32,
    /// Scan limit for every other set.
    pub standard_limit: u32,
    /// Highest set number probed per prefix.
    pub probe_window: u32,
    /// Consecutive missing set numbers that end a prefix.
    pub miss_threshold: u32,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Pause after each probe.
    pub politeness_delay: Duration,
    /// Used when nothing else yields a set.
    pub fallback: Vec<SetRange>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefixes: ["ST", "GD", "PR", "UT"].map(String::from).to_vec(),
            booster_prefix: "GD".to_string(),
            booster_limit: 135,
            standard_limit: 35,
            probe_window: 19,
            miss_threshold: 2,
            probe_timeout: Duration::from_secs(3),
            politeness_delay: Duration::from_millis(100),
            fallback: vec![
                SetRange::new("ST01", 25),
                SetRange::new("GD01", 105),
                SetRange::new("GD02", 105),
            ],
        }
    }
}

impl DiscoveryConfig {
    /// Scan limit assigned to a set code by prefix class.
    pub fn limit_for(&self, code: &str) -> u32 {
        if code.starts_with(&self.booster_prefix) {
            self.booster_limit
        } else {
            self.standard_limit
        }
    }
}

/// Where the discovered ranges came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    /// Live probing found at least one set.
    Probed,
    /// Probing found nothing; the listing page supplied the codes.
    Listing,
    /// Nothing was reachable; hardcoded defaults.
    Fallback,
}

/// Probes each prefix for live sets.
pub struct SetDiscoverer<'a, S: CardSource + ?Sized> {
    source: &'a S,
    normalizer: &'a Normalizer,
    config: &'a DiscoveryConfig,
}

impl<'a, S: CardSource + ?Sized> SetDiscoverer<'a, S> {
    /// Creates a discoverer.
    pub fn new(source: &'a S, normalizer: &'a Normalizer, config: &'a DiscoveryConfig) -> Self {
        Self {
            source,
            normalizer,
            config,
        }
    }

    /// Live probing first, then listing hints, then the hardcoded defaults. Never empty unless
    /// the configured fallback is.
    pub fn discover(&self) -> (Vec<SetRange>, DiscoverySource) {
        let probed = self.probe_prefixes();
        if !probed.is_empty() {
            return (probed, DiscoverySource::Probed);
        }

        let listed = self.listing_hints();
        if !listed.is_empty() {
            tracing::warn!(sets = listed.len(), "no live sets probed, using listing page hints");
            return (listed, DiscoverySource::Listing);
        }

        tracing::warn!("no sets discovered, falling back to defaults");
        (self.config.fallback.clone(), DiscoverySource::Fallback)
    }

    /// Runs the boundary prober over each declared prefix.
    pub fn probe_prefixes(&self) -> Vec<SetRange> {
        let prober = BoundaryProber::new(
            self.source,
            self.normalizer,
            self.config.miss_threshold,
            self.config.probe_timeout,
        )
        .with_politeness_delay(self.config.politeness_delay);

        let mut sets = Vec::new();
        for prefix in &self.config.prefixes {
            let report = prober.probe(self.config.probe_window, |i| {
                card_id(&set_code(prefix, i), 1)
            });
            tracing::info!(
                prefix = prefix.as_str(),
                live = report.hits.len(),
                probes = report.probes,
                "probed prefix"
            );
            for index in report.hits {
                let code = set_code(prefix, index);
                let limit = self.config.limit_for(&code);
                sets.push(SetRange::new(code, limit));
            }
        }
        sets
    }

    fn listing_hints(&self) -> Vec<SetRange> {
        let Some(body) = self.source.fetch_listing(self.config.probe_timeout) else {
            return Vec::new();
        };
        set_codes_in_listing(&body)
            .into_iter()
            .map(|code| {
                let limit = self.config.limit_for(&code);
                SetRange::new(code, limit)
            })
            .collect()
    }
}

fn set_code(prefix: &str, index: u32) -> String {
    format!("{prefix}{index:02}")
}

/// Fills in limits for explicitly requested sets that did not carry one.
pub fn resolve_limits(requested: &[SetRange], config: &DiscoveryConfig) -> Vec<SetRange> {
    requested
        .iter()
        .map(|range| {
            let limit = if range.limit == 0 {
                config.limit_for(&range.code)
            } else {
                range.limit
            };
            SetRange::new(range.code.clone(), limit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{FetchedPage, NormalizationConfig};
    use crate::source::FetchError;
    use std::collections::HashSet;
    use url::Url;

    struct LiveSets {
        live: HashSet<&'static str>,
        listing: Option<&'static str>,
    }

    impl CardSource for LiveSets {
        fn fetch_item(&self, card_id: &str, _timeout: Duration) -> Result<FetchedPage, FetchError> {
            let url = Url::parse("https://cards.test/detail").unwrap();
            let body = if self.live.contains(card_id) {
                "<div class=\"cardName\">Live</div>"
            } else {
                ""
            };
            Ok(FetchedPage::new(card_id, url, 200, body.as_bytes().to_vec()))
        }

        fn fetch_listing(&self, _timeout: Duration) -> Option<String> {
            self.listing.map(str::to_string)
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            prefixes: vec!["ST".into(), "GD".into(), "PR".into()],
            politeness_delay: Duration::ZERO,
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn probes_prefixes_in_declaration_order() {
        let source = LiveSets {
            live: ["ST01-001", "ST02-001", "ST05-001", "GD01-001", "GD02-001"]
                .into_iter()
                .collect(),
            listing: Some("[UT01]"),
        };
        let normalizer = Normalizer::new(NormalizationConfig::default());
        let config = config();

        let (sets, origin) = SetDiscoverer::new(&source, &normalizer, &config).discover();

        assert_eq!(origin, DiscoverySource::Probed);
        assert_eq!(
            sets,
            vec![
                SetRange::new("ST01", 35),
                SetRange::new("ST02", 35),
                SetRange::new("GD01", 135),
                SetRange::new("GD02", 135),
            ]
        );
    }

    #[test]
    fn listing_hints_used_when_probing_finds_nothing() {
        let source = LiveSets {
            live: HashSet::new(),
            listing: Some("<a>[GD03] Steel Requiem</a><a>[ST05]</a>"),
        };
        let normalizer = Normalizer::new(NormalizationConfig::default());
        let config = config();

        let (sets, origin) = SetDiscoverer::new(&source, &normalizer, &config).discover();

        assert_eq!(origin, DiscoverySource::Listing);
        assert_eq!(sets, vec![SetRange::new("GD03", 135), SetRange::new("ST05", 35)]);
    }

    #[test]
    fn total_outage_falls_back_to_defaults() {
        let source = LiveSets {
            live: HashSet::new(),
            listing: None,
        };
        let normalizer = Normalizer::new(NormalizationConfig::default());
        let config = config();

        let (sets, origin) = SetDiscoverer::new(&source, &normalizer, &config).discover();

        assert_eq!(origin, DiscoverySource::Fallback);
        assert_eq!(
            sets,
            vec![
                SetRange::new("ST01", 25),
                SetRange::new("GD01", 105),
                SetRange::new("GD02", 105)
            ]
        );
    }

    #[test]
    fn parses_explicit_ranges() {
        assert_eq!("GD01:40".parse::<SetRange>(), Ok(SetRange::new("GD01", 40)));
        assert_eq!(" ST02 ".parse::<SetRange>(), Ok(SetRange::new("ST02", 0)));
        assert!("GD1:40".parse::<SetRange>().is_err());
        assert!("GD01:many".parse::<SetRange>().is_err());

        let resolved = resolve_limits(
            &[SetRange::new("ST02", 0), SetRange::new("GD01", 12)],
            &DiscoveryConfig::default(),
        );
        assert_eq!(resolved, vec![SetRange::new("ST02", 35), SetRange::new("GD01", 12)]);
    }
}
