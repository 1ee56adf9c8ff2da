//! Sync configuration resolved from flags and environment.

use crate::discovery::{DiscoveryConfig, SetRange};
use crate::mirror::cloudinary::CloudinaryCredentials;
use crate::mirror::MirrorSettings;
use crate::normalizer::NormalizationConfig;
use crate::reconciler::ReconcileConfig;
use crate::source::SourceEndpoints;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Everything a sync run needs, validated.
#[derive(Clone, Debug)]
pub struct SyncControls {
    /// Snapshot file.
    pub snapshot_path: PathBuf,
    /// Explicit sets; skips discovery when present.
    pub sets: Option<Vec<SetRange>>,
    /// Set discovery settings.
    pub discovery: DiscoveryConfig,
    /// Per-item reconciliation settings.
    pub reconcile: ReconcileConfig,
    /// Remote catalog URLs.
    pub endpoints: SourceEndpoints,
    /// Page normalization settings.
    pub normalization: NormalizationConfig,
    /// Mirror key namespace and mirrored-host marker.
    pub mirror: MirrorSettings,
    /// Mirror credentials; mirroring is disabled when absent.
    pub credentials: Option<CloudinaryCredentials>,
    /// Timeout for mirror API calls.
    pub image_timeout: Duration,
    /// Optional deck index file.
    pub deck_index: Option<PathBuf>,
    /// Optional change ledger file.
    pub ledger: Option<PathBuf>,
}

impl SyncControls {
    /// True when image mirroring can run.
    pub fn mirroring_enabled(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Command-line interface for the sync binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cardcrawl",
    about = "Incrementally sync the card catalog snapshot with the remote site"
)]
pub struct Cli {
    /// Snapshot JSON file read at start and rewritten at checkpoints
    #[arg(long, env = "CARDCRAWL_SNAPSHOT", default_value = "cards.json")]
    pub snapshot: PathBuf,

    /// Card detail URL template; `{}` is replaced with the card id
    #[arg(
        long,
        env = "CARDCRAWL_ITEM_URL",
        default_value = "https://www.gundam-gcg.com/en/cards/detail.php?detailSearch={}"
    )]
    pub item_url: String,

    /// Card image URL template; `{}` is replaced with the card id
    #[arg(
        long,
        env = "CARDCRAWL_IMAGE_URL",
        default_value = "https://www.gundam-gcg.com/en/images/cards/card/{}.webp?251120"
    )]
    pub image_url: String,

    /// Set listing page consulted when probing finds no sets
    #[arg(long, env = "CARDCRAWL_LISTING_URL")]
    pub listing_url: Option<String>,

    /// Explicit sets as CODE[:LIMIT], comma separated; skips discovery
    #[arg(long, env = "CARDCRAWL_SETS")]
    pub sets: Option<String>,

    /// Set prefixes probed during discovery, comma separated
    #[arg(long, env = "CARDCRAWL_PREFIXES", default_value = "ST,GD,PR,UT")]
    pub prefixes: String,

    /// Prefix whose sets get the booster scan limit
    #[arg(long, env = "CARDCRAWL_BOOSTER_PREFIX", default_value = "GD")]
    pub booster_prefix: String,

    /// Refetch every card even when it is already stored
    #[arg(long, env = "CARDCRAWL_FULL_RECHECK", default_value_t = false)]
    pub full_recheck: bool,

    /// Milliseconds to wait after each card id
    #[arg(long, env = "CARDCRAWL_POLITENESS_MS", default_value_t = 100)]
    pub politeness_ms: u64,

    /// Seconds before a set probe gives up
    #[arg(long, env = "CARDCRAWL_PROBE_TIMEOUT", default_value_t = 3)]
    pub probe_timeout_secs: u64,

    /// Seconds before a card fetch gives up
    #[arg(long, env = "CARDCRAWL_ITEM_TIMEOUT", default_value_t = 5)]
    pub item_timeout_secs: u64,

    /// Seconds before a mirror API call gives up
    #[arg(long, env = "CARDCRAWL_IMAGE_TIMEOUT", default_value_t = 30)]
    pub image_timeout_secs: u64,

    /// Consecutive missing set numbers that end a prefix
    #[arg(long, env = "CARDCRAWL_SET_MISSES", default_value_t = 2)]
    pub set_miss_threshold: u32,

    /// Consecutive missing cards that end a set
    #[arg(long, env = "CARDCRAWL_ITEM_MISSES", default_value_t = 3)]
    pub item_miss_threshold: u32,

    /// Highest set number probed per prefix
    #[arg(long, env = "CARDCRAWL_PROBE_WINDOW", default_value_t = 19)]
    pub probe_window: u32,

    /// Save the snapshot after this many card ids (0 = only after each set)
    #[arg(long, env = "CARDCRAWL_CHECKPOINT_EVERY", default_value_t = 25)]
    pub checkpoint_every: u32,

    /// Deck index JSON used to fill per-card deck associations
    #[arg(long, env = "CARDCRAWL_DECKS")]
    pub decks: Option<PathBuf>,

    /// Append-only JSONL ledger of new, changed and purged cards
    #[arg(long, env = "CARDCRAWL_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Cloudinary cloud name
    #[arg(long, env = "CLOUDINARY_CLOUD_NAME")]
    pub cloudinary_cloud_name: Option<String>,

    /// Cloudinary API key
    #[arg(long, env = "CLOUDINARY_API_KEY")]
    pub cloudinary_api_key: Option<String>,

    /// Cloudinary API secret
    #[arg(long, env = "CLOUDINARY_API_SECRET", hide_env_values = true)]
    pub cloudinary_api_secret: Option<String>,

    /// Key namespace for mirrored images
    #[arg(long, env = "CARDCRAWL_MIRROR_NAMESPACE", default_value = "gundam_cards")]
    pub mirror_namespace: String,
}

impl Cli {
    /// Converts the parsed CLI into `SyncControls`.
    pub fn build_controls(&self) -> Result<SyncControls> {
        anyhow::ensure!(
            self.item_url.contains("{}"),
            "item url template must contain {{}}: {}",
            self.item_url
        );
        let listing_url = self
            .listing_url
            .as_deref()
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid listing url {raw:?}")))
            .transpose()?;

        let prefixes = split_list(&self.prefixes);
        anyhow::ensure!(!prefixes.is_empty(), "at least one set prefix is required");

        let politeness_delay = Duration::from_millis(self.politeness_ms);
        let discovery = DiscoveryConfig {
            prefixes,
            booster_prefix: self.booster_prefix.trim().to_string(),
            probe_window: self.probe_window,
            miss_threshold: self.set_miss_threshold,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            politeness_delay,
            ..DiscoveryConfig::default()
        };
        let reconcile = ReconcileConfig {
            item_timeout: Duration::from_secs(self.item_timeout_secs),
            miss_threshold: self.item_miss_threshold,
            politeness_delay,
            checkpoint_every: self.checkpoint_every,
            full_recheck: self.full_recheck,
        };

        let credentials = CloudinaryCredentials::from_parts(
            self.cloudinary_cloud_name.clone(),
            self.cloudinary_api_key.clone(),
            self.cloudinary_api_secret.clone(),
        );

        Ok(SyncControls {
            snapshot_path: self.snapshot.clone(),
            sets: self.set_overrides()?,
            discovery,
            reconcile,
            endpoints: SourceEndpoints {
                item_url_template: self.item_url.clone(),
                listing_url,
            },
            normalization: NormalizationConfig {
                image_url_template: self.image_url.clone(),
                ..NormalizationConfig::default()
            },
            mirror: MirrorSettings {
                namespace: self.mirror_namespace.clone(),
                ..MirrorSettings::default()
            },
            credentials,
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            deck_index: self.decks.clone(),
            ledger: self.ledger.clone(),
        })
    }

    fn set_overrides(&self) -> Result<Option<Vec<SetRange>>> {
        let Some(raw) = self.sets.as_deref() else {
            return Ok(None);
        };
        let sets = split_list(raw)
            .iter()
            .map(|entry| entry.parse::<SetRange>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .context("invalid --sets value")?;
        Ok((!sets.is_empty()).then_some(sets))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
