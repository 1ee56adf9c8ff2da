//! Per-set incremental scan that merges fresh records into the snapshot.

use crate::decks::DeckIndex;
use crate::discovery::SetRange;
use crate::mirror::{CircuitBreaker, ImageMirrorGate};
use crate::normalizer::Normalizer;
use crate::record::{card_id, CardRecord};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::source::CardSource;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

/// Reconciliation tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Timeout for each item fetch.
    pub item_timeout: Duration,
    /// Consecutive missing items that end a set.
    pub miss_threshold: u32,
    /// Pause after every index, fetched or not.
    pub politeness_delay: Duration,
    /// Save the snapshot after this many processed indices (0 disables).
    pub checkpoint_every: u32,
    /// Refetch every id even when it is already stored.
    pub full_recheck: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(5),
            miss_threshold: 3,
            politeness_delay: Duration::from_millis(100),
            checkpoint_every: 25,
            full_recheck: false,
        }
    }
}

/// What happened to one candidate id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Already stored and nothing forced a refresh; no fetch issued.
    Skipped,
    /// Fetch failed or the page was not a card.
    Missed,
    /// Stored for the first time.
    New,
    /// Content differed; replaced.
    Changed,
    /// Content identical; timestamp refreshed.
    Unchanged,
}

impl ItemOutcome {
    /// True for outcomes that reset the miss streak.
    pub fn is_present(self) -> bool {
        !matches!(self, Self::Missed)
    }
}

/// Counters for one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Sets walked.
    pub sets: usize,
    /// Records stored for the first time.
    pub new: usize,
    /// Records replaced.
    pub changed: usize,
    /// Records refetched without difference.
    pub unchanged: usize,
    /// Ids served from the snapshot without fetching.
    pub skipped: usize,
    /// Ids that produced no record.
    pub missed: usize,
    /// Ids stored for the first time, in scan order.
    pub new_ids: Vec<String>,
    /// Ids replaced, in scan order.
    pub changed_ids: Vec<String>,
    /// True when the mirror breaker opened during the run.
    pub mirror_breaker_open: bool,
}

impl ReconcileStats {
    fn record(&mut self, id: &str, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Missed => self.missed += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::New => {
                self.new += 1;
                self.new_ids.push(id.to_string());
            }
            ItemOutcome::Changed => {
                self.changed += 1;
                self.changed_ids.push(id.to_string());
            }
        }
    }

    /// Ids probed in total.
    pub fn processed(&self) -> usize {
        self.new + self.changed + self.unchanged + self.skipped + self.missed
    }

    /// Prints the run summary.
    pub fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f32().max(0.001);
        println!("--- reconcile summary ({secs:.2}s) ---");
        println!("sets scanned: {}", self.sets);
        println!("ids processed: {}", self.processed());
        println!("ids/sec: {:.2}", self.processed() as f32 / secs);
        println!("new cards: {}", self.new);
        println!("changed cards: {}", self.changed);
        println!("unchanged cards: {}", self.unchanged);
        println!("skipped (already stored): {}", self.skipped);
        println!("misses: {}", self.missed);
        if self.mirror_breaker_open {
            println!("image mirror: rate limited, source urls kept for the rest of the run");
        }
    }
}

/// Walks sets item by item and merges results into a snapshot.
pub struct Reconciler<'a, S: CardSource + ?Sized> {
    source: &'a S,
    normalizer: &'a Normalizer,
    mirror: &'a ImageMirrorGate,
    decks: Option<&'a DeckIndex>,
    checkpoints: Option<&'a SnapshotStore>,
    config: ReconcileConfig,
    breaker: CircuitBreaker,
}

impl<'a, S: CardSource + ?Sized> Reconciler<'a, S> {
    /// Creates a reconciler with a closed breaker.
    pub fn new(
        source: &'a S,
        normalizer: &'a Normalizer,
        mirror: &'a ImageMirrorGate,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            source,
            normalizer,
            mirror,
            decks: None,
            checkpoints: None,
            config,
            breaker: CircuitBreaker::new(),
        }
    }

    /// Attaches deck associations.
    pub fn with_decks(mut self, decks: &'a DeckIndex) -> Self {
        self.decks = Some(decks);
        self
    }

    /// Enables periodic checkpoint saves to `store`.
    pub fn with_checkpoints(mut self, store: &'a SnapshotStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// The run's mirror breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Reconciles every set in order.
    pub fn run(&self, snapshot: &mut Snapshot, sets: &[SetRange]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let mut processed = 0u32;
        for set in sets {
            self.reconcile_set(snapshot, set, &mut stats, &mut processed);
            stats.sets += 1;
            self.checkpoint(snapshot);
        }
        stats.mirror_breaker_open = self.breaker.is_open();
        stats
    }

    fn reconcile_set(
        &self,
        snapshot: &mut Snapshot,
        set: &SetRange,
        stats: &mut ReconcileStats,
        processed: &mut u32,
    ) {
        tracing::info!(set = set.code.as_str(), limit = set.limit, "scanning set");
        let mut miss_streak = 0u32;
        for index in 1..=set.limit {
            let id = card_id(&set.code, index);
            let outcome = self.reconcile_item(snapshot, &id);
            stats.record(&id, outcome);
            if outcome.is_present() {
                miss_streak = 0;
            } else {
                miss_streak += 1;
            }

            *processed += 1;
            if self.config.checkpoint_every > 0 && *processed % self.config.checkpoint_every == 0 {
                self.checkpoint(snapshot);
            }
            if !self.config.politeness_delay.is_zero() {
                thread::sleep(self.config.politeness_delay);
            }
            if miss_streak >= self.config.miss_threshold {
                tracing::info!(set = set.code.as_str(), last_index = index, "set boundary reached");
                break;
            }
        }
    }

    /// Reconciles a single id against the snapshot.
    pub fn reconcile_item(&self, snapshot: &mut Snapshot, id: &str) -> ItemOutcome {
        let decks = self
            .decks
            .map(|index| index.associations(id))
            .unwrap_or_default();
        if let Some(existing) = snapshot.get(id) {
            if !self.needs_refresh(existing, &decks) {
                return ItemOutcome::Skipped;
            }
        }

        let page = match self.source.fetch_item(id, self.config.item_timeout) {
            Ok(page) => page,
            Err(err) => {
                tracing::debug!(card_id = id, error = %err, "fetch failed");
                return ItemOutcome::Missed;
            }
        };
        let mut fresh = match self.normalizer.normalize(&page) {
            Ok(record) => record,
            Err(err) => {
                tracing::debug!(card_id = id, reason = %err, "no card at id");
                return ItemOutcome::Missed;
            }
        };

        let existing = snapshot.get(id);
        fresh.image = self
            .mirror
            .ensure_mirrored(&fresh.image, id, existing, &self.breaker);
        fresh.decks = decks;
        let outcome = match existing {
            Some(existing) if existing.same_content(&fresh) => ItemOutcome::Unchanged,
            Some(_) => ItemOutcome::Changed,
            None => ItemOutcome::New,
        };

        match outcome {
            ItemOutcome::Unchanged => {
                if let Some(stored) = snapshot.get_mut(id) {
                    stored.touch();
                }
            }
            _ => {
                tracing::info!(
                    card_id = id,
                    name = fresh.name.as_str(),
                    new = outcome == ItemOutcome::New,
                    "card stored"
                );
                fresh.touch();
                snapshot.upsert(fresh);
            }
        }
        outcome
    }

    fn needs_refresh(&self, existing: &CardRecord, decks: &BTreeMap<String, u32>) -> bool {
        if self.config.full_recheck || existing.decks != *decks {
            return true;
        }
        self.mirror.is_enabled() && !self.breaker.is_open() && !self.mirror.is_mirrored(&existing.image)
    }

    fn checkpoint(&self, snapshot: &Snapshot) {
        if let Some(store) = self.checkpoints {
            store.checkpoint(snapshot);
        }
    }
}
