//! Sync runner: load, purge, discover, reconcile, purge, save.

use crate::controls::{Cli, SyncControls};
use crate::decks::DeckIndex;
use crate::discovery::{resolve_limits, DiscoverySource, SetDiscoverer, SetRange};
use crate::ledger::{ChangeKind, ChangeLedger, LedgerEntry};
use crate::mirror::cloudinary::CloudinaryBackend;
use crate::mirror::ImageMirrorGate;
use crate::normalizer::Normalizer;
use crate::purge::purge;
use crate::reconciler::{ReconcileStats, Reconciler};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::source::{CardSource, HttpCardSource};
use anyhow::{Context, Result};
use std::time::{Duration, Instant};

/// Outcome of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Reconciliation counters.
    pub stats: ReconcileStats,
    /// Where the scanned sets came from; `None` when sets were given explicitly.
    pub set_source: Option<DiscoverySource>,
    /// Sets scanned, in order.
    pub sets: Vec<SetRange>,
    /// Records dropped by the purge after loading.
    pub purged_on_load: usize,
    /// Records dropped by the purge before the final save.
    pub purged_final: usize,
    /// Records in the saved snapshot.
    pub total_records: usize,
    /// Lines appended to the change ledger.
    pub ledger_entries: usize,
}

impl SyncReport {
    /// Prints the run summary.
    pub fn report(&self, elapsed: Duration) {
        self.stats.report(elapsed);
        let origin = match self.set_source {
            None => "explicit",
            Some(DiscoverySource::Probed) => "probed",
            Some(DiscoverySource::Listing) => "listing page",
            Some(DiscoverySource::Fallback) => "defaults",
        };
        let sets: Vec<String> = self.sets.iter().map(ToString::to_string).collect();
        println!("sets ({origin}): {}", sets.join(", "));
        println!("purged on load: {}", self.purged_on_load);
        println!("purged before save: {}", self.purged_final);
        println!("records saved: {}", self.total_records);
        if self.ledger_entries > 0 {
            println!("ledger entries: {}", self.ledger_entries);
        }
    }
}

/// Entry point used by the `cardcrawl` binary.
pub fn run(cli: Cli) -> Result<()> {
    let controls = cli.build_controls()?;
    let source = HttpCardSource::new(controls.endpoints.clone())
        .context("failed to build catalog http client")?;
    let mirror = build_mirror(&controls)?;

    let started = Instant::now();
    let report = sync(&controls, &source, &mirror)?;
    report.report(started.elapsed());
    Ok(())
}

fn build_mirror(controls: &SyncControls) -> Result<ImageMirrorGate> {
    match &controls.credentials {
        Some(credentials) => {
            let backend = CloudinaryBackend::new(credentials.clone(), controls.image_timeout)?;
            tracing::info!(cloud = credentials.cloud_name.as_str(), "image mirroring enabled");
            Ok(ImageMirrorGate::new(Box::new(backend), controls.mirror.clone()))
        }
        None => {
            tracing::info!("mirror credentials missing, keeping source image urls");
            Ok(ImageMirrorGate::disabled(controls.mirror.clone()))
        }
    }
}

/// Runs the whole pipeline against `source` and `mirror`.
///
/// Only configuration problems (unreadable deck index, unwritable ledger) fail, and they fail
/// before any remote request. Scan-time problems degrade to misses and warnings.
pub fn sync<S: CardSource + ?Sized>(
    controls: &SyncControls,
    source: &S,
    mirror: &ImageMirrorGate,
) -> Result<SyncReport> {
    let ledger = controls.ledger.as_ref().map(ChangeLedger::new);
    if let Some(ledger) = &ledger {
        ledger.ensure_writable()?;
    }
    let decks = match &controls.deck_index {
        Some(path) => DeckIndex::load(path)?,
        None => DeckIndex::empty(),
    };
    let normalizer = Normalizer::new(controls.normalization.clone());
    let store = SnapshotStore::new(&controls.snapshot_path);
    let mut changes = Vec::new();

    let mut snapshot = store.load();
    let purged_on_load = purge_into(&mut snapshot, &mut changes);
    if purged_on_load > 0 {
        store.checkpoint(&snapshot);
    }

    let (sets, set_source) = match &controls.sets {
        Some(requested) => (resolve_limits(requested, &controls.discovery), None),
        None => {
            let (sets, origin) =
                SetDiscoverer::new(source, &normalizer, &controls.discovery).discover();
            (sets, Some(origin))
        }
    };
    tracing::info!(sets = sets.len(), "starting reconciliation");

    let stats = Reconciler::new(source, &normalizer, mirror, controls.reconcile.clone())
        .with_decks(&decks)
        .with_checkpoints(&store)
        .run(&mut snapshot, &sets);

    let purged_final = purge_into(&mut snapshot, &mut changes);
    for (ids, kind) in [
        (&stats.new_ids, ChangeKind::New),
        (&stats.changed_ids, ChangeKind::Changed),
    ] {
        changes.extend(
            ids.iter()
                .filter_map(|id| snapshot.get(id))
                .map(|record| LedgerEntry::from_record(record, kind)),
        );
    }

    store
        .save(&snapshot)
        .with_context(|| format!("failed to save snapshot {:?}", store.path()))?;

    let ledger_entries = match &ledger {
        Some(ledger) => ledger.append(&changes)?,
        None => 0,
    };

    Ok(SyncReport {
        stats,
        set_source,
        sets,
        purged_on_load,
        purged_final,
        total_records: snapshot.len(),
        ledger_entries,
    })
}

fn purge_into(snapshot: &mut Snapshot, changes: &mut Vec<LedgerEntry>) -> usize {
    let outcome = purge(snapshot);
    for (id, _) in &outcome.removed {
        if let Some(record) = snapshot.get(id) {
            changes.push(LedgerEntry::from_record(record, ChangeKind::Purged));
        }
    }
    let removed = outcome.removed.len();
    *snapshot = outcome.kept;
    removed
}
