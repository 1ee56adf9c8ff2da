#![warn(missing_docs)]
//! Core library for the cardcrawl catalog synchronizer.
//!
//! A run loads the snapshot, discovers live sets by boundary probing, reconciles every card id
//! against the snapshot, mirrors new images, purges invalid records and saves.

pub mod controls;
pub mod decks;
pub mod discovery;
pub mod html;
pub mod ledger;
pub mod logging;
pub mod mirror;
pub mod normalizer;
pub mod prober;
pub mod purge;
pub mod reconciler;
pub mod record;
pub mod runtime;
pub mod snapshot;
pub mod source;

pub use controls::{Cli, SyncControls};
pub use decks::DeckIndex;
pub use discovery::{DiscoveryConfig, DiscoverySource, SetDiscoverer, SetRange};
pub use ledger::{ChangeKind, ChangeLedger, LedgerEntry};
pub use mirror::{CircuitBreaker, ImageMirrorGate, MirrorBackend, MirrorError, MirrorSettings};
pub use normalizer::{FetchedPage, NormalizationConfig, NormalizationError, Normalizer};
pub use prober::{BoundaryProber, ProbeReport};
pub use purge::{purge, PurgeOutcome, PurgeReason};
pub use reconciler::{ItemOutcome, ReconcileConfig, ReconcileStats, Reconciler};
pub use record::{CardRecord, ExtendedMetadata};
pub use runtime::{run as run_sync, sync, SyncReport};
pub use snapshot::{Snapshot, SnapshotError, SnapshotStore};
pub use source::{CardSource, FetchError, HttpCardSource, SourceEndpoints};
