use std::cmp::Ordering;
use std::iter::Peekable;
use std::path::PathBuf;

use anyhow::Result;
use cardcrawl::logging::init_tracing;
use cardcrawl::record::CardRecord;
use cardcrawl::{ChangeKind, ChangeLedger, LedgerEntry, SnapshotStore};
use clap::Parser;

/// Replays the difference between two snapshots as change-ledger lines.
///
/// A card missing from the newer snapshot can only have left through the integrity purge, so
/// it is reported as `purged`.
#[derive(Parser, Debug)]
#[command(
    name = "cardcrawl-snapshot-diff",
    about = "Compare two catalog snapshots and emit the changes as ledger lines"
)]
struct DiffCli {
    /// Snapshot produced by the latest run.
    #[arg(long, env = "CARDCRAWL_SNAPSHOT", default_value = "cards.json")]
    current: PathBuf,

    /// Earlier snapshot to compare against.
    #[arg(long, env = "CARDCRAWL_SNAPSHOT_PREVIOUS")]
    previous: PathBuf,

    /// Ledger file the differences are appended to.
    #[arg(long, env = "CARDCRAWL_DIFF_OUTPUT")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = DiffCli::parse();
    let current = SnapshotStore::new(&cli.current).load();
    let previous = SnapshotStore::new(&cli.previous).load();

    let entries = diff_sorted(previous.iter(), current.iter());
    for entry in &entries {
        println!("{:<8} {} {:08x}", kind_label(entry.change), entry.card_no, entry.checksum);
    }
    let tally = |kind: ChangeKind| entries.iter().filter(|e| e.change == kind).count();
    println!(
        "{} -> {} cards: {} new, {} changed, {} purged",
        previous.len(),
        current.len(),
        tally(ChangeKind::New),
        tally(ChangeKind::Changed),
        tally(ChangeKind::Purged)
    );

    if let Some(path) = cli.output {
        ChangeLedger::new(path).append(&entries)?;
    }
    Ok(())
}

/// Walks both id-ordered sequences once, emitting entries in id order.
fn diff_sorted<'a>(
    previous: impl Iterator<Item = &'a CardRecord>,
    current: impl Iterator<Item = &'a CardRecord>,
) -> Vec<LedgerEntry> {
    let mut previous: Peekable<_> = previous.peekable();
    let mut current: Peekable<_> = current.peekable();
    let mut entries = Vec::new();
    loop {
        let order = match (previous.peek(), current.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(old), Some(new)) => old.id.cmp(&new.id),
        };
        match order {
            Ordering::Less => {
                if let Some(old) = previous.next() {
                    entries.push(LedgerEntry::from_record(old, ChangeKind::Purged));
                }
            }
            Ordering::Greater => {
                if let Some(new) = current.next() {
                    entries.push(LedgerEntry::from_record(new, ChangeKind::New));
                }
            }
            Ordering::Equal => {
                if let (Some(old), Some(new)) = (previous.next(), current.next()) {
                    if !old.same_content(new) {
                        entries.push(LedgerEntry::from_record(new, ChangeKind::Changed));
                    }
                }
            }
        }
    }
    entries
}

fn kind_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::New => "new",
        ChangeKind::Changed => "changed",
        ChangeKind::Purged => "purged",
    }
}
