//! Persisted catalog snapshot: an id-keyed map saved as an id-sorted JSON array.

use crate::normalizer::tolerant_u32;
use crate::record::{series_of, CardRecord};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure while writing.
    #[error("snapshot io error at {path}: {source}")]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The records could not be serialized.
    #[error("snapshot encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// In-memory catalog keyed by card id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: BTreeMap<String, CardRecord>,
}

impl Snapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a record.
    pub fn get(&self, id: &str) -> Option<&CardRecord> {
        self.records.get(id)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut CardRecord> {
        self.records.get_mut(id)
    }

    /// True when `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Inserts or replaces the record under its own id, returning the previous one.
    pub fn upsert(&mut self, record: CardRecord) -> Option<CardRecord> {
        self.records.insert(record.id.clone(), record)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CardRecord> {
        self.records.values()
    }
}

impl FromIterator<CardRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = CardRecord>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for record in iter {
            snapshot.upsert(record);
        }
        snapshot
    }
}

/// Loads and saves the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. Never fails: a missing or unreadable file yields an empty snapshot.
    ///
    /// Entries without `cardNo` are dropped silently; entries that do not decode are dropped
    /// with a warning. Entries in the older layout (stats only inside `metadata`, attack
    /// power as `apData`) have their top-level attributes filled from those fields.
    pub fn load(&self) -> Snapshot {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no snapshot yet, starting empty");
                return Snapshot::new();
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "snapshot unreadable, starting empty");
                return Snapshot::new();
            }
        };
        let entries: Vec<Value> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "snapshot is not a record array, starting empty");
                return Snapshot::new();
            }
        };

        let mut snapshot = Snapshot::new();
        for entry in entries {
            let has_id = entry
                .get("cardNo")
                .and_then(Value::as_str)
                .is_some_and(|id| !id.is_empty());
            if !has_id {
                continue;
            }
            match CardRecord::deserialize(&entry) {
                Ok(mut record) => {
                    if record.series.is_empty() {
                        record.series = series_of(&record.id).to_string();
                    }
                    backfill_legacy_columns(&mut record, &entry);
                    snapshot.upsert(record);
                }
                Err(err) => tracing::warn!(error = %err, "dropping undecodable snapshot entry"),
            }
        }
        tracing::info!(path = %self.path.display(), records = snapshot.len(), "loaded snapshot");
        snapshot
    }

    /// Writes the snapshot atomically, sorted by id. An empty snapshot is never written.
    ///
    /// Returns whether the file was written.
    pub fn save(&self, snapshot: &Snapshot) -> Result<bool, SnapshotError> {
        if snapshot.is_empty() {
            tracing::warn!(path = %self.path.display(), "refusing to overwrite snapshot with an empty catalog");
            return Ok(false);
        }
        let records: Vec<&CardRecord> = snapshot.iter().collect();
        let mut encoded = serde_json::to_vec_pretty(&records)?;
        encoded.push(b'\n');

        let io_err = |source: io::Error| SnapshotError::Io {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(io_err)?;
        let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
        temp.write_all(&encoded).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|err| io_err(err.error))?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "snapshot saved");
        Ok(true)
    }

    /// Saves, logging instead of propagating failures.
    pub fn checkpoint(&self, snapshot: &Snapshot) {
        if let Err(err) = self.save(snapshot) {
            tracing::warn!(error = %err, "snapshot checkpoint failed");
        }
    }
}

fn backfill_legacy_columns(record: &mut CardRecord, entry: &Value) {
    let absent = |key: &str| entry.get(key).is_none();
    let metadata = record.metadata.clone();
    let meta = |key: &str| metadata.get(key);

    if absent("hp") {
        if let Some(hp) = meta("hp").or_else(|| meta("def")) {
            record.hp = tolerant_u32(hp);
        }
    }
    if absent("ap") {
        let ap = entry.get("apData").and_then(Value::as_str).or_else(|| meta("atk"));
        if let Some(ap) = ap {
            record.attack_power = tolerant_u32(ap);
        }
    }
    if absent("level") {
        if let Some(level) = meta("level") {
            record.level = tolerant_u32(level);
        }
    }
    if absent("trait") {
        if let Some(card_trait) = meta("trait") {
            record.card_trait = card_trait.to_string();
        }
    }
    if absent("release") {
        if let Some(release) = meta("release_pack") {
            record.release = release.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: &str, name: &str) -> CardRecord {
        let mut record = CardRecord::new(id, name);
        record.image = format!("https://img.test/{id}.webp");
        record
    }

    #[test]
    fn saves_sorted_by_id_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("cards.json"));
        let snapshot: Snapshot = [record("ST01-002", "Zaku"), record("GD01-001", "Gundam")]
            .into_iter()
            .collect();

        assert!(store.save(&snapshot).unwrap());

        let raw: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let ids: Vec<&str> = raw.iter().map(|v| v["cardNo"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["GD01-001", "ST01-002"]);
        assert_eq!(store.load(), snapshot);
    }

    #[test]
    fn empty_snapshot_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("cards.json"));
        let snapshot: Snapshot = [record("ST01-001", "Gundam")].into_iter().collect();
        store.save(&snapshot).unwrap();

        assert!(!store.save(&Snapshot::new()).unwrap());
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn load_skips_idless_and_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.json");
        fs::write(
            &path,
            r#"[
                {"cardNo": "ST01-001", "name": "Gundam", "series": "ST01"},
                {"name": "orphan"},
                {"cardNo": "ST01-002", "name": 7},
                {"cardNo": "", "name": "blank"}
            ]"#,
        )
        .unwrap();

        let snapshot = SnapshotStore::new(&path).load();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("ST01-001").map(|r| r.name.as_str()), Some("Gundam"));
    }

    const LEGACY_ENTRY: &str = r#"[
  {
    "cardNo": "ST01-001",
    "originalId": "ST01-001",
    "name": "Gundam",
    "series": "ST01",
    "cost": 4,
    "color": "Blue",
    "rarity": "LR",
    "apData": "4",
    "effectData": "【Deploy】Draw 1.",
    "categoryData": "UNIT",
    "image": "https://res.cloudinary.com/demo/image/upload/v1/gundam_cards/ST01-001.webp",
    "metadata": "{\"atk\": \"4\", \"block_icon\": \"-\", \"def\": \"5\", \"hp\": \"5\", \"level\": \"5\", \"link\": \"[Amuro Ray]\", \"release_pack\": \"ST01\", \"source_title\": \"Mobile Suit Gundam\", \"trait\": \"(Earth Federation)\", \"type\": \"UNIT\", \"variants\": [], \"zone\": \"Space\"}",
    "last_updated": "2025-11-20 10:00:00.123456"
  }
]"#;

    const LEGACY_PAGE: &str = r#"
        <div class="cardName">Gundam</div>
        <dl><dt>Lv.</dt><dd>5</dd></dl>
        <dl><dt>COST</dt><dd>4</dd></dl>
        <dl><dt>HP</dt><dd>5</dd></dl>
        <dl><dt>AP</dt><dd>4</dd></dl>
        <dl><dt>RARITY</dt><dd>LR</dd></dl>
        <dl><dt>COLOR</dt><dd>Blue</dd></dl>
        <dl><dt>TYPE</dt><dd>UNIT</dd></dl>
        <dl><dt>Zone</dt><dd>Space</dd></dl>
        <dl><dt>Trait</dt><dd>(Earth Federation)</dd></dl>
        <dl><dt>Link</dt><dd>[Amuro Ray]</dd></dl>
        <dl><dt>Source Title</dt><dd>Mobile Suit Gundam</dd></dl>
        <dl><dt>Where to get it</dt><dd>ST01</dd></dl>
        <div class="cardDataRow overview"><div class="dataTxt">【Deploy】Draw 1.</div></div>
    "#;

    #[test]
    fn older_layout_loads_with_stats_filled_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.json");
        fs::write(&path, LEGACY_ENTRY).unwrap();

        let snapshot = SnapshotStore::new(&path).load();

        let card = snapshot.get("ST01-001").expect("legacy entry kept");
        assert_eq!((card.hp, card.attack_power, card.level, card.cost), (5, 4, 5, 4));
        assert_eq!(card.card_trait, "(Earth Federation)");
        assert_eq!(card.release, "ST01");
        assert_eq!(card.last_updated_epoch_ms, 0);
        assert_eq!(crate::purge::violation(card), None);
    }

    #[test]
    fn older_layout_matches_a_fresh_scan_of_the_same_page() {
        use crate::normalizer::{FetchedPage, NormalizationConfig, Normalizer};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.json");
        fs::write(&path, LEGACY_ENTRY).unwrap();
        let stored = SnapshotStore::new(&path).load();
        let stored = stored.get("ST01-001").unwrap();

        let page = FetchedPage::new(
            "ST01-001",
            url::Url::parse("https://www.gundam-gcg.com/en/cards/detail.php?detailSearch=ST01-001")
                .unwrap(),
            200,
            LEGACY_PAGE.as_bytes().to_vec(),
        );
        let mut fresh = Normalizer::new(NormalizationConfig::default())
            .normalize(&page)
            .unwrap();
        fresh.image = stored.image.clone();

        assert_eq!(fresh.metadata, stored.metadata);
        assert!(fresh.same_content(stored));
    }

    #[test]
    fn missing_or_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SnapshotStore::new(dir.path().join("absent.json")).load().is_empty());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(SnapshotStore::new(&corrupt).load().is_empty());
    }
}
