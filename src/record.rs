//! Canonical catalog record shape and content-level change detection.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel for categorical attributes the remote page never mentioned.
pub const MISSING: &str = "-";
/// Sentinel used by the remote catalog for colorless cards.
pub const NOT_APPLICABLE: &str = "N/A";
/// Category assumed when the page carries no type label.
pub const DEFAULT_CATEGORY: &str = "UNIT";

/// One card in the catalog, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    /// Card number, e.g. `ST01-001`.
    #[serde(rename = "cardNo")]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Set code derived from the id.
    #[serde(default)]
    pub series: String,
    /// Play cost.
    #[serde(default)]
    pub cost: u32,
    /// Hit points.
    #[serde(default)]
    pub hp: u32,
    /// Attack power.
    #[serde(default, rename = "ap")]
    pub attack_power: u32,
    /// Card level.
    #[serde(default)]
    pub level: u32,
    /// Card color.
    #[serde(default = "not_applicable")]
    pub color: String,
    /// Rarity code.
    #[serde(default = "missing")]
    pub rarity: String,
    /// Card category (`UNIT`, `PILOT`, `COMMAND`, ...).
    #[serde(default = "default_category", rename = "categoryData")]
    pub category: String,
    /// Trait line.
    #[serde(default = "missing", rename = "trait")]
    pub card_trait: String,
    /// Where the card was released.
    #[serde(default = "missing")]
    pub release: String,
    /// Ability text.
    #[serde(default, rename = "effectData")]
    pub effect: String,
    /// Mirrored image URL, or the original source URL when mirroring failed.
    #[serde(default)]
    pub image: String,
    /// Auxiliary fields that were not promoted to top-level attributes.
    #[serde(default)]
    pub metadata: ExtendedMetadata,
    /// Deck identifier -> copies of this card in the deck.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub decks: BTreeMap<String, u32>,
    /// Epoch milliseconds of the last scan that saw this card.
    #[serde(default, rename = "last_updated", deserialize_with = "lenient_epoch_ms")]
    pub last_updated_epoch_ms: u64,
}

impl CardRecord {
    /// Builds an empty record for `id` with every attribute at its sentinel.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let series = series_of(&id).to_string();
        Self {
            id,
            name: name.into(),
            series,
            cost: 0,
            hp: 0,
            attack_power: 0,
            level: 0,
            color: not_applicable(),
            rarity: missing(),
            category: default_category(),
            card_trait: missing(),
            release: missing(),
            effect: String::new(),
            image: String::new(),
            metadata: ExtendedMetadata::default(),
            decks: BTreeMap::new(),
            last_updated_epoch_ms: 0,
        }
    }

    /// Compares every field except `last_updated_epoch_ms`.
    pub fn same_content(&self, other: &Self) -> bool {
        let Self {
            id,
            name,
            series,
            cost,
            hp,
            attack_power,
            level,
            color,
            rarity,
            category,
            card_trait,
            release,
            effect,
            image,
            metadata,
            decks,
            last_updated_epoch_ms: _,
        } = self;
        *id == other.id
            && *name == other.name
            && *series == other.series
            && *cost == other.cost
            && *hp == other.hp
            && *attack_power == other.attack_power
            && *level == other.level
            && *color == other.color
            && *rarity == other.rarity
            && *category == other.category
            && *card_trait == other.card_trait
            && *release == other.release
            && *effect == other.effect
            && *image == other.image
            && *metadata == other.metadata
            && *decks == other.decks
    }

    /// CRC32 over the serialized record with the timestamp zeroed.
    pub fn content_checksum(&self) -> u32 {
        let mut canonical = self.clone();
        canonical.last_updated_epoch_ms = 0;
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        hasher.finalize()
    }

    /// Stamps the record with the current wall clock.
    pub fn touch(&mut self) {
        self.last_updated_epoch_ms = epoch_ms();
    }
}

/// Returns the set code portion of a card id (`ST01-001` -> `ST01`).
pub fn series_of(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

/// Formats the card id for `index` within set `code`.
pub fn card_id(code: &str, index: u32) -> String {
    format!("{code}-{index:03}")
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

fn missing() -> String {
    MISSING.to_string()
}

fn not_applicable() -> String {
    NOT_APPLICABLE.to_string()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

// Older snapshots wrote a local datetime string here; anything that is not a
// non-negative integer reads as 0, which only marks the card as long unseen.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Millis(u64),
    Text(String),
    Other(serde_json::Value),
}

fn lenient_epoch_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match TimestampRepr::deserialize(deserializer)? {
        TimestampRepr::Millis(ms) => ms,
        TimestampRepr::Text(text) => text.trim().parse().unwrap_or(0),
        TimestampRepr::Other(_) => 0,
    })
}

/// Sorted key/value bag serialized as a nested object.
///
/// Keys always come out in lexicographic order so two scans of an unchanged page
/// produce byte-identical output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtendedMetadata(BTreeMap<String, String>);

impl ExtendedMetadata {
    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no entries are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// Older snapshots stored metadata as a JSON-encoded string with mixed value types.
#[derive(Deserialize)]
#[serde(untagged)]
enum MetadataRepr {
    Map(BTreeMap<String, serde_json::Value>),
    Encoded(String),
}

impl<'de> Deserialize<'de> for ExtendedMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = match MetadataRepr::deserialize(deserializer)? {
            MetadataRepr::Map(map) => map,
            MetadataRepr::Encoded(text) if text.trim().is_empty() => BTreeMap::new(),
            MetadataRepr::Encoded(text) => serde_json::from_str(&text).map_err(de::Error::custom)?,
        };
        Ok(Self(
            map.into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CardRecord {
        let mut record = CardRecord::new("ST01-001", "Gundam");
        record.hp = 4;
        record.attack_power = 3;
        record.metadata.insert("zone", "Space");
        record
    }

    #[test]
    fn timestamp_only_difference_is_unchanged() {
        let a = sample();
        let mut b = sample();
        b.last_updated_epoch_ms = 1_700_000_000_000;
        assert!(a.same_content(&b));
        assert_eq!(a.content_checksum(), b.content_checksum());
    }

    #[test]
    fn any_other_difference_is_a_change() {
        let a = sample();

        let mut b = sample();
        b.effect = "【Deploy】Draw 1.".to_string();
        assert!(!a.same_content(&b));

        let mut c = sample();
        c.metadata.insert("zone", "Earth");
        assert!(!a.same_content(&c));

        let mut d = sample();
        d.decks.insert("starter-a".to_string(), 2);
        assert!(!a.same_content(&d));
    }

    #[test]
    fn series_comes_from_id_prefix() {
        assert_eq!(series_of("GD02-117"), "GD02");
        assert_eq!(CardRecord::new("PR01-003", "x").series, "PR01");
        assert_eq!(card_id("ST03", 7), "ST03-007");
    }

    #[test]
    fn metadata_serializes_with_sorted_keys() {
        let mut record = sample();
        record.metadata.insert("block_icon", "2");
        record.metadata.insert("atk", "3");
        let json = serde_json::to_string(&record.metadata).expect("serialize");
        assert_eq!(json, r#"{"atk":"3","block_icon":"2","zone":"Space"}"#);
    }

    #[test]
    fn legacy_string_metadata_is_decoded() {
        let raw = r#"{
            "cardNo": "ST01-002",
            "name": "Zaku",
            "series": "ST01",
            "metadata": "{\"level\": \"2\", \"variants\": []}"
        }"#;
        let record: CardRecord = serde_json::from_str(raw).expect("decode");
        assert_eq!(record.metadata.get("level"), Some("2"));
        assert_eq!(record.metadata.get("variants"), Some("[]"));
        assert_eq!(record.rarity, MISSING);
        assert_eq!(record.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn last_updated_accepts_numbers_and_datetime_strings() {
        let decode = |stamp: &str| {
            let raw = format!(r#"{{"cardNo": "ST01-001", "name": "Gundam", "last_updated": {stamp}}}"#);
            serde_json::from_str::<CardRecord>(&raw)
                .expect("decode")
                .last_updated_epoch_ms
        };
        assert_eq!(decode("1732096800123"), 1_732_096_800_123);
        assert_eq!(decode(r#""1732096800123""#), 1_732_096_800_123);
        assert_eq!(decode(r#""2025-11-20 10:00:00.123456""#), 0);
        assert_eq!(decode("null"), 0);
        assert_eq!(decode("-5"), 0);
    }
}
