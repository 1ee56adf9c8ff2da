//! Integrity purge: drops records that cannot be valid catalog entries.

use crate::record::{CardRecord, DEFAULT_CATEGORY, MISSING, NOT_APPLICABLE};
use crate::snapshot::Snapshot;
use std::fmt;

/// Why a record was purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeReason {
    /// No card id.
    MissingId,
    /// Name empty or a placeholder.
    MissingName,
    /// No image reference.
    MissingImage,
    /// A unit with neither hit points nor attack power.
    StatlessUnit,
}

impl fmt::Display for PurgeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingId => "missing id",
            Self::MissingName => "missing name",
            Self::MissingImage => "missing image",
            Self::StatlessUnit => "unit without hp or ap",
        };
        f.write_str(text)
    }
}

/// Result of a purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Surviving records.
    pub kept: Snapshot,
    /// Removed ids with the first failed check.
    pub removed: Vec<(String, PurgeReason)>,
}

/// First integrity check `record` fails, if any.
pub fn violation(record: &CardRecord) -> Option<PurgeReason> {
    if record.id.trim().is_empty() {
        return Some(PurgeReason::MissingId);
    }
    let name = record.name.trim();
    if name.is_empty() || name == MISSING || name == NOT_APPLICABLE {
        return Some(PurgeReason::MissingName);
    }
    if record.image.trim().is_empty() {
        return Some(PurgeReason::MissingImage);
    }
    // Units always print hp and ap; a unit with neither is a half-parsed page.
    if record.category.eq_ignore_ascii_case(DEFAULT_CATEGORY)
        && record.hp == 0
        && record.attack_power == 0
    {
        return Some(PurgeReason::StatlessUnit);
    }
    None
}

/// Splits `snapshot` into valid records and removed ids. Each removal is logged.
pub fn purge(snapshot: &Snapshot) -> PurgeOutcome {
    let mut outcome = PurgeOutcome::default();
    for record in snapshot.iter() {
        match violation(record) {
            None => {
                outcome.kept.upsert(record.clone());
            }
            Some(reason) => {
                tracing::warn!(card_id = record.id.as_str(), %reason, "purging invalid record");
                outcome.removed.push((record.id.clone(), reason));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(id: &str, name: &str, hp: u32, ap: u32) -> CardRecord {
        let mut record = CardRecord::new(id, name);
        record.image = format!("https://img.test/{id}.webp");
        record.hp = hp;
        record.attack_power = ap;
        record
    }

    #[test]
    fn removes_exactly_the_invalid_records() {
        let mut no_image = unit("ST01-004", "Guncannon", 3, 2);
        no_image.image.clear();
        let mut pilot = unit("ST01-010", "Amuro Ray", 0, 0);
        pilot.category = "PILOT".to_string();
        let mut lowercase_unit = unit("ST01-011", "Ball", 0, 0);
        lowercase_unit.category = "unit".to_string();

        let snapshot: Snapshot = [
            unit("ST01-001", "Gundam", 5, 4),
            unit("ST01-002", "  ", 5, 4),
            unit("ST01-003", "N/A", 5, 4),
            no_image,
            unit("ST01-005", "Zaku II", 0, 0),
            unit("ST01-006", "Gouf", 0, 5),
            pilot,
            lowercase_unit,
        ]
        .into_iter()
        .collect();

        let outcome = purge(&snapshot);

        assert_eq!(
            outcome.removed,
            vec![
                ("ST01-002".to_string(), PurgeReason::MissingName),
                ("ST01-003".to_string(), PurgeReason::MissingName),
                ("ST01-004".to_string(), PurgeReason::MissingImage),
                ("ST01-005".to_string(), PurgeReason::StatlessUnit),
                ("ST01-011".to_string(), PurgeReason::StatlessUnit),
            ]
        );
        let kept: Vec<&str> = outcome.kept.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(kept, vec!["ST01-001", "ST01-006", "ST01-010"]);
    }

    #[test]
    fn clean_snapshot_is_untouched() {
        let snapshot: Snapshot = [unit("GD01-001", "Gundam", 5, 4)].into_iter().collect();
        let outcome = purge(&snapshot);
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.kept, snapshot);
    }
}
