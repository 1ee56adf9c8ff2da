//! Turns fetched card detail pages into canonical catalog records.

use crate::html::{CardPage, PageSelectors};
use crate::record::{CardRecord, DEFAULT_CATEGORY, MISSING, NOT_APPLICABLE};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use url::Url;

/// Raw page bytes plus fetch metadata awaiting normalization.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Card id the page was requested for.
    pub card_id: String,
    /// URL after redirects.
    pub final_url: Url,
    /// Timestamp when the fetch completed.
    pub fetched_at: SystemTime,
    /// HTTP response status code.
    pub status: u16,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Builds a new fetched page payload stamped with the current time.
    pub fn new(card_id: impl Into<String>, final_url: Url, status: u16, body: Vec<u8>) -> Self {
        Self {
            card_id: card_id.into(),
            final_url,
            fetched_at: SystemTime::now(),
            status,
            body,
        }
    }

    /// Lossy UTF-8 view of the body.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Normalization tuning knobs.
#[derive(Debug, Clone)]
pub struct NormalizationConfig {
    /// Substring of the final URL that marks a bounce to the generic card list.
    pub listing_marker: String,
    /// Original image URL template; `{}` is replaced with the card id.
    pub image_url_template: String,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            listing_marker: "cardlist".to_string(),
            image_url_template: "https://www.gundam-gcg.com/en/images/cards/card/{}.webp?251120"
                .to_string(),
        }
    }
}

/// Reasons a fetched page does not yield a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    /// The response body was empty.
    EmptyBody,
    /// The response status was not 200.
    Status(u16),
    /// The request was redirected to the generic listing page.
    ListingRedirect,
    /// No title element, or the title trimmed to nothing.
    MissingTitle,
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBody => write!(f, "no body bytes available for normalization"),
            Self::Status(status) => write!(f, "unexpected http status {status}"),
            Self::ListingRedirect => write!(f, "redirected to the card listing"),
            Self::MissingTitle => write!(f, "page has no card title"),
        }
    }
}

impl std::error::Error for NormalizationError {}

/// Stateless card page normalization service.
#[derive(Clone)]
pub struct Normalizer {
    config: NormalizationConfig,
    selectors: PageSelectors,
}

impl Normalizer {
    /// Builds a new normalizer instance.
    pub fn new(config: NormalizationConfig) -> Self {
        Self {
            config,
            selectors: PageSelectors::new(),
        }
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &NormalizationConfig {
        &self.config
    }

    /// Original image URL for `card_id`.
    pub fn image_url(&self, card_id: &str) -> String {
        self.config.image_url_template.replace("{}", card_id)
    }

    /// True when the page is a card detail page with a usable title.
    ///
    /// Used by boundary probing, which only needs the hit/miss verdict.
    pub fn recognizes(&self, page: &FetchedPage) -> bool {
        self.check_envelope(page).is_ok() && self.selectors.has_title(&page.text())
    }

    /// Normalizes a fetched page into a catalog record.
    ///
    /// The record's `image` is the original source URL and `last_updated_epoch_ms` is left at
    /// zero; both are settled by the reconciler.
    pub fn normalize(&self, page: &FetchedPage) -> Result<CardRecord, NormalizationError> {
        self.check_envelope(page)?;
        let card = self
            .selectors
            .harvest(&page.text())
            .ok_or(NormalizationError::MissingTitle)?;
        Ok(self.build_record(&page.card_id, card))
    }

    fn check_envelope(&self, page: &FetchedPage) -> Result<(), NormalizationError> {
        if page.status != 200 {
            return Err(NormalizationError::Status(page.status));
        }
        if page.final_url.as_str().contains(&self.config.listing_marker) {
            return Err(NormalizationError::ListingRedirect);
        }
        if page.body.is_empty() {
            return Err(NormalizationError::EmptyBody);
        }
        Ok(())
    }

    fn build_record(&self, card_id: &str, card: CardPage) -> CardRecord {
        let CardPage {
            title,
            fields,
            block_icon,
            effect,
        } = card;

        let mut known: BTreeMap<Field, String> = BTreeMap::new();
        let mut extra: Vec<(String, String)> = Vec::new();
        for (label, value) in fields {
            match classify(&label) {
                Some(field) => {
                    known.insert(field, value);
                }
                None => extra.push((metadata_key(&label), value)),
            }
        }
        let raw = |field: Field| known.get(&field).map(String::as_str);
        let text = |field: Field, fallback: &str| raw(field).unwrap_or(fallback).to_string();
        let number = |field: Field| raw(field).map(tolerant_u32).unwrap_or(0);

        let mut record = CardRecord::new(card_id, title);
        record.cost = number(Field::Cost);
        record.hp = number(Field::Hp);
        record.attack_power = number(Field::AttackPower);
        record.level = number(Field::Level);
        record.color = text(Field::Color, NOT_APPLICABLE);
        record.rarity = text(Field::Rarity, MISSING);
        record.category = text(Field::Category, DEFAULT_CATEGORY);
        record.card_trait = text(Field::Trait, MISSING);
        record.release = text(Field::Release, MISSING);
        record.effect = effect.unwrap_or_default();
        record.image = self.image_url(card_id);

        let metadata = &mut record.metadata;
        for (key, value) in extra {
            metadata.insert(key, value);
        }
        metadata.insert("level", text(Field::Level, MISSING));
        metadata.insert("hp", text(Field::Hp, MISSING));
        metadata.insert("def", text(Field::Hp, MISSING));
        metadata.insert("atk", text(Field::AttackPower, MISSING));
        metadata.insert("trait", text(Field::Trait, MISSING));
        metadata.insert("type", text(Field::Category, DEFAULT_CATEGORY));
        metadata.insert("zone", text(Field::Zone, MISSING));
        metadata.insert("link", text(Field::Link, MISSING));
        metadata.insert("source_title", text(Field::Source, MISSING));
        metadata.insert("release_pack", text(Field::Release, MISSING));
        metadata.insert("block_icon", block_icon.unwrap_or_else(|| MISSING.to_string()));
        // Variants are never scraped.
        metadata.insert("variants", "[]");
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Level,
    Cost,
    Hp,
    AttackPower,
    Rarity,
    Color,
    Category,
    Zone,
    Trait,
    Link,
    Source,
    Release,
}

// Order matters: the first entry with a matching needle claims the label.
const VOCABULARY: &[(Field, &[&str])] = &[
    (Field::Level, &["lv", "level"]),
    (Field::Cost, &["cost"]),
    (Field::Hp, &["hp"]),
    (Field::AttackPower, &["ap", "atk", "attack"]),
    (Field::Rarity, &["rarity"]),
    (Field::Color, &["color"]),
    (Field::Category, &["type"]),
    (Field::Zone, &["zone"]),
    (Field::Trait, &["trait"]),
    (Field::Link, &["link"]),
    (Field::Source, &["source"]),
    (Field::Release, &["where", "release"]),
];

fn classify(label: &str) -> Option<Field> {
    let label = label.to_lowercase();
    VOCABULARY
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| label.contains(needle)))
        .map(|(field, _)| *field)
}

fn metadata_key(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Keeps only digits and signs, then parses; anything unparsable or negative becomes 0.
pub fn tolerant_u32(raw: &str) -> u32 {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '-' || *ch == '+')
        .collect();
    cleaned
        .parse::<i64>()
        .ok()
        .filter(|value| *value >= 0)
        .map(|value| value.min(u32::MAX as i64) as u32)
        .unwrap_or(0)
}
