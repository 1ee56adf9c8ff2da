//! Deck cross-reference index: which decks contain a card, and how many copies.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DeckEntry {
    #[serde(rename = "deckId")]
    deck_id: String,
    #[serde(default)]
    cards: Vec<DeckCard>,
}

#[derive(Debug, Deserialize)]
struct DeckCard {
    #[serde(rename = "cardNo")]
    card_no: String,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

/// Card id -> (deck id -> quantity).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckIndex {
    by_card: BTreeMap<String, BTreeMap<String, u32>>,
}

impl DeckIndex {
    /// Empty index; every card has no deck associations.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the deck file. A missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no deck index, skipping deck associations");
            return Ok(Self::empty());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read deck index {:?}", path))?;
        Self::from_json(&raw).with_context(|| format!("invalid deck index {:?}", path))
    }

    /// Parses the deck file body.
    pub fn from_json(raw: &str) -> Result<Self> {
        let decks: Vec<DeckEntry> = serde_json::from_str(raw)?;
        let mut index = Self::empty();
        for deck in decks {
            for card in deck.cards {
                *index
                    .by_card
                    .entry(card.card_no)
                    .or_default()
                    .entry(deck.deck_id.clone())
                    .or_insert(0) += card.quantity;
            }
        }
        Ok(index)
    }

    /// Decks containing `card_id`; empty when none.
    pub fn associations(&self, card_id: &str) -> BTreeMap<String, u32> {
        self.by_card.get(card_id).cloned().unwrap_or_default()
    }

    /// Number of distinct cards referenced by any deck.
    pub fn len(&self) -> usize {
        self.by_card.len()
    }

    /// True when no deck references any card.
    pub fn is_empty(&self) -> bool {
        self.by_card.is_empty()
    }
}
