//! Card detail page harvesting built on `scraper`.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Label/value pairs and text blocks lifted from one card detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPage {
    /// Trimmed card title.
    pub title: String,
    /// Every `dt`/`dd` pair in document order, label and value trimmed.
    pub fields: Vec<(String, String)>,
    /// Block icon text, when present.
    pub block_icon: Option<String>,
    /// Ability text with `<br>` turned into newlines.
    pub effect: Option<String>,
}

/// Compiled selectors for the card detail markup.
#[derive(Clone)]
pub struct PageSelectors {
    title: Selector,
    label: Selector,
    block_icon: Selector,
    effect: Selector,
}

impl PageSelectors {
    /// Compiles the selector set.
    pub fn new() -> Self {
        Self {
            title: Selector::parse(".cardName, h1").expect("title selector"),
            label: Selector::parse("dt").expect("label selector"),
            block_icon: Selector::parse(".blockIcon").expect("block icon selector"),
            effect: Selector::parse(".cardDataRow.overview .dataTxt").expect("effect selector"),
        }
    }

    /// True when the document carries a non-empty title element.
    pub fn has_title(&self, body: &str) -> bool {
        let document = Html::parse_document(body);
        self.title_of(&document).is_some()
    }

    /// Extracts the card page, or `None` when no usable title exists.
    pub fn harvest(&self, body: &str) -> Option<CardPage> {
        let document = Html::parse_document(body);
        let title = self.title_of(&document)?;

        let mut fields = Vec::new();
        for label in document.select(&self.label) {
            let Some(value) = next_sibling_named(label, "dd") else {
                continue;
            };
            fields.push((
                collapse_whitespace(&label.text().collect::<String>()),
                collapse_whitespace(&value.text().collect::<String>()),
            ));
        }

        let block_icon = document
            .select(&self.block_icon)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()));
        let effect = document
            .select(&self.effect)
            .next()
            .map(text_with_breaks);

        Some(CardPage {
            title,
            fields,
            block_icon,
            effect,
        })
    }

    fn title_of(&self, document: &Html) -> Option<String> {
        let element = document.select(&self.title).next()?;
        let title = collapse_whitespace(&element.text().collect::<String>());
        (!title.is_empty()).then_some(title)
    }
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self::new()
    }
}

const SET_CODE: &str = "[A-Z]{2,}[0-9]{2}";

fn set_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(&format!("^{SET_CODE}$")).expect("valid set code pattern"))
}

fn bracketed_set_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"\[\s*({SET_CODE})\s*\]")).expect("valid bracketed set code pattern")
    })
}

/// Pulls bracketed set codes such as `[GD01]` out of a listing page, first occurrence order.
pub fn set_codes_in_listing(body: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for captures in bracketed_set_code_pattern().captures_iter(body) {
        let code = &captures[1];
        if !codes.iter().any(|seen| seen == code) {
            codes.push(code.to_string());
        }
    }
    codes
}

/// Set codes are two or more ASCII capitals followed by exactly two digits.
pub fn is_set_code(token: &str) -> bool {
    set_code_pattern().is_match(token)
}

fn next_sibling_named<'a>(element: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sibling| sibling.value().name() == name)
}

fn text_with_breaks(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => raw.push_str(text),
            Node::Element(el) if el.name() == "br" => raw.push('\n'),
            _ => {}
        }
    }
    raw.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r#"
        <html><body>
          <div class="cardName">  RX-78-2  Gundam </div>
          <div class="blockIcon">1</div>
          <dl><dt>Lv.</dt><dd>4</dd></dl>
          <dl><dt>COST</dt><dd> 3 </dd></dl>
          <dl><dt>Orphan</dt></dl>
          <div class="cardDataRow overview"><div class="dataTxt">【Deploy】Draw 1.<br>  【Attack】Deal 1   damage.</div></div>
        </body></html>
    "#;

    #[test]
    fn harvests_fields_title_and_effect() {
        let page = PageSelectors::new().harvest(DETAIL).expect("card page");
        assert_eq!(page.title, "RX-78-2 Gundam");
        assert_eq!(
            page.fields,
            vec![
                ("Lv.".to_string(), "4".to_string()),
                ("COST".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(page.block_icon.as_deref(), Some("1"));
        assert_eq!(
            page.effect.as_deref(),
            Some("【Deploy】Draw 1.\n【Attack】Deal 1 damage.")
        );
    }

    #[test]
    fn blank_title_is_not_a_card() {
        let selectors = PageSelectors::new();
        assert!(selectors.harvest("<h1>   </h1><dt>COST</dt><dd>1</dd>").is_none());
        assert!(!selectors.has_title("<p>card list</p>"));
        assert!(selectors.has_title("<h1>Char's Zaku</h1>"));
    }

    #[test]
    fn listing_tokens_are_filtered_and_deduplicated() {
        let body = "<li>NEWTYPE RISING [GD01]</li><li>[ST01] [link] [GD01] [ST1] [EB123]</li>";
        assert_eq!(set_codes_in_listing(body), vec!["GD01", "ST01"]);
    }

    #[test]
    fn nested_brackets_and_padding_still_yield_codes() {
        let body = "<p>[a [GD02]</p><p>[ PR01 ]</p><p>[gd03] [GD1] [ST01-001]</p>";
        assert_eq!(set_codes_in_listing(body), vec!["GD02", "PR01"]);
    }

    #[test]
    fn set_code_shape() {
        assert!(is_set_code("ST01"));
        assert!(is_set_code("EXB10"));
        assert!(!is_set_code("st01"));
        assert!(!is_set_code("G01"));
        assert!(!is_set_code("GD011"));
        assert!(!is_set_code("GD01 "));
    }
}
