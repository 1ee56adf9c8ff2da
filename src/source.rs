//! Remote catalog access: item pages and the optional set listing.

use crate::normalizer::FetchedPage;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Transport-level failures. Callers count these as misses.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be completed.
    #[error("http error for {url}: {source}")]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The URL template produced an unparsable URL.
    #[error("invalid url {url}: {source}")]
    Url {
        /// Rendered URL.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
}

/// Read-only view of the remote catalog.
pub trait CardSource {
    /// Fetches the detail page for `card_id`, bounded by `timeout`.
    ///
    /// Non-200 responses are returned as pages; only transport failures are errors.
    fn fetch_item(&self, card_id: &str, timeout: Duration) -> Result<FetchedPage, FetchError>;

    /// Fetches the set listing page, when the source has one.
    fn fetch_listing(&self, _timeout: Duration) -> Option<String> {
        None
    }
}

/// URL templates for the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoints {
    /// Detail page template; `{}` is replaced with the card id.
    pub item_url_template: String,
    /// Optional set listing page.
    pub listing_url: Option<Url>,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            item_url_template: "https://www.gundam-gcg.com/en/cards/detail.php?detailSearch={}"
                .to_string(),
            listing_url: None,
        }
    }
}

impl SourceEndpoints {
    /// Renders the detail page URL for `card_id`.
    pub fn item_url(&self, card_id: &str) -> Result<Url, FetchError> {
        let rendered = self.item_url_template.replace("{}", card_id);
        Url::parse(&rendered).map_err(|source| FetchError::Url {
            url: rendered,
            source,
        })
    }
}

/// Blocking HTTP implementation of [`CardSource`].
pub struct HttpCardSource {
    client: reqwest::blocking::Client,
    endpoints: SourceEndpoints,
}

impl HttpCardSource {
    /// Builds the HTTP client; redirects are followed so listing bounces are observable.
    pub fn new(endpoints: SourceEndpoints) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client, endpoints })
    }
}

impl CardSource for HttpCardSource {
    fn fetch_item(&self, card_id: &str, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let url = self.endpoints.item_url(card_id)?;
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .map_err(http_err)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response.bytes().map_err(http_err)?.to_vec();
        Ok(FetchedPage::new(card_id, final_url, status, body))
    }

    fn fetch_listing(&self, timeout: Duration) -> Option<String> {
        let url = self.endpoints.listing_url.clone()?;
        match self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
        {
            Ok(body) => Some(body),
            Err(err) => {
                tracing::warn!(%url, error = %err, "set listing unavailable");
                None
            }
        }
    }
}
