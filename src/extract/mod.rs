//! Field extraction from match-card fragments.
//!
//! A [`FieldLocator`] names one scalar field inside a card:
//! - `".match-date"` reads the trimmed text of the first matching descendant
//! - `"@data-match-id"` reads an attribute of the card element itself
//! - `"a.vod@href"` reads an attribute of the first matching descendant
//!
//! Absent fields come back as an empty string. Interpreting "empty" is the
//! caller's job: optional fields treat it as unset, required numeric and
//! date fields fail the whole card.

use chrono::NaiveDate;
use scraper::{ElementRef, Selector};
use thiserror::Error;

/// Date format used on the results page, e.g. `15 Mar 2025`.
pub const CARD_DATE_FORMAT: &str = "%d %b %Y";

/// Errors raised while building locators or reading required fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Empty locator")]
    EmptyLocator,

    #[error("Missing required field '{0}'")]
    Missing(&'static str),

    #[error("Field '{field}' is not a number: '{value}'")]
    NotANumber { field: &'static str, value: String },

    #[error("Field '{field}' is not a date (expected DD Mon YYYY): '{value}'")]
    NotADate { field: &'static str, value: String },
}

/// Where a field lives inside a card.
#[derive(Debug, Clone)]
pub enum FieldLocator {
    /// Text of the first descendant matching the selector.
    Text(Selector),

    /// Attribute of the card root (`selector` is `None`) or of the first
    /// matching descendant.
    Attr {
        selector: Option<Selector>,
        name: String,
    },
}

impl FieldLocator {
    /// Parse a locator string.
    pub fn parse(locator: &str) -> Result<Self, ExtractError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ExtractError::EmptyLocator);
        }

        match locator.rsplit_once('@') {
            Some((selector, name)) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ExtractError::EmptyLocator);
                }
                let selector = selector.trim();
                let selector = if selector.is_empty() {
                    None
                } else {
                    Some(parse_selector(selector)?)
                };
                Ok(FieldLocator::Attr {
                    selector,
                    name: name.to_string(),
                })
            }
            None => Ok(FieldLocator::Text(parse_selector(locator)?)),
        }
    }

    /// Read the field from a card fragment. Absent fields yield `""`.
    pub fn extract(&self, fragment: ElementRef<'_>) -> String {
        match self {
            FieldLocator::Text(selector) => fragment
                .select(selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .unwrap_or_default(),
            FieldLocator::Attr { selector, name } => {
                let target = match selector {
                    Some(selector) => fragment.select(selector).next(),
                    None => Some(fragment),
                };
                target
                    .and_then(|el| el.value().attr(name))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            }
        }
    }

    /// Read the field, mapping an empty result to `None`.
    pub fn extract_optional(&self, fragment: ElementRef<'_>) -> Option<String> {
        let value = self.extract(fragment);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Compile a CSS selector, keeping the error message.
pub fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a required non-negative integer. Fails closed.
pub fn parse_required_count(field: &'static str, value: &str) -> Result<u32, ExtractError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ExtractError::Missing(field));
    }
    value.parse().map_err(|_| ExtractError::NotANumber {
        field,
        value: value.to_string(),
    })
}

/// Parse a required card date. Fails closed.
pub fn parse_card_date(field: &'static str, value: &str) -> Result<NaiveDate, ExtractError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ExtractError::Missing(field));
    }
    NaiveDate::parse_from_str(value, CARD_DATE_FORMAT).map_err(|_| ExtractError::NotADate {
        field,
        value: value.to_string(),
    })
}

/// Parse a per-player stat, degrading anything unreadable to zero.
///
/// Thousands separators (`12,450`) are accepted.
pub fn parse_stat_or_zero(value: &str) -> u32 {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse().unwrap_or(0)
}
