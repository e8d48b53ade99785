//! Source payload → [`ListingCandidate`](crate::models::ListingCandidate) mapping.
//!
//! Every source module exposes a `map` function returning `Ok(None)` when the
//! listing's city is outside the allow-list. Numeric coercions never fail the
//! whole payload; a malformed value just becomes `None`.

pub mod morizon;
pub mod nieruch;
pub mod olx;
pub mod otodom;

use std::collections::HashSet;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::catalog::{
    is_supported_city, NO_CHILDREN_PHRASES, NO_COMMISSION_PHRASES, NO_PETS_NO_CHILDREN_PHRASES,
    NO_PETS_PHRASES,
};
use crate::storage::PlaceResolver;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[\s.,]\d+)*").expect("number pattern is valid"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Serde helper: an explicit `null` reads as `T::default()`, same as a missing key.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Strip markup, keeping only the text nodes.
pub fn html_to_text(raw: &str) -> String {
    if !raw.contains('<') {
        return raw.to_string();
    }
    let fragment = Html::parse_fragment(raw);
    fragment.root_element().text().collect::<String>()
}

pub fn html_to_text_opt(raw: Option<&str>) -> Option<String> {
    raw.map(html_to_text)
}

/// Collapse whitespace runs into single spaces and trim.
pub fn clean_text(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Text of an element: trimmed text nodes, empty ones dropped, joined by `sep`.
pub fn element_text(element: ElementRef<'_>, sep: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Capitalize the first letter of every word and lowercase the rest.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_is_letter = false;
    for ch in name.trim().chars() {
        if prev_is_letter {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        prev_is_letter = ch.is_alphabetic();
    }
    out
}

/// Trim and drop trailing slashes; empty input becomes `None`.
pub fn normalize_url(url: Option<&str>) -> Option<String> {
    let url = url?.trim().trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_string())
}

/// First number-looking run in free text: `"3 200 zł"` → `3200.0`, `"47,24 m²"` → `47.24`.
pub fn num_from_text(text: &str) -> Option<f64> {
    let found = NUMBER.find(text)?;
    let digits: String = found
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    digits.trim_end_matches('.').parse().ok()
}

/// Best-effort float from a JSON scalar. Strings may use a decimal comma;
/// arrays yield their first element.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim().replace(',', ".");
            if s.is_empty() || s == "null" {
                None
            } else {
                s.parse().ok()
            }
        }
        Value::Array(items) => items.first().and_then(value_to_f64),
        _ => None,
    }
}

pub fn value_to_i64(value: &Value) -> Option<i64> {
    value_to_f64(value).map(|v| v as i64)
}

/// String form of a JSON scalar (numbers are formatted, null is `None`).
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve `href` against `base`; relative and absolute links both work.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let base = reqwest::Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(String::from)
}

/// Remove empty strings and repeats, first occurrence wins.
pub fn dedupe_keep_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

/// Tri-state listing flags derived from free text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub pets_allowed: Option<bool>,
    pub child_allowed: Option<bool>,
    pub no_comission: Option<bool>,
}

/// Case-insensitive phrase search over `description + title`.
///
/// A combined no-pets-no-children phrase sets both flags and skips the
/// individual lists. The commission check is independent of both.
pub fn detect_flags(description: Option<&str>, title: Option<&str>) -> Flags {
    let text = format!("{} {}", description.unwrap_or(""), title.unwrap_or("")).to_lowercase();
    let has_any = |phrases: &[&str]| phrases.iter().any(|p| text.contains(p));

    let mut flags = Flags::default();
    if has_any(NO_COMMISSION_PHRASES) {
        flags.no_comission = Some(true);
    }

    if has_any(NO_PETS_NO_CHILDREN_PHRASES) {
        flags.pets_allowed = Some(false);
        flags.child_allowed = Some(false);
        return flags;
    }
    if has_any(NO_PETS_PHRASES) {
        flags.pets_allowed = Some(false);
    }
    if has_any(NO_CHILDREN_PHRASES) {
        flags.child_allowed = Some(false);
    }
    flags
}

/// Resolved place ids for a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Place {
    pub city_id: i64,
    pub district_id: Option<i64>,
}

/// Title-case the names, enforce the city allow-list, then upsert.
pub async fn resolve_place(
    places: &PlaceResolver,
    city: Option<&str>,
    district: Option<&str>,
) -> Result<Option<Place>> {
    let Some(city) = city.map(title_case).filter(|c| is_supported_city(c)) else {
        return Ok(None);
    };
    let city_id = places.upsert_city_by_name_pl(&city).await?;

    let district_id = match district.map(title_case).filter(|d| !d.is_empty()) {
        Some(name) => Some(places.upsert_district_by_name_pl(city_id, &name).await?),
        None => None,
    };

    Ok(Some(Place {
        city_id,
        district_id,
    }))
}
