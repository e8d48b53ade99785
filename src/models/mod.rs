use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream classifieds site a listing came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Source {
    Olx,
    Otodom,
    Morizon,
    Nieruch,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Olx, Source::Otodom, Source::Morizon, Source::Nieruch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Olx => "olx",
            Source::Otodom => "otodom",
            Source::Morizon => "morizon",
            Source::Nieruch => "nieruch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DealType {
    Rent,
    Sale,
}

impl DealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealType::Rent => "rent",
            DealType::Sale => "sale",
        }
    }
}

impl fmt::Display for DealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PropertyType {
    Apartment,
    House,
    Room,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::House => "house",
            PropertyType::Room => "room",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary (new-build) vs secondary market segment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Market {
    Primary,
    Secondary,
    #[default]
    Unknown,
}

impl Market {
    /// Classify a free-form market label (English keys or Polish `rynek` values).
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if label == "primary" || label.contains("pierwotn") {
            Market::Primary
        } else if label == "secondary" || label.contains("wtórn") || label.contains("wtor") {
            Market::Secondary
        } else {
            Market::Unknown
        }
    }
}

/// A normalized listing ready to be offered to the storage engine.
///
/// Tri-state flags use `None` for "unknown".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingCandidate {
    pub source: Source,
    pub source_ad_id: String,
    pub url: String,
    pub external_url: Option<String>,
    pub deal_type: DealType,
    pub property_type: PropertyType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub city_id: i64,
    pub district_id: Option<i64>,
    pub address: Option<String>,
    pub area_m2: Option<f64>,
    pub rooms: Option<i64>,
    pub market: Market,
    pub pets_allowed: Option<bool>,
    pub child_allowed: Option<bool>,
    pub no_comission: Option<bool>,
    pub photos: Vec<String>,
    pub raw: serde_json::Value,
}

/// A stored listing row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub source: Source,
    pub source_ad_id: String,
    pub url: String,
    pub external_url: Option<String>,
    pub deal_type: DealType,
    pub property_type: PropertyType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub description_hash: Option<String>,
    /// Filled by the translation worker, `None` until then.
    pub title_en: Option<String>,
    pub title_uk: Option<String>,
    pub description_en: Option<String>,
    pub description_uk: Option<String>,
    pub is_translated: bool,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub city_id: i64,
    pub district_id: Option<i64>,
    pub address: Option<String>,
    pub area_m2: Option<f64>,
    pub rooms: Option<i64>,
    pub market: Market,
    pub pets_allowed: Option<bool>,
    pub child_allowed: Option<bool>,
    pub no_comission: Option<bool>,
    pub photos: Vec<String>,
    pub raw: serde_json::Value,
    pub is_active: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct City {
    pub id: i64,
    pub name_pl: String,
    pub name_uk: Option<String>,
    pub name_en: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct District {
    pub id: i64,
    pub city_id: i64,
    pub name_pl: String,
    pub name_uk: Option<String>,
    pub name_en: Option<String>,
}
