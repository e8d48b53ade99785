//! OLX offers API (`/api/v1/offers/`) payloads.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{
    detect_flags, html_to_text_opt, normalize_url, null_default, resolve_place, value_to_f64,
    value_to_string,
};
use crate::models::{DealType, ListingCandidate, Market, PropertyType, Source};
use crate::storage::PlaceResolver;

const DEFAULT_PHOTO_WIDTH: &str = "1024";
const DEFAULT_PHOTO_HEIGHT: &str = "768";

static FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("integer pattern is valid"));

/// One entry of the search response `data` array.
#[derive(Debug, Clone, Deserialize)]
pub struct OlxOffer {
    pub id: Value,
    pub url: Option<String>,
    pub external_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub location: OlxLocation,
    #[serde(default, deserialize_with = "null_default")]
    pub params: Vec<OlxParam>,
    #[serde(default, deserialize_with = "null_default")]
    pub photos: Vec<OlxPhoto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OlxLocation {
    pub city: Option<OlxNamed>,
    pub district: Option<OlxNamed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OlxNamed {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OlxParam {
    pub key: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub value: OlxParamValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OlxParamValue {
    #[serde(default)]
    pub key: Value,
    pub label: Option<String>,
    #[serde(default)]
    pub value: Value,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OlxPhoto {
    pub link: Option<String>,
    #[serde(default)]
    pub width: Value,
    #[serde(default)]
    pub height: Value,
}

impl OlxPhoto {
    fn resolve(&self) -> Option<String> {
        let link = self.link.as_deref()?;
        let width = value_to_string(&self.width).filter(|w| w != "0");
        let height = value_to_string(&self.height).filter(|h| h != "0");
        let (width, height) = match (width, height) {
            (Some(w), Some(h)) => (w, h),
            _ => (DEFAULT_PHOTO_WIDTH.to_string(), DEFAULT_PHOTO_HEIGHT.to_string()),
        };
        Some(link.replace("{width}", &width).replace("{height}", &height))
    }
}

/// Numeric offer id used by the scan cursor; `None` when absent or non-numeric.
pub fn offer_id(raw: &Value) -> Option<u64> {
    match raw.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn rooms_from(value: &OlxParamValue) -> Option<i64> {
    let key = value_to_string(&value.key).unwrap_or_default().to_lowercase();
    match key.as_str() {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "more" => Some(10),
        _ => value
            .label
            .as_deref()
            .and_then(|label| FIRST_INT.find(label))
            .and_then(|m| m.as_str().parse().ok()),
    }
}

pub async fn map(
    places: &PlaceResolver,
    raw: &Value,
    property_type: PropertyType,
    deal_type: DealType,
) -> Result<Option<ListingCandidate>> {
    let offer: OlxOffer = serde_json::from_value(raw.clone()).context("Malformed OLX offer")?;

    let city = offer.location.city.as_ref().and_then(|c| c.name.as_deref());
    let district = offer.location.district.as_ref().and_then(|d| d.name.as_deref());
    let Some(place) = resolve_place(places, city, district).await? else {
        return Ok(None);
    };

    let source_ad_id = value_to_string(&offer.id).context("OLX offer without id")?;
    let url = normalize_url(offer.url.as_deref()).context("OLX offer without url")?;
    let title = html_to_text_opt(offer.title.as_deref());
    let description = html_to_text_opt(offer.description.as_deref());

    let mut flags = detect_flags(description.as_deref(), title.as_deref());
    let mut area_m2 = None;
    let mut rooms = None;
    let mut price = None;
    let mut currency = None;
    let mut market = Market::Unknown;

    for param in &offer.params {
        let value = &param.value;
        match param.key.as_deref() {
            Some("m") => area_m2 = value_to_f64(&value.key),
            Some("rooms") => rooms = rooms_from(value).or(rooms),
            Some("price") => {
                price = value_to_f64(&value.value).or(price);
                currency = value.currency.clone().or(currency);
            }
            Some("pets") | Some("animals") => match value_to_string(&value.key).as_deref() {
                Some("Tak") => flags.pets_allowed = Some(true),
                Some("Nie") => flags.pets_allowed = Some(false),
                _ => {}
            },
            Some("market") => {
                if let Some(label) = value_to_string(&value.key) {
                    market = Market::from_label(&label);
                }
            }
            _ => {}
        }
    }

    let photos = offer.photos.iter().filter_map(OlxPhoto::resolve).collect();

    Ok(Some(ListingCandidate {
        source: Source::Olx,
        source_ad_id,
        url,
        external_url: normalize_url(offer.external_url.as_deref()),
        deal_type,
        property_type,
        title,
        description,
        price,
        currency: currency.or_else(|| price.map(|_| "PLN".to_string())),
        city_id: place.city_id,
        district_id: place.district_id,
        address: None,
        area_m2,
        rooms,
        market,
        pets_allowed: flags.pets_allowed,
        child_allowed: flags.child_allowed,
        no_comission: flags.no_comission,
        photos,
        raw: raw.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use serde_json::json;

    fn offer() -> Value {
        json!({
            "id": 912345678,
            "url": "https://www.olx.pl/d/oferta/mieszkanie-CID3-ID1abc.html/",
            "external_url": null,
            "title": "Mieszkanie 2 pokoje Kazimierz",
            "description": "<p>Słoneczne mieszkanie.<br/>Bez zwierząt. Bez prowizji!</p>",
            "location": {
                "city": {"id": 8959, "name": "Kraków"},
                "district": {"id": 261, "name": "Stare miasto"}
            },
            "params": [
                {"key": "price", "value": {"value": 3200, "currency": "PLN", "label": "3 200 zł"}},
                {"key": "m", "value": {"key": "48,5", "label": "48,5 m²"}},
                {"key": "rooms", "value": {"key": "two", "label": "2 pokoje"}},
                {"key": "pets", "value": {"key": "Tak", "label": "Tak"}},
                {"key": "market", "value": {"key": "secondary", "label": "Wtórny"}}
            ],
            "photos": [
                {"link": "https://ireland.apollo.olxcdn.com/v1/files/a/image;s={width}x{height}", "width": 1200, "height": 900},
                {"link": "https://ireland.apollo.olxcdn.com/v1/files/b/image;s={width}x{height}"}
            ]
        })
    }

    #[tokio::test]
    async fn maps_search_offer() {
        let db = Database::in_memory().await.unwrap();
        let raw = offer();
        let candidate = map(&db.places(), &raw, PropertyType::Apartment, DealType::Rent)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(candidate.source_ad_id, "912345678");
        assert_eq!(candidate.url, "https://www.olx.pl/d/oferta/mieszkanie-CID3-ID1abc.html");
        assert_eq!(candidate.description.as_deref(), Some("Słoneczne mieszkanie.Bez zwierząt. Bez prowizji!"));
        assert_eq!(candidate.price, Some(3200.0));
        assert_eq!(candidate.currency.as_deref(), Some("PLN"));
        assert_eq!(candidate.area_m2, Some(48.5));
        assert_eq!(candidate.rooms, Some(2));
        assert_eq!(candidate.market, Market::Secondary);
        // explicit param overrides the phrase match
        assert_eq!(candidate.pets_allowed, Some(true));
        assert_eq!(candidate.no_comission, Some(true));
        assert!(candidate.district_id.is_some());
        assert_eq!(
            candidate.photos,
            vec![
                "https://ireland.apollo.olxcdn.com/v1/files/a/image;s=1200x900",
                "https://ireland.apollo.olxcdn.com/v1/files/b/image;s=1024x768",
            ]
        );
        assert_eq!(candidate.raw, raw);
    }

    #[tokio::test]
    async fn rooms_fall_back_to_label_digits() {
        let db = Database::in_memory().await.unwrap();
        let mut raw = offer();
        raw["params"] = json!([{"key": "rooms", "value": {"key": "six", "label": "6 pokoi"}}]);

        let candidate = map(&db.places(), &raw, PropertyType::House, DealType::Sale)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.rooms, Some(6));
        assert_eq!(candidate.price, None);
        assert_eq!(candidate.currency, None);
        assert_eq!(candidate.pets_allowed, Some(false));
    }

    #[tokio::test]
    async fn unsupported_city_is_skipped() {
        let db = Database::in_memory().await.unwrap();
        let mut raw = offer();
        raw["location"] = json!({"city": {"name": "Radom"}});

        let mapped = map(&db.places(), &raw, PropertyType::Apartment, DealType::Rent)
            .await
            .unwrap();
        assert!(mapped.is_none());
    }

    #[tokio::test]
    async fn null_collections_read_as_empty() {
        let db = Database::in_memory().await.unwrap();
        let mut raw = offer();
        raw["params"] = Value::Null;
        raw["photos"] = Value::Null;

        let candidate = map(&db.places(), &raw, PropertyType::Apartment, DealType::Rent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.price, None);
        assert_eq!(candidate.rooms, None);
        assert!(candidate.photos.is_empty());

        // a null location carries no city, so the offer is skipped rather than rejected
        raw["location"] = Value::Null;
        let mapped = map(&db.places(), &raw, PropertyType::Apartment, DealType::Rent)
            .await
            .unwrap();
        assert!(mapped.is_none());
    }

    #[test]
    fn offer_ids_accept_numbers_and_strings() {
        assert_eq!(offer_id(&json!({"id": 42})), Some(42));
        assert_eq!(offer_id(&json!({"id": "43"})), Some(43));
        assert_eq!(offer_id(&json!({"id": null})), None);
        assert_eq!(offer_id(&json!({})), None);
    }
}
