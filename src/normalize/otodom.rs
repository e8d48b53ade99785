//! Otodom detail pages: the `props.pageProps.ad` object of `__NEXT_DATA__`.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use super::{
    detect_flags, html_to_text_opt, normalize_url, null_default, resolve_place, value_to_f64,
    value_to_i64, value_to_string,
};
use crate::models::{DealType, ListingCandidate, Market, PropertyType, Source};
use crate::storage::PlaceResolver;

const SITE: &str = "https://www.otodom.pl";

static NEXT_DATA: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script#__NEXT_DATA__[type="application/json"]"#)
        .expect("__NEXT_DATA__ selector is valid")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtodomAd {
    #[serde(default)]
    pub id: Value,
    pub public_id: Option<String>,
    pub url: Option<String>,
    pub relative_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub ad_category: AdCategory,
    #[serde(default, deserialize_with = "null_default")]
    pub location: AdLocation,
    #[serde(default, deserialize_with = "null_default")]
    pub ad_tracking_data: TrackingData,
    #[serde(default, deserialize_with = "null_default")]
    pub characteristics: Vec<Characteristic>,
    #[serde(default, deserialize_with = "null_default")]
    pub target: Target,
    #[serde(default, deserialize_with = "null_default")]
    pub property: AdProperty,
    pub market: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub images: Vec<AdImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdCategory {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdLocation {
    #[serde(default, deserialize_with = "null_default")]
    pub address: AdAddress,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdAddress {
    pub city: Option<Named>,
    pub district: Option<Named>,
    pub street: Option<Named>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingData {
    pub city_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Characteristic {
    pub key: Option<String>,
    #[serde(default)]
    pub value: Value,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Target {
    #[serde(rename = "Price", default)]
    pub price: Value,
    #[serde(rename = "Rooms_num", default)]
    pub rooms_num: Value,
    #[serde(rename = "Area", default)]
    pub area: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdProperty {
    #[serde(default, deserialize_with = "null_default")]
    pub properties: PropertyDetails,
    pub area: Option<AreaValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDetails {
    #[serde(default)]
    pub number_of_rooms: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaValue {
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdImage {
    pub large: Option<String>,
    pub medium: Option<String>,
    pub small: Option<String>,
    pub thumbnail: Option<String>,
}

impl AdImage {
    fn best(&self) -> Option<&str> {
        self.large
            .as_deref()
            .or(self.medium.as_deref())
            .or(self.small.as_deref())
            .or(self.thumbnail.as_deref())
    }
}

impl OtodomAd {
    fn characteristic(&self, keys: &[&str]) -> Option<&Characteristic> {
        self.characteristics
            .iter()
            .find(|c| c.key.as_deref().is_some_and(|k| keys.contains(&k)))
    }
}

/// Pull `props.pageProps.ad` out of a detail page.
pub fn extract_ad(html: &str) -> Result<Value> {
    let document = Html::parse_document(html);
    let Some(script) = document.select(&NEXT_DATA).next() else {
        bail!("__NEXT_DATA__ not found");
    };
    let payload: Value =
        serde_json::from_str(&script.text().collect::<String>()).context("Invalid __NEXT_DATA__ JSON")?;
    match payload.pointer("/props/pageProps/ad") {
        Some(ad) if ad.is_object() => Ok(ad.clone()),
        _ => bail!("ad object not found in pageProps"),
    }
}

pub async fn map(
    places: &PlaceResolver,
    raw: &Value,
    property_type: PropertyType,
    deal_type: DealType,
) -> Result<Option<ListingCandidate>> {
    let ad: OtodomAd = serde_json::from_value(raw.clone()).context("Malformed Otodom ad")?;

    let property_type = match ad.ad_category.name.as_deref().map(str::to_uppercase).as_deref() {
        Some("FLAT") => PropertyType::Apartment,
        Some("HOUSE") => PropertyType::House,
        Some("ROOM") => PropertyType::Room,
        _ => property_type,
    };
    let deal_type = match ad.ad_category.kind.as_deref().map(str::to_uppercase).as_deref() {
        Some("SELL") => DealType::Sale,
        Some("RENT") => DealType::Rent,
        _ => deal_type,
    };

    let address = &ad.location.address;
    let city = address
        .city
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .or(ad.ad_tracking_data.city_name.as_deref());
    let district = address.district.as_ref().and_then(|d| d.name.as_deref());
    let Some(place) = resolve_place(places, city, district).await? else {
        return Ok(None);
    };

    let url = normalize_url(ad.url.as_deref())
        .or_else(|| normalize_url(ad.relative_url.as_deref()).map(|rel| format!("{SITE}{rel}")))
        .context("Otodom ad without url")?;
    let source_ad_id = value_to_string(&ad.id)
        .or_else(|| ad.public_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| url.clone());

    let title = html_to_text_opt(ad.title.as_deref());
    let description = html_to_text_opt(ad.description.as_deref());
    let flags = detect_flags(description.as_deref(), title.as_deref());

    let price_field = ad.characteristic(&["price"]);
    let price = price_field
        .and_then(|c| value_to_f64(&c.value))
        .or_else(|| value_to_f64(&ad.target.price));
    let currency = price_field
        .and_then(|c| c.currency.clone())
        .or_else(|| price.map(|_| "PLN".to_string()));

    let rooms = value_to_i64(&ad.property.properties.number_of_rooms)
        .or_else(|| ad.characteristic(&["rooms_num"]).and_then(|c| value_to_i64(&c.value)))
        .or_else(|| value_to_i64(&ad.target.rooms_num));

    let area_m2 = ad
        .property
        .area
        .as_ref()
        .and_then(|a| value_to_f64(&a.value))
        .or_else(|| {
            ad.characteristic(&["m", "area", "powierzchnia"])
                .and_then(|c| value_to_f64(&c.value))
        })
        .or_else(|| value_to_f64(&ad.target.area));

    let market = ad
        .market
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(Market::from_label)
        .or_else(|| {
            ad.characteristic(&["market"])
                .and_then(|c| value_to_string(&c.value))
                .map(|m| Market::from_label(&m))
        })
        .unwrap_or_default();

    let street = address
        .street
        .as_ref()
        .and_then(|s| s.name.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let photos = ad
        .images
        .iter()
        .filter_map(AdImage::best)
        .map(str::to_string)
        .collect();

    Ok(Some(ListingCandidate {
        source: Source::Otodom,
        source_ad_id,
        url,
        external_url: None,
        deal_type,
        property_type,
        title,
        description,
        price,
        currency,
        city_id: place.city_id,
        district_id: place.district_id,
        address: street,
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
