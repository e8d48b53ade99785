//! Morizon offer cards, decoded from the offer page and its `/photo` gallery.

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::{
    absolutize, clean_text, dedupe_keep_order, detect_flags, element_text, num_from_text, resolve_place,
};
use crate::models::{DealType, ListingCandidate, Market, PropertyType, Source};
use crate::storage::PlaceResolver;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"h1[data-cy="pageDetailsPropertyTitle"]"#));
static TITLE_FALLBACKS: Lazy<Vec<Selector>> =
    Lazy::new(|| ["h1", "header h1", ".property__header h1"].map(selector).into_iter().collect());
static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[name="og:title"], meta[property="og:title"]"#));
static PRICE: Lazy<Selector> = Lazy::new(|| selector(r#"span[data-cy="priceRowPrice"]"#));
static PRICE_FALLBACKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["[class*='price']", "[id*='price']", ".priceBox", ".property__price"]
        .map(selector)
        .into_iter()
        .collect()
});
static OG_DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:description"]"#));
static ROOMS: Lazy<Selector> =
    Lazy::new(|| selector(r#"span[data-cy="detailsRowTextNumberOfRooms"]"#));
static AREA: Lazy<Selector> = Lazy::new(|| selector(r#"span[data-cy="detailsRowTextArea"]"#));
static DESCRIPTION: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        ".ASk2iX",
        "[class*='description']",
        "[id*='description']",
        ".offer-description",
        "article",
    ]
    .map(selector)
    .into_iter()
    .collect()
});
static ADDRESS: Lazy<Selector> = Lazy::new(|| selector(".location-row__second_column h2"));
static DETAIL_ROW: Lazy<Selector> = Lazy::new(|| selector(".iT04N1"));
static DETAIL_LABEL: Lazy<Selector> =
    Lazy::new(|| selector(".YSTCwm._3rio9t, .YSTCwm:not(.M3ijI0)"));
static DETAIL_VALUE: Lazy<Selector> =
    Lazy::new(|| selector(r#".YSTCwm.M3ijI0, [data-cy="itemValue"]"#));
static SEARCH_LINK: Lazy<Selector> = Lazy::new(|| selector(r#"a[data-cy="propertyUrl"]"#));
static GALLERY_BUTTON_IMG: Lazy<Selector> = Lazy::new(|| selector("#gallery__photos button img"));
static GALLERY_SOURCE: Lazy<Selector> = Lazy::new(|| selector("#gallery__photos source[srcset]"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static OG_IMAGE: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[property="og:image"], meta[name="og:image"]"#));
static BODY: Lazy<Selector> = Lazy::new(|| selector("body"));

static PRICE_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d\s.,\u{202f}\u{a0}]{4,})\s*zł").expect("price pattern is valid")
});
static FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("integer pattern is valid"));
static LONG_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6,}").expect("id pattern is valid"));
static SRCSET_W: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(\d+)w$").expect("srcset width pattern is valid"));
static SRCSET_X: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(\d+(?:\.\d+)?)x$").expect("srcset density pattern is valid"));

/// Fields decoded from one offer page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MorizonCard {
    pub url: String,
    pub source_ad_id: Option<String>,
    pub city: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub rooms: Option<i64>,
    pub area_m2: Option<f64>,
    pub address: Option<String>,
    pub market: Option<Market>,
    pub details: HashMap<String, String>,
    pub images: Vec<String>,
}

/// Offer links from a search results page, made absolute against `base`.
pub fn extract_search_links(html: &str, base: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let links = document
        .select(&SEARCH_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolutize(base, href))
        .filter(|href| href.contains("/oferta/"));
    dedupe_keep_order(links)
}

/// `{label lowercased: value}` from the details grid.
fn details_table(document: &Html) -> HashMap<String, String> {
    let mut details = HashMap::new();
    for row in document.select(&DETAIL_ROW) {
        let label = row.select(&DETAIL_LABEL).next().map(|e| element_text(e, " "));
        let value = row.select(&DETAIL_VALUE).next().map(|e| element_text(e, " "));
        if let (Some(label), Some(value)) = (label, value) {
            if !label.is_empty() && !value.is_empty() {
                details.insert(label.to_lowercase(), value);
            }
        }
    }
    details
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn market_from_details(details: &HashMap<String, String>) -> Option<Market> {
    ["rynek", "typ rynku"]
        .iter()
        .filter_map(|key| details.get(*key))
        .find(|value| !value.trim().is_empty())
        .map(|value| Market::from_label(value))
}

fn market_from_description(description: &str) -> Option<Market> {
    let text = description.to_lowercase();
    if text.contains("rynek pierwotny") || text.contains("z rynku pierwotnego") {
        Some(Market::Primary)
    } else if text.contains("rynek wtórny")
        || text.contains("z rynku wtórnego")
        || text.contains("rynek wtor")
    {
        Some(Market::Secondary)
    } else {
        None
    }
}

/// First 6+ digit run in the URL, else its last path segment.
pub fn source_ad_id_from_url(url: &str) -> Option<String> {
    if let Some(m) = LONG_ID.find(url) {
        return Some(m.as_str().to_string());
    }
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode an offer page. Photos come from a separate fetch; see [`parse_photo_page`].
pub fn parse_card(html: &str, city: &str, url: &str) -> MorizonCard {
    let document = Html::parse_document(html);
    let details = details_table(&document);

    let title = document
        .select(&TITLE)
        .next()
        .map(|e| element_text(e, " "))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            TITLE_FALLBACKS
                .iter()
                .find_map(|sel| document.select(sel).next())
                .map(|e| element_text(e, " "))
                .filter(|t| !t.is_empty())
        })
        .or_else(|| meta_content(&document, &OG_TITLE));

    let price = document
        .select(&PRICE)
        .next()
        .and_then(|e| num_from_text(&element_text(e, " ")))
        .or_else(|| {
            PRICE_FALLBACKS.iter().find_map(|sel| {
                document
                    .select(sel)
                    .next()
                    .and_then(|e| num_from_text(&element_text(e, " ")))
            })
        })
        .or_else(|| meta_content(&document, &OG_DESCRIPTION).and_then(|d| num_from_text(&d)))
        .or_else(|| {
            let text = document
                .select(&BODY)
                .next()
                .map(|b| element_text(b, " "))
                .unwrap_or_default();
            PRICE_IN_TEXT
                .captures(&text)
                .and_then(|c| num_from_text(&c[1]))
        });

    let rooms = document
        .select(&ROOMS)
        .next()
        .and_then(|e| FIRST_INT.find(&element_text(e, " ")).map(|m| m.as_str().to_string()))
        .and_then(|digits| digits.parse().ok());

    let area_m2 = document
        .select(&AREA)
        .next()
        .and_then(|e| num_from_text(&element_text(e, " ")));

    let description = DESCRIPTION.iter().find_map(|sel| {
        document
            .select(sel)
            .next()
            .map(|e| element_text(e, "\n"))
            .filter(|d| !d.is_empty())
    });

    let address = document
        .select(&ADDRESS)
        .next()
        .map(|e| clean_text(&e.text().collect::<String>()))
        .filter(|a| !a.is_empty());

    let market = market_from_details(&details)
        .or_else(|| description.as_deref().and_then(market_from_description));

    MorizonCard {
        url: url.to_string(),
        source_ad_id: source_ad_id_from_url(url),
        city: city.to_string(),
        title,
        description,
        price,
        rooms,
        area_m2,
        address,
        market,
        details,
        images: Vec::new(),
    }
}

/// URL with the largest descriptor: `w` candidates win over `x` candidates.
pub fn best_from_srcset(srcset: &str) -> Option<String> {
    let mut best_w: Option<(u64, &str)> = None;
    let mut best_x: Option<(f64, &str)> = None;
    for part in srcset.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(c) = SRCSET_W.captures(part) {
            let width: u64 = c[2].parse().unwrap_or(0);
            if best_w.map_or(true, |(w, _)| width > w) {
                best_w = Some((width, c.get(1).map_or("", |m| m.as_str())));
            }
        } else if let Some(c) = SRCSET_X.captures(part) {
            let density: f64 = c[2].parse().unwrap_or(0.0);
            if best_x.map_or(true, |(x, _)| density > x) {
                best_x = Some((density, c.get(1).map_or("", |m| m.as_str())));
            }
        }
    }
    best_w
        .map(|(_, url)| url)
        .or(best_x.map(|(_, url)| url))
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn images_from_json_ld(document: &Html) -> Vec<String> {
    let mut images = Vec::new();
    for script in document.select(&JSON_LD) {
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&script.text().collect::<String>())
        else {
            continue;
        };
        let objects = match data {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        for object in objects {
            match object.get("image") {
                Some(serde_json::Value::String(url)) => images.push(url.clone()),
                Some(serde_json::Value::Array(urls)) => images.extend(
                    urls.iter()
                        .filter_map(|u| u.as_str())
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
    }
    images
}

/// Photo URLs from the `/photo` gallery page: gallery images, then JSON-LD, then `og:image`.
pub fn parse_photo_page(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut images = Vec::new();

    for img in document.select(&GALLERY_BUTTON_IMG) {
        let attrs = img.value();
        let best = attrs.attr("srcset").and_then(best_from_srcset);
        if let Some(url) = best.or_else(|| {
            attrs
                .attr("src")
                .or_else(|| attrs.attr("data-src"))
                .map(str::to_string)
        }) {
            images.push(url);
        }
    }
    for source in document.select(&GALLERY_SOURCE) {
        if let Some(url) = source.value().attr("srcset").and_then(best_from_srcset) {
            images.push(url);
        }
    }
    images.extend(images_from_json_ld(&document));
    images.extend(meta_content(&document, &OG_IMAGE));

    dedupe_keep_order(images)
}

pub fn photo_page_url(url: &str) -> String {
    format!("{}/photo", url.trim_end_matches('/'))
}

pub async fn map(
    places: &PlaceResolver,
    card: &MorizonCard,
    property_type: PropertyType,
    deal_type: DealType,
) -> Result<Option<ListingCandidate>> {
    let Some(place) = resolve_place(places, Some(&card.city), None).await? else {
        return Ok(None);
    };
    let flags = detect_flags(card.description.as_deref(), card.title.as_deref());

    Ok(Some(ListingCandidate {
        source: Source::Morizon,
        source_ad_id: card
            .source_ad_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| card.url.clone()),
        url: card.url.clone(),
        external_url: None,
        deal_type,
        property_type,
        title: card.title.clone(),
        description: card.description.clone(),
        price: card.price,
        currency: card.price.map(|_| "PLN".to_string()),
        city_id: place.city_id,
        district_id: place.district_id,
        address: card.address.clone(),
        area_m2: card.area_m2,
        rooms: card.rooms,
        market: card.market.unwrap_or_default(),
        pets_allowed: flags.pets_allowed,
        child_allowed: flags.child_allowed,
        no_comission: flags.no_comission,
        photos: card.images.clone(),
        raw: serde_json::to_value(card)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    const CARD: &str = r#"<html><head>
        <meta property="og:title" content="Og title">
        </head><body>
        <h1 data-cy="pageDetailsPropertyTitle"> Mieszkanie, 52 m², Mokotów </h1>
        <span data-cy="priceRowPrice">789 000 zł</span>
        <span data-cy="detailsRowTextNumberOfRooms">3 pokoje</span>
        <span data-cy="detailsRowTextArea">52,3 m²</span>
        <div class="location-row__second_column"><h2><span>Warszawa,</span> <span>Mokotów</span></h2></div>
        <div class="iT04N1"><div class="YSTCwm _3rio9t">Rynek</div><div class="YSTCwm M3ijI0">wtórny</div></div>
        <div class="iT04N1"><div class="YSTCwm _3rio9t">Piętro</div><div class="YSTCwm M3ijI0">2</div></div>
        <div class="ASk2iX"><p>Jasne mieszkanie.</p><p>Bez pośrednika.</p></div>
        </body></html>"#;

    #[test]
    fn parses_offer_card() {
        let url = "https://www.morizon.pl/oferta/sprzedaz-mieszkanie-warszawa-mokotow-mzn2043567890";
        let card = parse_card(CARD, "Warszawa", url);

        assert_eq!(card.title.as_deref(), Some("Mieszkanie, 52 m², Mokotów"));
        assert_eq!(card.price, Some(789_000.0));
        assert_eq!(card.rooms, Some(3));
        assert_eq!(card.area_m2, Some(52.3));
        assert_eq!(card.address.as_deref(), Some("Warszawa, Mokotów"));
        assert_eq!(card.market, Some(Market::Secondary));
        assert_eq!(card.details.get("piętro").map(String::as_str), Some("2"));
        assert_eq!(card.description.as_deref(), Some("Jasne mieszkanie.\nBez pośrednika."));
        assert_eq!(card.source_ad_id.as_deref(), Some("2043567890"));
    }

    #[test]
    fn title_and_market_fall_back() {
        let html = r#"<html><head><meta property="og:title" content="Dom w Gdańsku"></head>
            <body><article>Oferta z rynku pierwotnego, cena 1 100 000 zł</article></body></html>"#;
        let card = parse_card(html, "Gdańsk", "https://www.morizon.pl/oferta/dom-abc/");

        assert_eq!(card.title.as_deref(), Some("Dom w Gdańsku"));
        assert_eq!(card.market, Some(Market::Primary));
        assert_eq!(card.price, Some(1_100_000.0));
        assert_eq!(card.source_ad_id.as_deref(), Some("dom-abc"));
    }

    #[test]
    fn srcset_prefers_widest() {
        let srcset = "https://img/a-300.jpg 300w, https://img/a-900.jpg 900w, https://img/a-600.jpg 600w";
        assert_eq!(best_from_srcset(srcset).as_deref(), Some("https://img/a-900.jpg"));
        assert_eq!(
            best_from_srcset("https://img/1x.jpg 1x, https://img/2x.jpg 2x").as_deref(),
            Some("https://img/2x.jpg")
        );
        assert_eq!(best_from_srcset("garbage"), None);
    }

    #[test]
    fn photo_page_collects_all_sources_in_order() {
        let html = r#"<html><head>
            <meta property="og:image" content="https://img/og.jpg">
            <script type="application/ld+json">{"@type": "Product", "image": ["https://img/b.jpg", "https://img/ld.jpg"]}</script>
            </head><body><div id="gallery__photos">
              <button><img srcset="https://img/a-small.jpg 300w, https://img/a.jpg 1200w"></button>
              <button><img data-src="https://img/b.jpg"></button>
              <picture><source srcset="https://img/c.webp 800w"></picture>
            </div></body></html>"#;

        assert_eq!(
            parse_photo_page(html),
            vec![
                "https://img/a.jpg",
                "https://img/b.jpg",
                "https://img/c.webp",
                "https://img/ld.jpg",
                "https://img/og.jpg",
            ]
        );
    }

    #[test]
    fn search_links_are_absolute_offers_only() {
        let html = r#"<div>
            <a data-cy="propertyUrl" href="/oferta/mieszkanie-1234567">a</a>
            <a data-cy="propertyUrl" href="/oferta/mieszkanie-1234567">dup</a>
            <a data-cy="propertyUrl" href="/inwestycja/osiedle">skip</a>
            <a data-cy="propertyUrl" href="https://www.morizon.pl/oferta/dom-7654321">b</a>
        </div>"#;
        assert_eq!(
            extract_search_links(html, "https://www.morizon.pl/mieszkania/najnowsze/krakow/"),
            vec![
                "https://www.morizon.pl/oferta/mieszkanie-1234567",
                "https://www.morizon.pl/oferta/dom-7654321",
            ]
        );
    }

    #[tokio::test]
    async fn maps_card_with_flags() {
        let db = Database::in_memory().await.unwrap();
        let mut card = parse_card(CARD, "Warszawa", "https://www.morizon.pl/oferta/x-2043567890");
        card.images = vec!["https://img/a.jpg".to_string()];

        let candidate = map(&db.places(), &card, PropertyType::Apartment, DealType::Sale)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.source, Source::Morizon);
        assert_eq!(candidate.source_ad_id, "2043567890");
        assert_eq!(candidate.currency.as_deref(), Some("PLN"));
        assert_eq!(candidate.no_comission, Some(true));
        assert_eq!(candidate.photos, vec!["https://img/a.jpg"]);
        assert_eq!(candidate.raw["price"], serde_json::json!(789000.0));
    }
}
