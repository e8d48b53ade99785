//! nieruchomosci-online.pl offer cards.

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{absolutize, clean_text, dedupe_keep_order, detect_flags, element_text, num_from_text, resolve_place};
use crate::models::{DealType, ListingCandidate, Market, PropertyType, Source};
use crate::storage::PlaceResolver;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static SEARCH_LINK: Lazy<Selector> = Lazy::new(|| selector("h2.name.body-lg a[href]"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(".box-offer-top h1, h1.header-b"));
static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:title"]"#));
static PRICE: Lazy<Selector> = Lazy::new(|| selector(".info-primary-price"));
static AREA: Lazy<Selector> = Lazy::new(|| selector(".info-area"));
static ROOMS: Lazy<Selector> = Lazy::new(|| {
    selector("#attributesTable .icon-data-rooms ~ .box__attributes--content .fsize-a")
});
static DETAIL_ROW: Lazy<Selector> = Lazy::new(|| selector("#detailsTable ul.list-h li"));
static STRONG: Lazy<Selector> = Lazy::new(|| selector("strong"));
static SPAN: Lazy<Selector> = Lazy::new(|| selector("span"));
static ADDRESS: Lazy<Selector> = Lazy::new(|| selector("li.body-md.adress span"));
static ADDRESS_FALLBACK: Lazy<Selector> =
    Lazy::new(|| selector(".box-offer-top h2.header-e, .box-offer-top h2"));
static DESCRIPTION_BOX: Lazy<Selector> = Lazy::new(|| selector("#boxCustomDesc"));
static DESCRIPTION_PARTS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [".estate-desc-more", ".estate-desc-less"]
        .map(selector)
        .into_iter()
        .collect()
});
static DESCRIPTION_FALLBACK: Lazy<Selector> = Lazy::new(|| {
    selector("[class*='desc'], [class*='Desc'], [class*='opis'], [class*='Opis']")
});
static SCRIPT: Lazy<Selector> = Lazy::new(|| selector("script"));

static AD_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+)\.html(?:[?#]|$)").expect("id pattern is valid"));
static AREA_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d\s.,]+)\s*m").expect("area pattern is valid"));
static ROOMS_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*pok").expect("rooms pattern is valid"));
static PHOTOS_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)photos\s*:\s*(\{.*?\}),\s*\n\s*video").expect("photos pattern is valid")
});
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_]\w*)\s*:"#).expect("key pattern is valid"));

/// Fields decoded from one offer page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NieruchCard {
    pub url: String,
    pub source_ad_id: Option<String>,
    pub city: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub area_m2: Option<f64>,
    pub rooms: Option<i64>,
    pub address: Option<String>,
    pub market: Option<Market>,
    pub details: HashMap<String, String>,
    pub images: Vec<String>,
}

/// Offer links from a results page in page order, made absolute against `base`.
pub fn extract_search_links(html: &str, base: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let links = document
        .select(&SEARCH_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolutize(base, href));
    dedupe_keep_order(links)
}

/// "Szczegóły ogłoszenia": `<li><strong>Label:</strong> <span>Value</span></li>`.
fn details_table(document: &Html) -> HashMap<String, String> {
    let mut details = HashMap::new();
    for li in document.select(&DETAIL_ROW) {
        let (Some(strong), Some(span)) = (li.select(&STRONG).next(), li.select(&SPAN).next()) else {
            continue;
        };
        let label = clean_text(&element_text(strong, " "))
            .trim_end_matches(':')
            .to_lowercase();
        let value = clean_text(&element_text(span, " "));
        if !label.is_empty() && !value.is_empty() {
            details.insert(label, value);
        }
    }
    details
}

/// Photo URLs embedded in the `modules.record.handleRecord({...})` bootstrap script.
/// Full-size `x` entries are preferred over `l`.
pub fn photos_from_handle_record(document: &Html) -> Vec<String> {
    for script in document.select(&SCRIPT) {
        let text = script.text().collect::<String>();
        if !text.contains("modules.record.handleRecord") {
            continue;
        }
        let Some(captures) = PHOTOS_BLOCK.captures(&text) else {
            continue;
        };
        let block = captures[1].replace("\\/", "/");
        let photos: Value = match serde_json::from_str(&block) {
            Ok(value) => value,
            Err(_) => match serde_json::from_str(&BARE_KEY.replace_all(&block, "$1\"$2\":")) {
                Ok(value) => value,
                Err(_) => continue,
            },
        };
        let urls = ["x", "l"]
            .iter()
            .filter_map(|size| photos.get(*size).and_then(Value::as_array))
            .find(|urls| !urls.is_empty())
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        return dedupe_keep_order(urls);
    }
    Vec::new()
}

pub fn parse_card(html: &str, city: &str, url: &str) -> NieruchCard {
    let document = Html::parse_document(html);
    let details = details_table(&document);

    let source_ad_id = AD_ID.captures(url).map(|c| c[1].to_string());

    let title = document
        .select(&TITLE)
        .next()
        .map(|e| clean_text(&element_text(e, " ")))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            document
                .select(&OG_TITLE)
                .find_map(|m| m.value().attr("content"))
                .map(clean_text)
                .filter(|t| !t.is_empty())
        });

    let price = document
        .select(&PRICE)
        .next()
        .and_then(|e| num_from_text(&element_text(e, " ")))
        .or_else(|| details.get("cena").and_then(|v| num_from_text(v)));

    let characteristics = details.get("charakterystyka mieszkania");
    let area_m2 = document
        .select(&AREA)
        .next()
        .and_then(|e| num_from_text(&element_text(e, " ")))
        .or_else(|| {
            characteristics
                .and_then(|v| AREA_IN_TEXT.captures(v))
                .and_then(|c| num_from_text(&c[1]))
        });

    let rooms = document
        .select(&ROOMS)
        .next()
        .and_then(|e| num_from_text(&element_text(e, " ")))
        .map(|r| r as i64)
        .filter(|r| *r > 0)
        .or_else(|| {
            characteristics
                .and_then(|v| ROOMS_IN_TEXT.captures(v))
                .and_then(|c| c[1].parse().ok())
        });

    let market = details
        .get("rynek")
        .filter(|v| !v.trim().is_empty())
        .map(|v| Market::from_label(v));

    let address = document
        .select(&ADDRESS)
        .next()
        .or_else(|| document.select(&ADDRESS_FALLBACK).next())
        .map(|e| clean_text(&e.text().collect::<String>()))
        .filter(|a| !a.is_empty());

    let description = document
        .select(&DESCRIPTION_BOX)
        .next()
        .and_then(|desc_box| {
            DESCRIPTION_PARTS
                .iter()
                .find_map(|sel| desc_box.select(sel).next())
                .map(|e| clean_text(&element_text(e, "\n")))
        })
        .filter(|d| !d.is_empty())
        .or_else(|| {
            document
                .select(&DESCRIPTION_FALLBACK)
                .next()
                .map(|e| clean_text(&element_text(e, "\n")))
                .filter(|d| !d.is_empty())
        });

    NieruchCard {
        url: url.to_string(),
        source_ad_id,
        city: city.to_string(),
        title,
        description,
        price,
        area_m2,
        rooms,
        address,
        market,
        details,
        images: photos_from_handle_record(&document),
    }
}

pub async fn map(
    places: &PlaceResolver,
    card: &NieruchCard,
    property_type: PropertyType,
    deal_type: DealType,
) -> Result<Option<ListingCandidate>> {
    let Some(place) = resolve_place(places, Some(&card.city), None).await? else {
        return Ok(None);
    };
    let flags = detect_flags(card.description.as_deref(), card.title.as_deref());

    Ok(Some(ListingCandidate {
        source: Source::Nieruch,
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

    const CARD: &str = "<html><head><meta property=\"og:title\" content=\"Og\"></head><body>
        <div class=\"box-offer-top\"><h1 class=\"header-b\"> Mieszkanie   2-pokojowe </h1>
          <ul><li class=\"body-md adress\"><span>Bielany, Warszawa, mazowieckie</span></li></ul></div>
        <p class=\"info-primary-price\">2 900 zł</p>
        <div id=\"detailsTable\"><ul class=\"list-h\">
          <li><strong>Rynek:</strong> <span>wtórny</span></li>
          <li><strong>Charakterystyka mieszkania:</strong> <span>47,24 m², 2 pokoje; stan: dobry</span></li>
        </ul></div>
        <div id=\"boxCustomDesc\"><div class=\"estate-desc-more\">Mieszkanie tylko dla pary.
           Bez zwierząt.</div></div>
        <script type=\"text/javascript\">
          modules.record.handleRecord({
            id: 25923251,
            photos: {\"l\":[\"https:\\/\\/img\\/1l.jpg\"],\"x\":[\"https:\\/\\/img\\/1x.jpg\",\"https:\\/\\/img\\/2x.jpg\",\"https:\\/\\/img\\/1x.jpg\"]},
            video: null
          });
        </script>
        </body></html>";

    #[test]
    fn parses_offer_card() {
        let url = "https://warszawa.nieruchomosci-online.pl/mieszkanie,bielany/25923251.html";
        let card = parse_card(CARD, "Warszawa", url);

        assert_eq!(card.source_ad_id.as_deref(), Some("25923251"));
        assert_eq!(card.title.as_deref(), Some("Mieszkanie 2-pokojowe"));
        assert_eq!(card.price, Some(2900.0));
        assert_eq!(card.area_m2, Some(47.24));
        assert_eq!(card.rooms, Some(2));
        assert_eq!(card.market, Some(Market::Secondary));
        assert_eq!(card.address.as_deref(), Some("Bielany, Warszawa, mazowieckie"));
        assert_eq!(card.description.as_deref(), Some("Mieszkanie tylko dla pary. Bez zwierząt."));
        assert_eq!(card.images, vec!["https://img/1x.jpg", "https://img/2x.jpg"]);
    }

    #[test]
    fn bare_object_keys_are_tolerated() {
        let html = "<script>modules.record.handleRecord({
            photos: {l: [\"https:\\/\\/img\\/a.jpg\"]},
            video: null});</script>";
        let document = Html::parse_document(html);
        assert_eq!(photos_from_handle_record(&document), vec!["https://img/a.jpg"]);
    }

    #[test]
    fn search_links_keep_page_order() {
        let html = r#"<h2 class="name body-lg"><a href="https://x.nieruchomosci-online.pl/a/2.html">b</a></h2>
            <h2 class="name body-lg"><a href="/c/1.html">a</a></h2>
            <h2 class="name"><a href="/skip.html">skip</a></h2>"#;
        assert_eq!(
            extract_search_links(html, "https://www.nieruchomosci-online.pl/szukaj.html"),
            vec![
                "https://x.nieruchomosci-online.pl/a/2.html",
                "https://www.nieruchomosci-online.pl/c/1.html",
            ]
        );
    }

    #[tokio::test]
    async fn url_stands_in_for_missing_id() {
        let db = Database::in_memory().await.unwrap();
        let url = "https://www.nieruchomosci-online.pl/oferta-bez-id";
        let card = parse_card(CARD, "Warszawa", url);
        assert_eq!(card.source_ad_id, None);

        let candidate = map(&db.places(), &card, PropertyType::Apartment, DealType::Rent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.source_ad_id, url);
        assert_eq!(candidate.child_allowed, Some(false));
        assert_eq!(candidate.pets_allowed, Some(false));
    }
}
