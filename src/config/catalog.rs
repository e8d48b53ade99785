//! Static scan matrices and phrase lists.

use crate::models::{DealType, PropertyType};

use DealType::{Rent, Sale};
use PropertyType::{Apartment, House, Room};

/// Cities whose listings are accepted; anything else is dropped by the normalizers.
pub const SUPPORTED_CITIES: [&str; 8] = [
    "Warszawa", "Kraków", "Łódź", "Wrocław", "Poznań", "Gdańsk", "Szczecin", "Katowice",
];

pub fn is_supported_city(name_pl: &str) -> bool {
    SUPPORTED_CITIES.contains(&name_pl)
}

/// OLX numeric city ids, same order as [`SUPPORTED_CITIES`].
pub const OLX_CITY_IDS: [u64; 8] = [17871, 8959, 10609, 19701, 13983, 5659, 16705, 7691];

/// `(category_id, property_type, deal_type)`
pub const OLX_CATEGORIES: [(u64, PropertyType, DealType); 5] = [
    (15, Apartment, Rent),
    (14, Apartment, Sale),
    (20, House, Rent),
    (18, House, Sale),
    (11, Room, Rent),
];

/// `(region slug, city slug)`
pub const OTODOM_CITIES: [(&str, &str); 8] = [
    ("mazowieckie", "warszawa"),
    ("malopolskie", "krakow"),
    ("lodzkie", "lodz"),
    ("dolnoslaskie", "wroclaw"),
    ("wielkopolskie", "poznan"),
    ("pomorskie", "gdansk"),
    ("zachodniopomorskie", "szczecin"),
    ("slaskie", "katowice"),
];

/// `((type slug, deal slug), property_type, deal_type)`
pub const OTODOM_CATEGORIES: [((&str, &str), PropertyType, DealType); 7] = [
    (("mieszkanie", "wynajem"), Apartment, Rent),
    (("mieszkanie", "sprzedaz"), Apartment, Sale),
    (("dom", "wynajem"), House, Rent),
    (("dom", "sprzedaz"), House, Sale),
    (("pokoj", "wynajem"), Room, Rent),
    (("kawalerka", "wynajem"), Apartment, Rent),
    (("kawalerka", "sprzedaz"), Apartment, Sale),
];

/// `(city name, city slug)`
pub const MORIZON_CITIES: [(&str, &str); 8] = [
    ("Warszawa", "warszawa"),
    ("Kraków", "krakow"),
    ("Łódź", "lodz"),
    ("Wrocław", "wroclaw"),
    ("Poznań", "poznan"),
    ("Gdańsk", "gdansk"),
    ("Szczecin", "szczecin"),
    ("Katowice", "katowice"),
];

pub const NIERUCH_CITIES: [&str; 8] = SUPPORTED_CITIES;

/// Category matrix shared by the HTML sources.
pub const HTML_CATEGORIES: [(PropertyType, DealType); 5] = [
    (Apartment, Rent),
    (Apartment, Sale),
    (House, Rent),
    (House, Sale),
    (Room, Rent),
];

pub const NO_PETS_PHRASES: &[&str] = &[
    "bez zwierząt",
    "bez zwierzat",
    "nie akceptuje zwierząt",
    "nie akceptujemy zwierząt",
    "nie akceptuje zwierzat",
    "nie akceptujemy zwierzat",
    "bez psa",
    "bez kota",
];

pub const NO_CHILDREN_PHRASES: &[&str] = &[
    "bez dzieci",
    "nie dla dzieci",
    "tylko dorośli",
    "tylko dorosli",
    "brak dzieci",
    "no kids",
    "dla singla",
    "dla pary",
];

pub const NO_PETS_NO_CHILDREN_PHRASES: &[&str] = &[
    "bez dzieci i zwierząt",
    "bez dzieci i zwierzat",
    "tylko dorosli bez zwierzat",
    "tylko dorośli bez zwierząt",
];

pub const NO_COMMISSION_PHRASES: &[&str] = &[
    "bez prowizji",
    "0% prowizji",
    "brak prowizji",
    "zero prowizji",
    "bezpośrednio",
    "bez posrednika",
    "bez pośrednika",
    "sprzedaż bezpośrednia",
];
