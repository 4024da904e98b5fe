//! Row normalization for heterogeneous registry exports
//!
//! Registry files come from many export tools with inconsistent column
//! naming (Norwegian/English variants, punctuation, casing) and sometimes
//! mangled encodings. Normalization is deliberately liberal: a row that
//! cannot be resolved to an entity is dropped with a warning rather than
//! failing the run, since one bad row must not abort a multi-hundred-
//! thousand-row import.

use tracing::warn;

use super::types::{normalize_header, RawRow, ShareholderRow};

/// Default share class when the export does not carry one.
pub const DEFAULT_SHARE_CLASS: &str = "Ordinære aksjer";

/// Default holder country when the export does not carry one.
pub const DEFAULT_COUNTRY: &str = "NO";

// Alias lists are normalized-header forms. Both "fødselsår" and the
// encoding-mangled "fodselsaar" spelling occur in the wild.
const COMPANY_ORGNR_ALIASES: &[&str] = &[
    "orgnr",
    "organisasjonsnummer",
    "org nr",
    "selskap orgnr",
    "orgnr selskap",
    "company orgnr",
    "organization number",
    "organisation number",
];

const COMPANY_NAME_ALIASES: &[&str] = &[
    "selskap",
    "selskapsnavn",
    "navn selskap",
    "firma",
    "utsteder",
    "company",
    "company name",
    "issuer",
];

const HOLDER_NAME_ALIASES: &[&str] = &[
    "navn aksjonær",
    "navn aksjonaer",
    "aksjonær",
    "aksjonaer",
    "aksjeeier",
    "eier",
    "holder",
    "holder name",
    "shareholder",
    "shareholder name",
];

const HOLDER_ID_ALIASES: &[&str] = &[
    "fødselsår orgnr",
    "fodselsaar orgnr",
    "orgnr fødselsår",
    "fødselsår",
    "fodselsaar",
    "birth year",
    "holder orgnr",
    "orgnr aksjonær",
];

const COUNTRY_ALIASES: &[&str] = &[
    "landkode",
    "land",
    "country",
    "country code",
    "postnr sted land",
];

const SHARE_CLASS_ALIASES: &[&str] = &["aksjeklasse", "share class", "klasse"];

const SHARES_ALIASES: &[&str] = &[
    "antall aksjer",
    "aksjer",
    "antall",
    "shares",
    "number of shares",
];

// Headers that look like an orgnr column but identify the holder, not the
// issuer. Excluded from the company-orgnr substring pass so "Fødselsår/Orgnr"
// is never mistaken for the issuer's organization number.
const HOLDER_MARKERS: &[&str] = &[
    "fødselsår",
    "fodselsaar",
    "birth",
    "aksjonær",
    "aksjonaer",
    "holder",
];

const COMPANY_TOTAL_ALIASES: &[&str] = &[
    "antall aksjer selskap",
    "totalt antall aksjer",
    "total shares",
    "company total shares",
];

/// Look up a field by its alias list: exact normalized match first, then a
/// substring match so "navn aksjonær (etternavn først)" still resolves.
fn field<'a>(raw: &'a RawRow, aliases: &[&str]) -> Option<&'a str> {
    field_excluding(raw, aliases, &[])
}

/// [`field`] with an exclusion list for the substring pass. Headers are
/// iterated in sorted order so a substring match is deterministic even
/// though [`RawRow`] is a hash map.
fn field_excluding<'a>(
    raw: &'a RawRow,
    aliases: &[&str],
    excluded: &[&str],
) -> Option<&'a str> {
    for alias in aliases {
        if let Some(v) = raw.get(*alias) {
            let v = v.trim();
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    let mut headers: Vec<&String> = raw.keys().collect();
    headers.sort();
    for alias in aliases {
        for header in &headers {
            if excluded.iter().any(|e| header.contains(e)) {
                continue;
            }
            if header.contains(alias) {
                let v = raw[*header].trim();
                if !v.is_empty() {
                    return Some(v);
                }
            }
        }
    }
    None
}

/// Keep only ASCII digits.
fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize an issuer organization number.
///
/// Strips non-digits; accepts 9 digits as-is and left-pads legacy 8-digit
/// values with a leading zero. Anything else is unusable.
pub fn normalize_orgnr(s: &str) -> Option<String> {
    let d = digits(s);
    match d.len() {
        9 => Some(d),
        8 => Some(format!("0{d}")),
        _ => None,
    }
}

/// Map one raw export row to the canonical shareholder shape.
///
/// Returns `None` when the row cannot be resolved to any entity: missing or
/// malformed issuer organization number, or both company and holder name
/// empty. Dropped rows are warned about for operator visibility, never
/// raised as errors.
pub fn map_row_to_shareholder_data(raw: &RawRow) -> Option<ShareholderRow> {
    let orgnr_raw = field_excluding(raw, COMPANY_ORGNR_ALIASES, HOLDER_MARKERS).unwrap_or("");
    let Some(company_orgnr) = normalize_orgnr(orgnr_raw) else {
        warn!(
            orgnr = %orgnr_raw,
            "dropping row: organization number missing or not 8/9 digits"
        );
        return None;
    };

    let company_name = field(raw, COMPANY_NAME_ALIASES).unwrap_or("").to_string();
    let holder_name = field(raw, HOLDER_NAME_ALIASES).unwrap_or("").to_string();
    if company_name.is_empty() && holder_name.is_empty() {
        warn!(
            orgnr = %company_orgnr,
            "dropping row: both company name and holder name are empty"
        );
        return None;
    }

    // A 9-digit identifier is an org number, a 4-digit value >= 1900 is a
    // birth year. Mutually exclusive by construction.
    let mut holder_orgnr = None;
    let mut holder_birth_year = None;
    if let Some(id) = field(raw, HOLDER_ID_ALIASES) {
        let d = digits(id);
        if d.len() == 9 {
            holder_orgnr = Some(d);
        } else if d.len() == 4 {
            if let Ok(year) = d.parse::<i32>() {
                if year >= 1900 {
                    holder_birth_year = Some(year);
                }
            }
        }
    }

    let holder_country = field(raw, COUNTRY_ALIASES)
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| c.len() == 2)
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string());

    let share_class = field(raw, SHARE_CLASS_ALIASES)
        .unwrap_or(DEFAULT_SHARE_CLASS)
        .to_string();

    let shares = field(raw, SHARES_ALIASES)
        .map(digits)
        .and_then(|d| d.parse::<u64>().ok())
        .unwrap_or(0);

    let company_total_shares = field(raw, COMPANY_TOTAL_ALIASES)
        .map(digits)
        .and_then(|d| d.parse::<u64>().ok());

    Some(ShareholderRow {
        company_orgnr,
        company_name,
        holder_name,
        holder_orgnr,
        holder_birth_year,
        holder_country,
        share_class,
        shares,
        company_total_shares,
    })
}

/// Build a [`RawRow`] from parallel header/value slices, normalizing headers.
///
/// Shared by the CSV and Excel readers.
pub fn raw_row(headers: &[String], values: &[String]) -> RawRow {
    headers
        .iter()
        .zip(values.iter())
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(h, v)| (normalize_header(h), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (normalize_header(k), v.to_string()))
            .collect()
    }

    #[test]
    fn maps_standard_norwegian_export() {
        let raw = row(&[
            ("Orgnr", "977 074 010"),
            ("Selskap", "EKSEMPEL AS"),
            ("Aksjeklasse", "Ordinære aksjer"),
            ("Navn aksjonær", "Ola Nordmann"),
            ("Fødselsår/Orgnr", "1965"),
            ("Landkode", "NO"),
            ("Antall aksjer", "1 500"),
            ("Antall aksjer selskap", "10 000"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.company_orgnr, "977074010");
        assert_eq!(parsed.company_name, "EKSEMPEL AS");
        assert_eq!(parsed.holder_name, "Ola Nordmann");
        assert_eq!(parsed.holder_birth_year, Some(1965));
        assert_eq!(parsed.holder_orgnr, None);
        assert_eq!(parsed.shares, 1500);
        assert_eq!(parsed.company_total_shares, Some(10_000));
    }

    #[test]
    fn maps_english_headers() {
        let raw = row(&[
            ("Organization number", "912345678"),
            ("Company name", "Example AS"),
            ("Shareholder name", "Holding Co AS"),
            ("Holder orgnr", "998765432"),
            ("Shares", "250"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.company_orgnr, "912345678");
        assert_eq!(parsed.holder_orgnr, Some("998765432".to_string()));
        assert_eq!(parsed.holder_country, "NO");
        assert_eq!(parsed.share_class, DEFAULT_SHARE_CLASS);
    }

    #[test]
    fn legacy_8_digit_orgnr_is_left_padded() {
        let raw = row(&[
            ("Orgnr", "12345678"),
            ("Selskap", "Gammel AS"),
            ("Navn aksjonær", "Kari Nordmann"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.company_orgnr, "012345678");
    }

    #[test]
    fn malformed_orgnr_drops_row() {
        for bad in ["123", "12345678901", "", "abc"] {
            let raw = row(&[("Orgnr", bad), ("Selskap", "X AS"), ("Aksjonær", "Y")]);
            assert!(map_row_to_shareholder_data(&raw).is_none(), "orgnr {bad:?}");
        }
    }

    #[test]
    fn empty_names_drop_row() {
        let raw = row(&[("Orgnr", "912345678"), ("Antall aksjer", "100")]);
        assert!(map_row_to_shareholder_data(&raw).is_none());
    }

    #[test]
    fn shares_default_to_zero() {
        let raw = row(&[
            ("Orgnr", "912345678"),
            ("Selskap", "Eksempel AS"),
            ("Navn aksjonær", "Ola Nordmann"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.shares, 0);
    }

    #[test]
    fn nine_digit_holder_id_is_orgnr_not_birth_year() {
        let raw = row(&[
            ("Orgnr", "912345678"),
            ("Selskap", "Eksempel AS"),
            ("Navn aksjonær", "Invest AS"),
            ("Fødselsår/Orgnr", "998 765 432"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.holder_orgnr, Some("998765432".to_string()));
        assert_eq!(parsed.holder_birth_year, None);
    }

    #[test]
    fn holder_id_header_is_not_mistaken_for_company_orgnr() {
        // No exact company-orgnr header; the issuer column only substring-
        // matches. The holder column must never win that lookup.
        let raw = row(&[
            ("Orgnr juridisk enhet", "912345678"),
            ("Selskap", "Eksempel AS"),
            ("Navn aksjonær", "Ola Nordmann"),
            ("Fødselsår/Orgnr", "1965"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.company_orgnr, "912345678");
        assert_eq!(parsed.holder_birth_year, Some(1965));
        assert_eq!(parsed.holder_orgnr, None);
    }

    #[test]
    fn holder_id_alone_never_supplies_company_orgnr() {
        // A 9-digit holder orgnr must not be taken as the issuer orgnr.
        let raw = row(&[
            ("Selskap", "Eksempel AS"),
            ("Navn aksjonær", "Invest AS"),
            ("Holder orgnr", "998765432"),
        ]);
        assert!(map_row_to_shareholder_data(&raw).is_none());
    }

    #[test]
    fn birth_year_before_1900_is_ignored() {
        let raw = row(&[
            ("Orgnr", "912345678"),
            ("Selskap", "Eksempel AS"),
            ("Navn aksjonær", "Gammel Person"),
            ("Fødselsår/Orgnr", "1850"),
        ]);
        let parsed = map_row_to_shareholder_data(&raw).unwrap();
        assert_eq!(parsed.holder_birth_year, None);
        assert_eq!(parsed.holder_orgnr, None);
    }
}
