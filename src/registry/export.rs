//! Shareholder list export
//!
//! Semicolon-delimited CSV in the fixed column order operators expect:
//! Navn; Org/Født; Type; Land; Aksjeklasse; Aksjer; Andel %.

use chrono::Local;

use super::types::{CompanyShareholder, EntityType};

const EXPORT_HEADERS: [&str; 7] = [
    "Navn",
    "Org/Født",
    "Type",
    "Land",
    "Aksjeklasse",
    "Aksjer",
    "Andel %",
];

/// File name for an export: `aksjonaerer_<company>_<date>.csv`.
pub fn export_filename(company_name: &str) -> String {
    let slug: String = company_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_').replace("__", "_");
    format!("aksjonaerer_{slug}_{}.csv", Local::now().format("%Y-%m-%d"))
}

/// Render a shareholder list to semicolon-delimited CSV.
pub fn export_shareholders(shareholders: &[CompanyShareholder]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    writer.write_record(EXPORT_HEADERS)?;

    for sh in shareholders {
        let (identifier, entity_type, country) = match &sh.entity {
            Some(entity) => (
                entity
                    .orgnr
                    .clone()
                    .or_else(|| entity.birth_year.map(|y| y.to_string()))
                    .unwrap_or_default(),
                entity.entity_type.label().to_string(),
                entity.country.clone(),
            ),
            None => (
                sh.holder.orgnr().unwrap_or_default().to_string(),
                EntityType::Company.label().to_string(),
                String::new(),
            ),
        };
        let shares = sh.shares.to_string();
        let pct = format!("{:.2}", sh.ownership_pct);
        writer.write_record([
            sh.display_name(),
            identifier.as_str(),
            entity_type.as_str(),
            country.as_str(),
            sh.share_class.as_str(),
            shares.as_str(),
            pct.as_str(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    // The writer only ever receives valid UTF-8.
    Ok(String::from_utf8(bytes).expect("csv writer produced invalid utf-8"))
}
