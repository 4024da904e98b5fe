//! Core domain types for the shareholder registry
//!
//! The registry stores yearly ownership snapshots: a [`ShareHolding`] is the
//! fact that one [`ShareEntity`] held shares of a given class in a
//! [`Company`] during one registry year. Holdings are immutable once written
//! for a year; a new year produces new rows instead of mutating old ones.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

// =============================================================================
// RAW INPUT
// =============================================================================

/// One row of a registry export, keyed by normalized header name.
///
/// Produced by the file readers; consumed by the row normalizer. Header keys
/// have already been through [`normalize_header`] so lookups are
/// case/punctuation insensitive.
pub type RawRow = HashMap<String, String>;

/// Normalize a column header for tolerant matching.
///
/// NFKC fold, lowercase, punctuation replaced by space, whitespace collapsed.
/// Norwegian letters survive (they are alphanumeric), so "Navn aksjonær" and
/// "NAVN  AKSJONÆR." both normalize to "navn aksjonær".
pub fn normalize_header(s: &str) -> String {
    let folded: String = s.nfkc().collect();
    let stripped: String = folded
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// NORMALIZED ROW
// =============================================================================

/// A registry row in canonical shape, produced by the row normalizer.
///
/// Field semantics:
/// - `company_orgnr` is always 9 digits (8-digit legacy values are
///   left-padded with a zero).
/// - `holder_orgnr` and `holder_birth_year` are mutually exclusive: a
///   9-digit identifier is an organization number, a 4-digit value ≥ 1900
///   is a birth year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareholderRow {
    pub company_orgnr: String,
    pub company_name: String,
    pub holder_name: String,
    pub holder_orgnr: Option<String>,
    pub holder_birth_year: Option<i32>,
    pub holder_country: String,
    pub share_class: String,
    pub shares: u64,
    /// Issuer's total share count when the export carries it
    /// ("Antall aksjer selskap"); feeds the reconciliation check.
    pub company_total_shares: Option<u64>,
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Stable identity key for a share entity.
///
/// Companies key on their organization number; persons on a composite of
/// normalized name, birth year and country. The key is the invariant that
/// links ownership history across yearly imports: it never changes once
/// derived, even when a later file spells the holder's name differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Key for a company holder, from its 9-digit organization number.
    pub fn org(orgnr: &str) -> Self {
        Self(format!("org:{orgnr}"))
    }

    /// Composite key for a person holder.
    ///
    /// Name is normalized the same way headers are, so casing and
    /// punctuation differences across files collapse to one identity.
    pub fn person(name: &str, birth_year: Option<i32>, country: &str) -> Self {
        let name_key = normalize_header(name);
        let year = birth_year.map(|y| y.to_string()).unwrap_or_default();
        Self(format!(
            "person:{name_key}|{year}|{}",
            country.to_ascii_uppercase()
        ))
    }

    pub fn is_org(&self) -> bool {
        self.0.starts_with("org:")
    }

    /// The organization number, for company keys.
    pub fn orgnr(&self) -> Option<&str> {
        self.0.strip_prefix("org:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of share entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    Person,
}

impl EntityType {
    /// Norwegian display label used in exports and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Company => "Selskap",
            EntityType::Person => "Person",
        }
    }
}

/// An owner of shares: a company or a person.
///
/// Never deleted; superseded by new-year snapshots. The display name is
/// last-write-wins across imports, the key is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntity {
    pub key: EntityKey,
    pub name: String,
    pub entity_type: EntityType,
    pub orgnr: Option<String>,
    pub birth_year: Option<i32>,
    pub country: String,
}

/// An issuer whose shares are held by others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub orgnr: String,
    /// Display name; corrected by subsequent imports (latest wins).
    pub name: String,
    /// Registered total share count, when known from the registry export.
    pub total_shares: Option<u64>,
}

// =============================================================================
// HOLDINGS
// =============================================================================

/// The fact that `holder` held `shares` of `share_class` in `company_orgnr`
/// during `year`.
///
/// Composite identity: (company_orgnr, holder, share_class, year).
/// Re-ingesting the same file overwrites the same fact rather than
/// duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareHolding {
    pub company_orgnr: String,
    pub holder: EntityKey,
    pub share_class: String,
    pub year: i32,
    pub shares: u64,
}

/// One direct holder of a company, joined to its resolved entity record.
///
/// `entity` is `None` when the holding references a key with no entity row;
/// callers render those as "Unknown Entity" rather than dropping them, so
/// holding totals stay complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyShareholder {
    pub holder: EntityKey,
    pub entity: Option<ShareEntity>,
    pub share_class: String,
    pub shares: u64,
    /// Share of the company total within the queried year, percent.
    pub ownership_pct: f64,
}

impl CompanyShareholder {
    /// Display name, with the unknown-entity placeholder applied.
    pub fn display_name(&self) -> &str {
        self.entity
            .as_ref()
            .map(|e| e.name.as_str())
            .unwrap_or("Unknown Entity")
    }
}

// =============================================================================
// IMPORT RESULTS
// =============================================================================

/// Final summary of one bulk import run.
///
/// Always produced, also on partial failure: skipped batches surface as
/// `errors`, never as an aborted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub session_id: Uuid,
    pub year: i32,
    /// Valid rows parsed from the file (after normalization drops).
    pub total_rows: usize,
    /// Rows dropped by the normalizer before ingestion.
    pub dropped_rows: usize,
    pub imported: u64,
    pub errors: u64,
    pub batches: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_normalization_collapses_variants() {
        assert_eq!(normalize_header("Navn aksjonær"), "navn aksjonær");
        assert_eq!(normalize_header("NAVN  AKSJONÆR."), "navn aksjonær");
        assert_eq!(normalize_header("Fødselsår/Orgnr"), "fødselsår orgnr");
        assert_eq!(normalize_header("Antall aksjer"), "antall aksjer");
    }

    #[test]
    fn person_key_is_stable_across_spelling() {
        let a = EntityKey::person("Ola Nordmann", Some(1965), "NO");
        let b = EntityKey::person("OLA  NORDMANN.", Some(1965), "no");
        assert_eq!(a, b);
        assert!(!a.is_org());
    }

    #[test]
    fn org_key_roundtrip() {
        let key = EntityKey::org("977074010");
        assert!(key.is_org());
        assert_eq!(key.orgnr(), Some("977074010"));
    }
}
