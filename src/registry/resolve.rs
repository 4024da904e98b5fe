//! Entity resolution for shareholder rows
//!
//! Before a holding fact can be written, the company and the holder of each
//! row must resolve to stable identities. Companies key on their
//! organization number; persons on a composite of normalized name, birth
//! year and country. Two rows with the same composite key across different
//! batches or files resolve to the same entity.
//!
//! Key derivation is a pluggable strategy so a stronger matcher (fuzzy
//! matching with confidence scores) can be substituted later without
//! touching ingestion. The default strategy accepts composite-key
//! collisions between distinct real-world persons as a known limitation.

use std::collections::HashMap;

use super::types::{Company, EntityKey, EntityType, ShareEntity, ShareholderRow};

/// Strategy for deriving a holder's stable identity key from a row.
pub trait ResolveStrategy: Send + Sync {
    fn key(&self, row: &ShareholderRow) -> EntityKey;
}

/// Default strategy: organization number when present, otherwise the
/// composite person key.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositeKeyStrategy;

impl ResolveStrategy for CompositeKeyStrategy {
    fn key(&self, row: &ShareholderRow) -> EntityKey {
        match &row.holder_orgnr {
            Some(orgnr) => EntityKey::org(orgnr),
            None => EntityKey::person(
                &row.holder_name,
                row.holder_birth_year,
                &row.holder_country,
            ),
        }
    }
}

/// Stateful resolver accumulating entities and issuers across batches.
///
/// Identity keys never change once derived; display names are
/// last-write-wins, preferring the most recent non-empty value, so a later
/// file can correct casing or spelling without forking the identity.
pub struct EntityResolver {
    strategy: Box<dyn ResolveStrategy>,
    entities: HashMap<EntityKey, ShareEntity>,
    companies: HashMap<String, Company>,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(CompositeKeyStrategy)
    }
}

impl EntityResolver {
    pub fn new(strategy: impl ResolveStrategy + 'static) -> Self {
        Self {
            strategy: Box::new(strategy),
            entities: HashMap::new(),
            companies: HashMap::new(),
        }
    }

    /// Resolve a row's holder, upserting the entity record.
    pub fn resolve(&mut self, row: &ShareholderRow) -> EntityKey {
        let key = self.strategy.key(row);
        let entry = self
            .entities
            .entry(key.clone())
            .or_insert_with(|| ShareEntity {
                key: key.clone(),
                name: row.holder_name.clone(),
                entity_type: if row.holder_orgnr.is_some() {
                    EntityType::Company
                } else {
                    EntityType::Person
                },
                orgnr: row.holder_orgnr.clone(),
                birth_year: row.holder_birth_year,
                country: row.holder_country.clone(),
            });

        // Last write wins for display data only; the key is immutable.
        if !row.holder_name.is_empty() {
            entry.name = row.holder_name.clone();
        }
        if entry.birth_year.is_none() {
            entry.birth_year = row.holder_birth_year;
        }
        key
    }

    /// Record the row's issuer, correcting the display name (latest wins).
    pub fn resolve_company(&mut self, row: &ShareholderRow) {
        let entry = self
            .companies
            .entry(row.company_orgnr.clone())
            .or_insert_with(|| Company {
                orgnr: row.company_orgnr.clone(),
                name: row.company_name.clone(),
                total_shares: None,
            });
        if !row.company_name.is_empty() {
            entry.name = row.company_name.clone();
        }
        if row.company_total_shares.is_some() {
            entry.total_shares = row.company_total_shares;
        }
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&ShareEntity> {
        self.entities.get(key)
    }

    pub fn company(&self, orgnr: &str) -> Option<&Company> {
        self.companies.get(orgnr)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ShareEntity> {
        self.entities.values()
    }

    pub fn companies(&self) -> impl Iterator<Item = &Company> {
        self.companies.values()
    }
}
