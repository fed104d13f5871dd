//! Service catalog
//!
//! Resolves instance profiles (flavors) to service identifiers and tariff
//! entries. Services that show up in telemetry before an operator has
//! priced them are provisioned on the fly as zero-priced entries flagged
//! for review, so a run never aborts on an unknown name.

use dashmap::DashMap;
use nimbill_common::{
    NimbillError, PricingError, RateUnit, Result, ServiceId, Tariff, TariffEntry,
};
use tracing::{debug, warn};

/// Tariff and profile lookups used by transformers and rating
pub trait ServiceCatalog: Send + Sync {
    /// Service billed for a resource profile
    fn lookup_profile(&self, profile: &str) -> Result<ServiceId>;

    /// Price and rate of `service` under `tariff_id`
    fn get_price(&self, tariff_id: &str, service: &str) -> Result<TariffEntry>;

    /// Idempotently provision a zero-priced service for an unrecognised tag
    fn register_unknown_service(&self, tag: &str, unit: RateUnit) -> ServiceId;

    /// Services provisioned automatically and still awaiting a price
    fn flagged_services(&self) -> Vec<ServiceId>;

    /// Profile lookup falling back to provisioning
    fn resolve_profile(&self, profile: &str) -> ServiceId {
        match self.lookup_profile(profile) {
            Ok(service) => service,
            Err(err) => {
                warn!(profile, error = %err, "Provisioning unknown profile");
                self.register_unknown_service(profile, RateUnit::Time)
            }
        }
    }

    /// Price lookup falling back to provisioning
    fn price_or_provision(&self, tariff_id: &str, service: &str, unit: RateUnit) -> Result<TariffEntry> {
        match self.get_price(tariff_id, service) {
            Err(NimbillError::Pricing(PricingError::UnknownService { .. })) => {
                warn!(tariff = tariff_id, service, "Provisioning unknown service");
                let service = self.register_unknown_service(service, unit);
                self.get_price(tariff_id, &service)
            }
            other => other,
        }
    }
}

/// In-memory catalog backed by DashMap
pub struct InMemoryCatalog {
    tariffs: DashMap<String, Tariff>,
    /// Profile tag -> service id
    profiles: DashMap<String, ServiceId>,
    /// Auto-provisioned entries, valid under every tariff
    provisioned: DashMap<ServiceId, TariffEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            tariffs: DashMap::new(),
            profiles: DashMap::new(),
            provisioned: DashMap::new(),
        }
    }

    /// Add or replace a tariff
    pub fn with_tariff(self, tariff: Tariff) -> Self {
        self.insert_tariff(tariff);
        self
    }

    /// Map a profile tag to a service
    pub fn with_profile(self, profile: impl Into<String>, service: impl Into<ServiceId>) -> Self {
        self.profiles.insert(profile.into(), service.into());
        self
    }

    pub fn insert_tariff(&self, tariff: Tariff) {
        debug!(tariff = %tariff.id, entries = tariff.entries.len(), "Loaded tariff");
        self.tariffs.insert(tariff.id.clone(), tariff);
    }

    /// Operator sets a price for a service, clearing its review flag
    pub fn set_price(&self, tariff_id: &str, entry: TariffEntry) -> Result<()> {
        let mut tariff = self
            .tariffs
            .get_mut(tariff_id)
            .ok_or_else(|| PricingError::UnknownTariff {
                tariff: tariff_id.to_string(),
            })?;
        self.provisioned.remove(&entry.service);
        tariff.entries.insert(entry.service.clone(), entry);
        Ok(())
    }

    pub fn tariff_count(&self) -> usize {
        self.tariffs.len()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCatalog for InMemoryCatalog {
    fn lookup_profile(&self, profile: &str) -> Result<ServiceId> {
        self.profiles
            .get(profile)
            .map(|s| s.clone())
            .ok_or_else(|| {
                PricingError::UnknownProfile {
                    profile: profile.to_string(),
                }
                .into()
            })
    }

    fn get_price(&self, tariff_id: &str, service: &str) -> Result<TariffEntry> {
        let tariff = self
            .tariffs
            .get(tariff_id)
            .ok_or_else(|| PricingError::UnknownTariff {
                tariff: tariff_id.to_string(),
            })?;

        if let Some(entry) = tariff.get(service) {
            return Ok(entry.clone());
        }
        self.provisioned
            .get(service)
            .map(|e| e.clone())
            .ok_or_else(|| {
                PricingError::UnknownService {
                    service: service.to_string(),
                }
                .into()
            })
    }

    fn register_unknown_service(&self, tag: &str, unit: RateUnit) -> ServiceId {
        let service = self
            .profiles
            .entry(tag.to_string())
            .or_insert_with(|| tag.to_string())
            .clone();

        // Tariffs that price the service keep precedence in get_price
        self.provisioned
            .entry(service.clone())
            .or_insert_with(|| TariffEntry::provisional(service.clone(), unit));
        service
    }

    fn flagged_services(&self) -> Vec<ServiceId> {
        let mut flagged: Vec<_> = self.provisioned.iter().map(|e| e.key().clone()).collect();
        flagged.sort();
        flagged
    }
}
