//! Billing service
//!
//! Drives one billing period for a tenant: every usage job is metered on a
//! blocking worker, the resulting records are reconciled against coverage
//! from earlier runs, and the reconciled usage is rated into an invoice.

use chrono::{DateTime, Utc};
use nimbill_common::{
    NimbillError, RateUnit, Result, Sample, TariffAssignment, TimeLabel, UsageRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::BillingConfig;
use crate::metering::{
    MeterBinding, ReconcileKey, SampleCollector, SegmentStore, TransformContext,
    TransformerRegistry, UsageReconciler,
};
use crate::pricing::{Invoice, RatingEngine, ServiceCatalog};

/// Samples of one meter for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageJob {
    /// Owning tenant, defaults to the period's tenant
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    pub meter: String,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

/// One tenant's billing period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodRequest {
    pub tenant_id: String,
    /// Inclusive, aligned to the window width
    pub period_start: DateTime<Utc>,
    /// Exclusive
    pub period_end: DateTime<Utc>,
    pub jobs: Vec<UsageJob>,
    #[serde(default)]
    pub assignments: Vec<TariffAssignment>,
}

/// Records produced by one job
struct MeteredJob {
    unit: RateUnit,
    records: Vec<UsageRecord>,
}

/// Billing service
pub struct BillingService {
    config: BillingConfig,
    registry: Arc<TransformerRegistry>,
    catalog: Arc<dyn ServiceCatalog>,
    rating: RatingEngine,
    collector: Arc<SampleCollector>,
    store: Option<Arc<dyn SegmentStore>>,
}

impl BillingService {
    pub fn new(
        config: BillingConfig,
        registry: Arc<TransformerRegistry>,
        catalog: Arc<dyn ServiceCatalog>,
    ) -> Self {
        let rating = RatingEngine::new(Arc::clone(&catalog))
            .with_default_tariff(config.metering.default_tariff.clone());
        Self {
            config,
            registry,
            catalog,
            rating,
            collector: Arc::new(SampleCollector::new()),
            store: None,
        }
    }

    /// Persist reconciled coverage across runs
    pub fn with_store(mut self, store: Arc<dyn SegmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn collector(&self) -> &SampleCollector {
        &self.collector
    }

    /// Meter, reconcile and rate one tenant's period
    #[instrument(skip(self, request), fields(tenant = %request.tenant_id, jobs = request.jobs.len()))]
    pub async fn run_period(&self, request: PeriodRequest) -> Result<Invoice> {
        let windows = self.windows(&request)?;
        let tenant_id = request.tenant_id;

        let mut tasks = JoinSet::new();
        for job in request.jobs {
            if let Some(owner) = job.tenant_id.as_deref() {
                if owner != tenant_id {
                    warn!(owner, resource = %job.resource_id, "Skipping job owned by another tenant");
                    continue;
                }
            }
            let binding = match self.registry.get(&job.meter) {
                Ok(binding) => binding.clone(),
                Err(err) => {
                    warn!(meter = %job.meter, error = %err, "Skipping job for unregistered meter");
                    continue;
                }
            };

            let catalog = Arc::clone(&self.catalog);
            let collector = Arc::clone(&self.collector);
            let windows = windows.clone();
            tasks.spawn_blocking(move || meter_job(job, &binding, catalog.as_ref(), &collector, &windows));
        }

        let mut metered = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let job = joined
                .map_err(|e| NimbillError::Internal(format!("Metering worker failed: {}", e)))??;
            metered.push(job);
        }

        let reconciler = UsageReconciler::new(self.config.metering.deviation_secs);
        let mut keys: BTreeMap<ReconcileKey, RateUnit> = BTreeMap::new();
        for job in &metered {
            for record in &job.records {
                keys.entry(ReconcileKey::from_record(&tenant_id, record))
                    .or_insert(job.unit);
            }
        }

        self.restore_coverage(&reconciler, &keys).await;
        for job in &metered {
            for record in &job.records {
                reconciler.record(&tenant_id, record, job.unit)?;
            }
        }
        self.persist_coverage(&reconciler, &keys).await;

        let mut records = Vec::new();
        for window in &windows {
            records.extend(reconciler.reconciled(&tenant_id, window)?);
        }
        debug!(records = records.len(), keys = keys.len(), "Reconciled period");

        let invoice = self.rating.rate_with_units(
            &tenant_id,
            (request.period_start, request.period_end),
            &records,
            &request.assignments,
            |record| {
                keys.get(&ReconcileKey::from_record(&tenant_id, record))
                    .copied()
                    .unwrap_or(RateUnit::Quantity)
            },
        )?;

        info!(
            invoice_id = %invoice.invoice_id,
            lines = invoice.line_count(),
            total = %invoice.total,
            "Billing period complete"
        );
        Ok(invoice)
    }

    fn windows(&self, request: &PeriodRequest) -> Result<Vec<TimeLabel>> {
        if request.period_end <= request.period_start {
            return Err(NimbillError::Validation(format!(
                "Empty billing period {} .. {}",
                request.period_start, request.period_end
            )));
        }

        let first = TimeLabel::with_width(request.period_start, self.config.metering.window_secs)?;
        if first.start() != request.period_start {
            return Err(NimbillError::Validation(format!(
                "Period start {} is not aligned to {}s windows",
                request.period_start, self.config.metering.window_secs
            )));
        }
        Ok(first.iter_until(request.period_end).collect())
    }

    async fn restore_coverage(&self, reconciler: &UsageReconciler, keys: &BTreeMap<ReconcileKey, RateUnit>) {
        let Some(store) = &self.store else {
            return;
        };
        for (key, unit) in keys {
            match store.load(key).await {
                Ok(Some(encoded)) => reconciler.restore(key.clone(), &encoded, *unit),
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %key.canonical(), error = %err, "Coverage unavailable, billing without history")
                }
            }
        }
    }

    async fn persist_coverage(&self, reconciler: &UsageReconciler, keys: &BTreeMap<ReconcileKey, RateUnit>) {
        let Some(store) = &self.store else {
            return;
        };
        for key in keys.keys() {
            let Some(encoded) = reconciler.snapshot(key) else {
                continue;
            };
            if let Err(err) = store.store(key, encoded).await {
                warn!(key = %key.canonical(), error = %err, "Failed to persist coverage");
            }
        }
    }
}

/// Run a job's transformer over every window
fn meter_job(
    job: UsageJob,
    binding: &MeterBinding,
    catalog: &dyn ServiceCatalog,
    collector: &SampleCollector,
    windows: &[TimeLabel],
) -> Result<MeteredJob> {
    let samples = collector.normalize(job.samples);
    let ctx = TransformContext {
        meter: &job.meter,
        service: &binding.service,
        catalog,
    };

    let mut records = Vec::new();
    for window in windows {
        for record in binding.transformer.transform(&ctx, &samples, window)? {
            records.push(record.with_resource(job.resource_id.clone(), job.resource_name.clone()));
        }
    }

    debug!(
        meter = %job.meter,
        transformer = binding.transformer.name(),
        resource = %job.resource_id,
        records = records.len(),
        "Metered job"
    );
    Ok(MeteredJob {
        unit: binding.unit,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::InMemorySegmentCache;
    use crate::pricing::InMemoryCatalog;
    use chrono::TimeZone;
    use nimbill_common::{Tariff, TariffEntry};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn service() -> BillingService {
        let tariff = Tariff::new("default")
            .with_entry(TariffEntry::new("m1.small", dec!(0.10), dec!(3600), RateUnit::Time).unwrap())
            .with_entry(TariffEntry::new("volume.size", dec!(0.01), dec!(1), RateUnit::Quantity).unwrap());
        let catalog = InMemoryCatalog::new()
            .with_tariff(tariff)
            .with_profile("m1.small", "m1.small");

        BillingService::new(
            BillingConfig::default(),
            Arc::new(TransformerRegistry::openstack()),
            Arc::new(catalog),
        )
    }

    fn instance_job(minutes: &[(u32, u32)]) -> UsageJob {
        UsageJob {
            tenant_id: None,
            resource_id: "vm-1".to_string(),
            resource_name: Some("web".to_string()),
            meter: "instance".to_string(),
            samples: minutes
                .iter()
                .map(|&(h, m)| {
                    Sample::new(at(h, m), Some(dec!(1)))
                        .with_metadata(json!({"status": "active", "flavor": "m1.small"}))
                })
                .collect(),
        }
    }

    fn volume_job() -> UsageJob {
        UsageJob {
            tenant_id: None,
            resource_id: "vol-1".to_string(),
            resource_name: None,
            meter: "volume.size".to_string(),
            samples: vec![
                Sample::new(at(0, 10), Some(dec!(20))),
                Sample::new(at(1, 10), Some(dec!(20))),
            ],
        }
    }

    fn request(jobs: Vec<UsageJob>) -> PeriodRequest {
        PeriodRequest {
            tenant_id: "acme".to_string(),
            period_start: at(0, 0),
            period_end: at(2, 0),
            jobs,
            assignments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_run_period() {
        let service = service();
        let jobs = vec![instance_job(&[(0, 0), (0, 30), (1, 0), (1, 30)]), volume_job()];

        let invoice = service.run_period(request(jobs)).await.unwrap();

        assert_eq!(invoice.tenant_id, "acme");
        assert_eq!(invoice.line_count(), 4);
        assert_eq!(invoice.total, dec!(0.60));
        assert!(invoice.flagged_services.is_empty());
        assert_eq!(invoice.subtotal("default").unwrap().subtotal, dec!(0.60));
    }

    #[tokio::test]
    async fn test_store_prevents_double_billing() {
        let store = Arc::new(InMemorySegmentCache::new(100));
        let service = service().with_store(store.clone());
        let jobs = vec![instance_job(&[(0, 0), (0, 30), (1, 0), (1, 30)])];

        let first = service.run_period(request(jobs.clone())).await.unwrap();
        let second = service.run_period(request(jobs)).await.unwrap();
        assert_eq!(first.total, dec!(0.20));
        assert_eq!(second.total, dec!(0.20));

        // A partial re-delivery still sees the coverage billed earlier
        let partial = service
            .run_period(request(vec![instance_job(&[(0, 0), (0, 30)])]))
            .await
            .unwrap();
        assert_eq!(partial.line_count(), 2);
        assert_eq!(partial.total, dec!(0.20));
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_fractional_quantity_at_unit_rate() {
        let tariff = Tariff::new("default")
            .with_entry(TariffEntry::new("volume.size", dec!(1), dec!(1), RateUnit::Quantity).unwrap());
        let service = BillingService::new(
            BillingConfig::default(),
            Arc::new(TransformerRegistry::openstack()),
            Arc::new(InMemoryCatalog::new().with_tariff(tariff)),
        );
        let mut job = volume_job();
        job.samples = vec![Sample::new(at(0, 10), Some(dec!(20.5)))];
        let mut request = request(vec![job]);
        request.period_end = at(1, 0);

        let invoice = service.run_period(request).await.unwrap();
        let line = &invoice.subtotal("default").unwrap().lines[0];
        assert_eq!(line.record.volume, dec!(20.5));
        assert_eq!(line.billable_units, dec!(20.5));
        assert_eq!(invoice.total, dec!(20.5));
    }

    #[tokio::test]
    async fn test_unregistered_meter_and_foreign_jobs_skipped() {
        let service = service();
        let mut foreign = volume_job();
        foreign.tenant_id = Some("globex".to_string());
        let mut unknown = volume_job();
        unknown.meter = "cpu_util".to_string();

        let invoice = service.run_period(request(vec![foreign, unknown])).await.unwrap();
        assert_eq!(invoice.line_count(), 0);
        assert_eq!(invoice.total, dec!(0));
    }

    #[tokio::test]
    async fn test_unknown_flavor_flagged() {
        let service = service();
        let mut job = instance_job(&[(0, 0)]);
        job.samples[0].metadata = json!({"status": "active", "flavor": "gpu.xl"});

        let invoice = service.run_period(request(vec![job])).await.unwrap();
        assert_eq!(invoice.flagged_services, vec!["gpu.xl".to_string()]);
        assert_eq!(invoice.total, dec!(0));
    }

    #[tokio::test]
    async fn test_period_validation() {
        let service = service();
        let mut misaligned = request(Vec::new());
        misaligned.period_start = at(0, 15);
        assert!(matches!(
            service.run_period(misaligned).await,
            Err(NimbillError::Validation(_))
        ));

        let mut empty = request(Vec::new());
        empty.period_end = empty.period_start;
        assert!(service.run_period(empty).await.is_err());
    }
}
