//! Nimbill Binary
//!
//! Bills one tenant period from a JSON input file and prints the invoice.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nimbill_billing::{
    BillingConfig, BillingInput, BillingService, SegmentCache, SegmentStore, TransformerRegistry,
    SERVICE_NAME,
};
use nimbill_common::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting {} v{}", SERVICE_NAME, VERSION);

    // Load configuration
    let config = BillingConfig::load()?;
    info!(
        window_secs = config.metering.window_secs,
        deviation_secs = config.metering.deviation_secs,
        default_tariff = %config.metering.default_tariff,
        "Loaded configuration"
    );

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NIMBILL_INPUT").ok())
        .context("usage: nimbill <input.json> (or set NIMBILL_INPUT)")?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
    let input: BillingInput =
        serde_json::from_str(&raw).with_context(|| format!("Invalid billing input in {}", path))?;

    let (catalog, request) = input.into_parts()?;
    let mut service = BillingService::new(
        config.clone(),
        Arc::new(TransformerRegistry::openstack()),
        Arc::new(catalog),
    );

    if let Some(url) = config.cache.redis_url.as_deref() {
        match SegmentCache::new(url).await {
            Ok(cache) => {
                let cache = cache.with_prefix(&config.cache.prefix).with_ttl(config.cache.ttl());
                let store: Arc<dyn SegmentStore> = Arc::new(cache);
                service = service.with_store(store);
                info!("Segment cache connected");
            }
            Err(err) => warn!(error = %err, "Segment cache unavailable, billing without history"),
        }
    }

    let invoice = service.run_period(request).await?;
    println!("{}", serde_json::to_string_pretty(&invoice)?);

    info!(total = %invoice.total, flagged = invoice.flagged_services.len(), "Done");
    Ok(())
}
