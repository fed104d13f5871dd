//! Boot-from-image classification
//!
//! An instance booted from an image carries its root disk; one booted from
//! a volume does not, and that disk is billed by the volume meter instead.
//! A single volume-boot indication anywhere in the window suppresses the
//! record.

use nimbill_common::{Result, Sample, TimeLabel, UsageRecord};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use super::{window_record, TransformContext, Transformer};
use crate::metering::collector::split_window;

const IMAGE_KEYS: &[&str] = &["image_ref", "image_ref_url", "image_meta.base_image_ref"];
const SIZE_KEYS: &[&str] = &["root_gb", "disk_gb", "size"];
const NONE_SENTINEL: &str = "none";

#[derive(Debug, Clone)]
pub struct FromImage {
    image_keys: Vec<String>,
    size_keys: Vec<String>,
}

impl FromImage {
    pub fn new() -> Self {
        Self {
            image_keys: IMAGE_KEYS.iter().map(|k| k.to_string()).collect(),
            size_keys: SIZE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Override the metadata keys inspected for the image reference
    pub fn with_image_keys(mut self, keys: &[&str]) -> Self {
        self.image_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// A missing, null, empty or `none` image reference means a volume boot
    fn boots_from_volume(&self, sample: &Sample) -> bool {
        let from_image = self.image_keys.iter().find_map(|key| match sample.metadata.get(key)? {
            Value::Null => Some(false),
            Value::String(s) => {
                let s = s.trim();
                Some(!s.is_empty() && !s.eq_ignore_ascii_case(NONE_SENTINEL))
            }
            _ => Some(true),
        });
        from_image != Some(true)
    }

    fn root_size(&self, sample: &Sample) -> Option<Decimal> {
        let keys: Vec<&str> = self.size_keys.iter().map(String::as_str).collect();
        sample.meta_decimal(&keys)
    }
}

impl Default for FromImage {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for FromImage {
    fn name(&self) -> &'static str {
        "from_image"
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        samples: &[Sample],
        window: &TimeLabel,
    ) -> Result<Vec<UsageRecord>> {
        let split = split_window(samples, window);
        if split.is_empty() {
            return Ok(Vec::new());
        }

        let mut size = Decimal::ZERO;
        for sample in &split.in_window {
            if self.boots_from_volume(sample) {
                debug!(meter = ctx.meter, %window, "Volume-backed boot, root disk billed elsewhere");
                return Ok(Vec::new());
            }
            if let Some(root) = self.root_size(sample) {
                size = size.max(root);
            }
        }

        Ok(vec![window_record(ctx, window, size)])
    }
}
