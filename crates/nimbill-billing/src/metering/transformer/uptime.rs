//! Uptime transformer
//!
//! Tracks the power state of an instance across a window. Each sample's
//! state holds until the next sample; only `active` accrues. A run is
//! closed whenever the instance leaves `active` or changes profile, so the
//! output holds one record per contiguous (active, same-profile) run.
//!
//! Samples before the window only matter through the latest one, which
//! stands for the state at the window start. Without such a lead-in,
//! accrual begins at the first observed sample.

use chrono::{DateTime, Utc};
use nimbill_common::{Result, Sample, ServiceId, TimeLabel, UsageRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

use super::{TransformContext, Transformer};
use crate::metering::collector::split_window;

const STATE_KEYS: &[&str] = &["status", "state"];
const PROFILE_KEYS: &[&str] = &["flavor", "instance_type"];

/// Instance power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Active,
    Building,
    Paused,
    Suspended,
    Stopped,
    Rescued,
    Resized,
    SoftDeleted,
    Deleted,
    Error,
    Shelved,
    ShelvedOffloaded,
    Unknown,
}

impl PowerState {
    /// Only running instances accrue
    pub fn is_billable(&self) -> bool {
        matches!(self, PowerState::Active)
    }

    /// Numeric state codes used by pollsters that publish state as the sample value
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => PowerState::Active,
            2 => PowerState::Building,
            3 => PowerState::Paused,
            4 => PowerState::Suspended,
            5 => PowerState::Stopped,
            6 => PowerState::Rescued,
            7 => PowerState::Resized,
            8 => PowerState::SoftDeleted,
            9 => PowerState::Deleted,
            10 => PowerState::Error,
            11 => PowerState::Shelved,
            12 => PowerState::ShelvedOffloaded,
            _ => PowerState::Unknown,
        }
    }

    /// State of a sample: metadata first, then the value as a state code
    pub fn of(sample: &Sample) -> Self {
        if let Some(state) = sample.meta_str(STATE_KEYS) {
            return state.parse().unwrap_or(PowerState::Unknown);
        }
        sample
            .value
            .and_then(|v| i64::try_from(v.trunc()).ok())
            .map(Self::from_code)
            .unwrap_or(PowerState::Unknown)
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "running" => Ok(PowerState::Active),
            "building" | "build" => Ok(PowerState::Building),
            "paused" => Ok(PowerState::Paused),
            "suspended" => Ok(PowerState::Suspended),
            "stopped" | "shutoff" => Ok(PowerState::Stopped),
            "rescued" | "rescue" => Ok(PowerState::Rescued),
            "resized" | "verify_resize" => Ok(PowerState::Resized),
            "soft_deleted" | "soft-delete" => Ok(PowerState::SoftDeleted),
            "deleted" => Ok(PowerState::Deleted),
            "error" => Ok(PowerState::Error),
            "shelved" => Ok(PowerState::Shelved),
            "shelved_offloaded" => Ok(PowerState::ShelvedOffloaded),
            other => Err(format!("Unknown power state: {}", other)),
        }
    }
}

/// Uptime accrual per profile
#[derive(Debug, Clone, Default)]
pub struct Uptime;

impl Uptime {
    pub fn new() -> Self {
        Self
    }
}

/// Open accrual run
struct Run {
    service: ServiceId,
    start: DateTime<Utc>,
}

fn close(run: Run, end: DateTime<Utc>, out: &mut Vec<UsageRecord>) {
    let secs = (end - run.start).num_seconds();
    if secs > 0 {
        out.push(UsageRecord::new(run.service, run.start, end, Decimal::from(secs)));
    }
}

impl Transformer for Uptime {
    fn name(&self) -> &'static str {
        "uptime"
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        samples: &[Sample],
        window: &TimeLabel,
    ) -> Result<Vec<UsageRecord>> {
        let split = split_window(samples, window);
        // No in-window evidence that the instance still exists
        if split.is_empty() {
            return Ok(Vec::new());
        }

        let (window_start, window_end) = window.datetime_range();
        let points = split
            .lead_in
            .map(|s| (window_start, s))
            .into_iter()
            .chain(split.in_window.iter().map(|s| (s.timestamp, *s)));

        let mut records = Vec::new();
        let mut current: Option<Run> = None;
        let mut last_profile: Option<String> = None;

        for (at, sample) in points {
            let state = PowerState::of(sample);
            if state == PowerState::Unknown {
                warn!(meter = ctx.meter, %at, "Unrecognised power state, treating as not billable");
            }

            if let Some(profile) = sample.meta_str(PROFILE_KEYS) {
                last_profile = Some(profile);
            }

            if !state.is_billable() {
                if let Some(run) = current.take() {
                    close(run, at, &mut records);
                }
                continue;
            }

            let service = match &last_profile {
                Some(profile) => ctx.catalog.resolve_profile(profile),
                None => ctx.service.to_string(),
            };

            match current.take() {
                Some(run) if run.service == service => current = Some(run),
                Some(run) => {
                    close(run, at, &mut records);
                    current = Some(Run { service, start: at });
                }
                None => current = Some(Run { service, start: at }),
            }
        }

        if let Some(run) = current.take() {
            close(run, window_end, &mut records);
        }

        debug!(meter = ctx.meter, %window, runs = records.len(), "Uptime window");
        Ok(records)
    }
}
