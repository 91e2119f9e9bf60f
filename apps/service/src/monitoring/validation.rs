//! Admission-time validation for monitor configuration.

use anyhow::{Result, anyhow};
use url::Url;

use crate::database::models::Monitor;

const MIN_INTERVAL: u64 = 10; // 10 seconds
const MAX_INTERVAL: u64 = 86400; // 24 hours

/// Validate a monitor before it is saved.
pub fn validate_monitor(monitor: &Monitor) -> Result<()> {
    validate_request_url(&monitor.request_url)?;
    validate_interval("interval_normal", monitor.interval_normal)?;
    validate_interval("interval_error", monitor.interval_error)?;
    validate_interval("interval_match", monitor.interval_match)?;
    Ok(())
}

/// Validate a probe target URL
fn validate_request_url(target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for monitor: {other}")),
    }

    if url.host_str().is_none() {
        return Err(anyhow!("Monitor URL has no host"));
    }

    Ok(())
}

fn validate_interval(name: &str, interval_seconds: u64) -> Result<()> {
    if interval_seconds < MIN_INTERVAL {
        return Err(anyhow!(
            "{name} too short: {interval_seconds} seconds (minimum: {MIN_INTERVAL})"
        ));
    }

    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "{name} too long: {interval_seconds} seconds (maximum: {MAX_INTERVAL})"
        ));
    }

    Ok(())
}
