//! Bitrate discovery bracketed by safe mode transitions.
//!
//! The driver is switched to listen-only before probing so a wrong guess never
//! acknowledges or error-flags frames on a live bus, and is always returned to
//! normal mode afterwards. The search itself (trial configuration plus a bounded
//! listen at each candidate) belongs to the driver.

use tracing::{debug, info, warn};

use crate::{CanDriver, CanMode, Result, TransportError};

/// Probe `driver` for the active bitrate among `rates`.
///
/// Candidates are tried in the given order; the earliest one with traffic wins.
/// Fails without touching the driver when `rates` is empty or the driver cannot
/// switch modes or probe. Otherwise the driver ends up in [`CanMode::Normal`]
/// whatever the probe outcome.
pub fn detect<D: CanDriver + ?Sized>(driver: &mut D, rates: &[u32]) -> Result<u32> {
    if rates.is_empty() {
        return Err(TransportError::InvalidArgument("empty bitrate candidate list"));
    }
    let caps = driver.capabilities();
    if !caps.set_mode {
        return Err(TransportError::Unsupported("set_mode"));
    }
    if !caps.autobaud {
        return Err(TransportError::Unsupported("auto_baud_detect"));
    }

    let name = driver.info().name;
    debug!(driver = %name, candidates = rates.len(), "autobaud: entering listen-only");
    if let Err(e) = driver.set_mode(CanMode::Silent) {
        warn!(
            driver = %name,
            error = %e,
            "autobaud: failed to enter listen-only, probing anyway"
        );
    }
    let outcome = driver.auto_baud_detect(rates);

    if let Err(e) = driver.set_mode(CanMode::Normal) {
        warn!(driver = %name, error = %e, "autobaud: failed to restore normal mode");
    }

    match &outcome {
        Ok(rate) => info!(driver = %name, bitrate = rate, "autobaud: detected"),
        Err(e) => info!(driver = %name, error = %e, "autobaud: no bitrate detected"),
    }
    outcome
}
