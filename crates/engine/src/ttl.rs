//! Lifetime of signed read URLs.

pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const MIN_TTL_SECS: u64 = 60;
pub const MAX_TTL_SECS: u64 = 86_400;

/// Clamp a requested TTL into `[MIN_TTL_SECS, MAX_TTL_SECS]`.
/// Out-of-range values are clamped, never rejected.
pub fn clamp_ttl(requested: Option<i64>) -> u64 {
    match requested {
        None => DEFAULT_TTL_SECS,
        Some(secs) if secs <= MIN_TTL_SECS as i64 => MIN_TTL_SECS,
        Some(secs) => (secs as u64).min(MAX_TTL_SECS),
    }
}

/// Interpret the `expiresIn` query parameter. Anything that is not a
/// number counts as absent.
pub fn parse_expires_in(raw: Option<&str>) -> u64 {
    let requested = raw.map(str::trim).and_then(|value| {
        value
            .parse::<i64>()
            .ok()
            .or_else(|| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.floor() as i64)
            })
    });
    clamp_ttl(requested)
}
