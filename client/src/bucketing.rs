//! Consistent percentile bucketing.
//!
//! An entity lands in one of 100 buckets derived from a CRC-32 of the feature
//! name followed by the entity id. The bucket is stable for a given pair, so
//! raising a rollout percentage only ever adds entities.

/// CRC-32 (IEEE) of `feature` immediately followed by the decimal rendering
/// of `id`.
pub fn checksum(feature: &str, id: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(feature.as_bytes());
    // Ids are rendered as signed 64 bit integers so ids above i64::MAX wrap
    // exactly like the reference clients do.
    hasher.update((id as i64).to_string().as_bytes());
    hasher.finalize()
}

/// Whether `id` falls inside a rollout of `percentile` (0.0 to 1.0) for
/// `feature`.
pub fn within_percentile(feature: &str, id: u64, percentile: f64) -> bool {
    let threshold = (percentile * 100.0) as u32;
    checksum(feature, id) % 100 < threshold
}
