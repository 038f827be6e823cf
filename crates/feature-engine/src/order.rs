use trading_core::TradingError;

/// The exact feature order emitted by `FeatureEngine::extract`.
///
/// The predictor consumes features positionally, so this order is part of the
/// wire contract. Do not reorder without invalidating every persisted weight
/// vector; the checksum below exists to make that mistake fatal at startup.
pub const FEATURE_ORDER: [&str; 25] = [
    // Microstructure (6)
    "tick_direction",
    "spread_ratio",
    "wicks_ratio",
    "volume_imbalance",
    "trade_intensity",
    "price_acceleration",
    // Short-term momentum (5)
    "micro_momentum_1",
    "micro_momentum_3",
    "rsi_3",
    "ema_cross_fast",
    "velocity",
    // Multi-timeframe (5)
    "mtf_trend_5m",
    "mtf_trend_15m",
    "mtf_volume_5m",
    "mtf_volatility_ratio",
    "session_range_position",
    // Session patterns (4)
    "vwap_distance",
    "opening_range_breakout",
    "time_of_day_sin",
    "time_of_day_cos",
    // Volume profile (5)
    "volume_percentile",
    "delta_cumulative",
    "vwap_stdev_bands",
    "relative_volume",
    "volume_price_trend",
];

pub const FEATURE_COUNT: usize = FEATURE_ORDER.len();

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Checksum of the declared feature order, hashed name-by-name with a
/// newline separator so that concatenation ambiguities cannot collide.
pub fn schema_checksum() -> u64 {
    let mut hash = FNV_OFFSET;
    for name in FEATURE_ORDER {
        for &b in name.as_bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash ^= b'\n' as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Validate the declared order: no empty names, no duplicates, names
/// restricted to `[a-z0-9_]` with no leading/trailing/double underscores.
pub fn validate_feature_order() -> Result<(), TradingError> {
    let mut seen = std::collections::HashSet::with_capacity(FEATURE_COUNT);
    for name in FEATURE_ORDER {
        if name.is_empty() {
            return Err(TradingError::InvalidConfig(
                "empty feature name in FEATURE_ORDER".to_string(),
            ));
        }
        if !seen.insert(name) {
            return Err(TradingError::InvalidConfig(format!(
                "duplicate feature name in FEATURE_ORDER: {name}"
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(TradingError::InvalidConfig(format!(
                "invalid character in feature name: {name}"
            )));
        }
        if name.starts_with('_') || name.ends_with('_') || name.contains("__") {
            return Err(TradingError::InvalidConfig(format!(
                "malformed feature name: {name}"
            )));
        }
    }
    Ok(())
}

/// Compare the live schema against the checksum carried by a model artifact.
/// A mismatch means the artifact was trained against a different feature
/// layout and must not be loaded.
pub fn verify_model_checksum(expected: u64) -> Result<(), TradingError> {
    let actual = schema_checksum();
    if actual != expected {
        return Err(TradingError::SchemaMismatch { expected, actual });
    }
    Ok(())
}
