//! Price granularity expansion.
//!
//! Buckets are expanded in fixed-point micro units so that repeated additions of the
//! increment never drift; every value is rounded to cents independently before it is
//! added to the union.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

const MICROS_PER_UNIT: i64 = 1_000_000;
const MICROS_PER_CENT: i64 = 10_000;

/// One rate-granularity range, inclusive of `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBucket {
    pub min: f64,
    pub max: f64,
    #[serde(alias = "interval")]
    pub increment: f64,
}

impl PriceBucket {
    pub const fn new(min: f64, max: f64, increment: f64) -> Self {
        Self { min, max, increment }
    }
}

/// Canonical two-decimal price point. Equality and ordering are by cents, so two
/// buckets that round to the same display value collapse into one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpmName {
    cents: i64,
}

impl CpmName {
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn cents(self) -> i64 {
        self.cents
    }

    /// Value scaled by an arbitrary per-unit factor (e.g. the platform's micro factor).
    pub fn scaled(self, factor_per_unit: i64) -> i64 {
        (i128::from(self.cents) * i128::from(factor_per_unit) / 100) as i64
    }
}

impl fmt::Display for CpmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for CpmName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Largest value a bucket bound or increment may name.
pub const MAX_PRICE: f64 = 100_000.0;

/// Why a bucket cannot be expanded.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketError {
    NotFinite(PriceBucket),
    Negative(PriceBucket),
    TooLarge(PriceBucket),
    Inverted(PriceBucket),
    ZeroIncrement(PriceBucket),
    TooManyPoints { limit: usize },
}

impl fmt::Display for BucketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketError::NotFinite(b) => write!(f, "price bucket {} has a non-finite bound", describe(b)),
            BucketError::Negative(b) => write!(f, "price bucket {} has a negative value", describe(b)),
            BucketError::TooLarge(b) => {
                write!(f, "price bucket {} exceeds the maximum price {MAX_PRICE}", describe(b))
            }
            BucketError::Inverted(b) => write!(f, "price bucket {} has min greater than max", describe(b)),
            BucketError::ZeroIncrement(b) => {
                write!(f, "price bucket {} needs a positive increment", describe(b))
            }
            BucketError::TooManyPoints { limit } => {
                write!(f, "price granularity expands to more than {limit} price points")
            }
        }
    }
}

impl std::error::Error for BucketError {}

fn describe(bucket: &PriceBucket) -> String {
    format!(
        "{{min: {}, max: {}, increment: {}}}",
        bucket.min, bucket.max, bucket.increment
    )
}

/// Bounds are checked against `MAX_PRICE` first, so the product stays far inside `i64`.
fn to_micros(value: f64) -> i64 {
    (value * MICROS_PER_UNIT as f64).round() as i64
}

fn micros_to_cents(micros: i64) -> i64 {
    // half-up on the absolute value, matching '%.2f' for the values buckets produce
    let rounded = (micros.abs() + MICROS_PER_CENT / 2) / MICROS_PER_CENT;
    if micros < 0 { -rounded } else { rounded }
}

/// Expand a single bucket into its price points (cents), inclusive of `max`. Fails
/// before allocating when the bucket would yield more than `max_points` values.
pub fn bucket_values(
    bucket: &PriceBucket,
    max_points: usize,
) -> Result<Vec<CpmName>, BucketError> {
    if !(bucket.min.is_finite() && bucket.max.is_finite() && bucket.increment.is_finite()) {
        return Err(BucketError::NotFinite(*bucket));
    }
    if bucket.min < 0.0 || bucket.max < 0.0 || bucket.increment < 0.0 {
        return Err(BucketError::Negative(*bucket));
    }
    if bucket.min > MAX_PRICE || bucket.max > MAX_PRICE || bucket.increment > MAX_PRICE {
        return Err(BucketError::TooLarge(*bucket));
    }

    let min = to_micros(bucket.min);
    let max = to_micros(bucket.max);
    if min > max {
        return Err(BucketError::Inverted(*bucket));
    }
    if min == max {
        return Ok(vec![CpmName::from_cents(micros_to_cents(min))]);
    }

    let step = to_micros(bucket.increment);
    if step <= 0 {
        return Err(BucketError::ZeroIncrement(*bucket));
    }

    let count = (max - min) / step;
    if usize::try_from(count).map_or(true, |count| count >= max_points) {
        return Err(BucketError::TooManyPoints { limit: max_points });
    }
    (0..=count)
        .map(|k| {
            k.checked_mul(step)
                .and_then(|offset| min.checked_add(offset))
                .map(|micros| CpmName::from_cents(micros_to_cents(micros)))
                .ok_or(BucketError::TooLarge(*bucket))
        })
        .collect()
}

/// Union every bucket's expansion, de-duplicated by display value and sorted ascending.
pub fn expand_buckets(
    buckets: &[PriceBucket],
    max_points: usize,
) -> Result<Vec<CpmName>, BucketError> {
    let mut values = BTreeSet::new();
    for bucket in buckets {
        values.extend(bucket_values(bucket, max_points)?);
        if values.len() > max_points {
            return Err(BucketError::TooManyPoints { limit: max_points });
        }
    }
    Ok(values.into_iter().collect())
}
