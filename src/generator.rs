//! Column value generators.
//!
//! Each generator can produce data in two ways:
//!
//! 1. [`DataGenerator::generate`] creates a new value to be inserted into the
//!    database.
//! 2. [`DataGenerator::sample_existing`] creates a value intended to be used
//!    in the WHERE clause of a statement. Most generators cannot guarantee
//!    that the value actually exists, as tracking every generated value would
//!    be prohibitively expensive; consult the individual generators for
//!    details.
//!
//! Generators are shared between all of a workload's workers, so they are
//! either immutable or keep their internal state in atomics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use enum_dispatch::enum_dispatch;
use mysql_async::Value;
use once_cell::sync::OnceCell;

use crate::config::DatabaseConfig;
use crate::random::{HistogramDistribution, Rand};

const CHARACTERS: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[enum_dispatch]
pub trait DataGenerator {
    fn generate(&self, r: &mut Rand) -> Value;
    fn sample_existing(&self, r: &mut Rand) -> Value;
}

/// Every supported generator kind. Dispatch is static so per-event value
/// generation never goes through a vtable.
#[enum_dispatch(DataGenerator)]
pub enum ColumnGenerator {
    Null(NullGenerator),
    UniformInt(UniformIntGenerator),
    UniformFloat(UniformFloatGenerator),
    NormalInt(NormalIntGenerator),
    NormalFloat(NormalFloatGenerator),
    HistogramInt(HistogramIntGenerator),
    HistogramFloat(HistogramFloatGenerator),
    UniformDecimal(UniformDecimalGenerator),
    UniformCardinalityString(UniformCardinalityStringGenerator),
    HistogramCardinalityString(HistogramCardinalityStringGenerator),
    UniformLengthString(UniformLengthStringGenerator),
    HistogramLengthString(HistogramLengthStringGenerator),
    UniqueString(UniqueStringGenerator),
    UniformDatetime(UniformDatetimeGenerator),
    Uuid(UuidGenerator),
    AutoIncrement(AutoIncrementGenerator),
    Enum(EnumGenerator),
    Json(JsonGenerator),
}

/// Only generates NULL.
pub struct NullGenerator;

impl DataGenerator for NullGenerator {
    fn generate(&self, _: &mut Rand) -> Value {
        Value::NULL
    }

    fn sample_existing(&self, _: &mut Rand) -> Value {
        Value::NULL
    }
}

/// Generates integers in `[min, max)` with a uniform distribution.
///
/// Sampling from existing is the same as generating, which means it is not
/// guaranteed to produce an existing value if the number of rows in the
/// database is small.
pub struct UniformIntGenerator {
    min: i64,
    max: i64,
}

impl UniformIntGenerator {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }
}

impl DataGenerator for UniformIntGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        r.uniform_int(self.min, self.max).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates floats in `[min, max)` with a uniform distribution.
///
/// Sampling from existing is the same as generating. An exact match against
/// an existing row is unlikely, but the sampled value remains useful for
/// range predicates.
pub struct UniformFloatGenerator {
    min: f64,
    max: f64,
}

impl UniformFloatGenerator {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl DataGenerator for UniformFloatGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        r.uniform_float(self.min, self.max).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates integers with a normal distribution.
pub struct NormalIntGenerator {
    mean: i64,
    stddev: i64,
}

impl NormalIntGenerator {
    pub fn new(mean: i64, stddev: i64) -> Self {
        Self { mean, stddev }
    }
}

impl DataGenerator for NormalIntGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        r.normal_int(self.mean, self.stddev).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates floats with a normal distribution.
pub struct NormalFloatGenerator {
    mean: f64,
    stddev: f64,
}

impl NormalFloatGenerator {
    pub fn new(mean: f64, stddev: f64) -> Self {
        Self { mean, stddev }
    }
}

impl DataGenerator for NormalFloatGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        r.normal_float(self.mean, self.stddev).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates integers according to a histogram distribution. Useful to skew a
/// foreign key: a `posts` table can have 50% of its rows point at one
/// `user_id` and 25% at another.
///
/// To generate the integers 1 and 2, pass the bin endpoints 0.5, 1.5, 2.5:
/// the sampled float is rounded.
///
/// Sampling from existing draws from the same distribution as generating and
/// keeps no memory of what was actually generated.
pub struct HistogramIntGenerator {
    hist: HistogramDistribution,
}

impl HistogramIntGenerator {
    pub fn new(bins_end_points: Vec<f64>, frequency: &[f64]) -> Self {
        Self {
            hist: HistogramDistribution::new(bins_end_points, frequency),
        }
    }
}

impl DataGenerator for HistogramIntGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        r.hist_int(&self.hist).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates floats according to a histogram distribution.
pub struct HistogramFloatGenerator {
    hist: HistogramDistribution,
}

impl HistogramFloatGenerator {
    pub fn new(bins_end_points: Vec<f64>, frequency: &[f64]) -> Self {
        Self {
            hist: HistogramDistribution::new(bins_end_points, frequency),
        }
    }
}

impl DataGenerator for HistogramFloatGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        r.hist_float(&self.hist).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates a uniformly distributed decimal number, formatted as a string
/// with the given precision and scale.
pub struct UniformDecimalGenerator {
    precision: usize,
    scale: usize,
}

impl UniformDecimalGenerator {
    pub fn new(precision: usize, scale: usize) -> Self {
        Self { precision, scale }
    }
}

impl DataGenerator for UniformDecimalGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        let num = r.f64() * 10f64.powi(self.precision as i32) / 10f64.powi(self.scale as i32);
        format!("{:1$.2$}", num, self.precision, self.scale).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates a fixed number of distinct strings with a uniform distribution:
/// with a cardinality of 10, exactly 10 distinct values are ever produced,
/// each equally likely.
pub struct UniformCardinalityStringGenerator {
    cardinality: i64,
    length: usize,
}

impl UniformCardinalityStringGenerator {
    pub fn new(cardinality: i64, length: usize) -> Self {
        Self {
            cardinality,
            length,
        }
    }
}

impl DataGenerator for UniformCardinalityStringGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        let i = r.uniform_int(0, self.cardinality);
        unique_string_from_int(i, self.length).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Like [`UniformCardinalityStringGenerator`] but the underlying integer is
/// drawn from a histogram distribution, skewing the string frequencies. Use
/// half-integer bin endpoints (0.5, 1.5, 2.5, ...) to hit exact integers.
pub struct HistogramCardinalityStringGenerator {
    hist: HistogramDistribution,
    length: usize,
}

impl HistogramCardinalityStringGenerator {
    pub fn new(bins_end_points: Vec<f64>, frequency: &[f64], length: usize) -> Self {
        Self {
            hist: HistogramDistribution::new(bins_end_points, frequency),
            length,
        }
    }
}

impl DataGenerator for HistogramCardinalityStringGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        let i = r.hist_int(&self.hist);
        unique_string_from_int(i, self.length).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates a random string whose length is uniformly distributed in
/// `[min_length, max_length)`, with each byte drawn from a fixed 62-character
/// alphabet.
///
/// Sampling from existing is the same as generating. The value space is so
/// large that an existing value will essentially never be produced; do not
/// expect good results from it.
pub struct UniformLengthStringGenerator {
    min_length: usize,
    max_length: usize,
}

impl UniformLengthStringGenerator {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
        }
    }
}

impl DataGenerator for UniformLengthStringGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        let length = if self.min_length < self.max_length {
            r.uniform_int(self.min_length as i64, self.max_length as i64) as usize
        } else {
            self.max_length
        };

        random_string(r, length).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates a random string whose length is drawn from a histogram
/// distribution.
pub struct HistogramLengthStringGenerator {
    hist: HistogramDistribution,
}

impl HistogramLengthStringGenerator {
    pub fn new(bins_end_points: Vec<f64>, frequency: &[f64]) -> Self {
        Self {
            hist: HistogramDistribution::new(bins_end_points, frequency),
        }
    }
}

impl DataGenerator for HistogramLengthStringGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        let length = r.hist_int(&self.hist).max(0) as usize;
        random_string(r, length).into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

fn random_string(r: &mut Rand, length: usize) -> String {
    let mut buf = Vec::with_capacity(length);
    for _ in 0..length {
        buf.push(CHARACTERS[r.usize_below(CHARACTERS.len())]);
    }

    // The alphabet is pure ASCII.
    String::from_utf8(buf).unwrap()
}

/// Generates a distinct fixed-length string on every call, derived from an
/// atomically incremented integer. The counter value prefixes the string, so
/// two strings stay distinct even if their hashes collide after truncation.
///
/// Sampling from existing produces a value that some previous (or concurrent)
/// `generate` call produced, though the row holding it may since have been
/// deleted from the database.
pub struct UniqueStringGenerator {
    min: i64,
    current: AtomicI64,
    length: usize,
}

impl UniqueStringGenerator {
    /// `min` and `current` seed the integer range backing the strings: both 0
    /// when loading a fresh table, or the bounds recovered from existing rows
    /// (see [`from_database`](Self::from_database)).
    pub fn new(length: usize, min: i64, current: i64) -> Self {
        Self {
            min,
            current: AtomicI64::new(current),
            length,
        }
    }

    /// Recovers the generator state from an already loaded table by parsing
    /// the integer prefix off the column's existing values.
    pub async fn from_database(
        config: &DatabaseConfig,
        table: &str,
        column: &str,
    ) -> anyhow::Result<Self> {
        let mut conn = config.connection().await?;

        let query = format!(
            "SELECT MIN(CAST(SUBSTRING_INDEX(`{col}`, '!', 1) AS UNSIGNED)), \
             MAX(CAST(SUBSTRING_INDEX(`{col}`, '!', 1) AS UNSIGNED)) FROM `{db}`.`{table}`",
            col = column,
            db = config.database,
            table = table,
        );
        let (min, current) = conn
            .query_first::<(Option<i64>, Option<i64>)>(&query)
            .await?
            .map(|(min, max)| (min.unwrap_or(0), max.unwrap_or(0)))
            .unwrap_or((0, 0));

        let query = format!(
            "SELECT LENGTH(`{}`) FROM `{}`.`{}` LIMIT 1",
            column, config.database, table
        );
        let length: i64 = conn
            .query_first(&query)
            .await?
            .ok_or_else(|| anyhow!("cannot size unique strings from empty table {table}"))?;

        conn.close().await?;
        Ok(Self::new(length as usize, min, current))
    }

    pub fn generate_typed(&self) -> String {
        let i = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        unique_string_from_int(i, self.length)
    }

    pub fn sample_existing_typed(&self, r: &mut Rand) -> String {
        let max = self.current.load(Ordering::Relaxed);
        // Generated values are the post-increment counter values, so the
        // valid range is (min, max], sampled here as [min + 1, max + 1).
        let i = r.uniform_int(self.min + 1, max + 1);
        unique_string_from_int(i, self.length)
    }
}

impl DataGenerator for UniqueStringGenerator {
    fn generate(&self, _: &mut Rand) -> Value {
        self.generate_typed().into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.sample_existing_typed(r).into()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DatetimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Generates datetime values, in two modes:
///
/// 1. `generate_now == true`: `generate` returns the current time.
/// 2. `generate_now == false`: `generate` returns a time drawn uniformly from
///    one of the configured intervals.
///
/// `sample_existing` always draws from the intervals; when `generate_now` is
/// set, an implicit extra interval from the first `generate` call to the
/// present is included so previously inserted timestamps can be sampled.
///
/// Values are formatted as `YYYY-MM-DD hh:mm:ss` UTC strings, which is what
/// SQL expects. The `*_typed` variants return [`DateTime<Utc>`].
pub struct UniformDatetimeGenerator {
    intervals: Vec<DatetimeInterval>,
    generate_now: bool,
    first_generate_time: OnceCell<DateTime<Utc>>,
}

impl UniformDatetimeGenerator {
    pub fn new(intervals: Vec<DatetimeInterval>, generate_now: bool) -> Self {
        Self {
            intervals,
            generate_now,
            first_generate_time: OnceCell::new(),
        }
    }

    /// A generator that always generates the current time.
    pub fn now() -> Self {
        Self::new(Vec::new(), true)
    }

    pub fn generate_typed(&self, r: &mut Rand) -> DateTime<Utc> {
        if self.generate_now {
            self.first_generate_time.get_or_init(Utc::now);
            return Utc::now();
        }

        self.sample_existing_typed(r)
    }

    pub fn sample_existing_typed(&self, r: &mut Rand) -> DateTime<Utc> {
        let mut n = self.intervals.len();
        if self.generate_now {
            n += 1;
        }

        let idx = r.usize_below(n);
        let interval = if idx == self.intervals.len() {
            DatetimeInterval {
                // An empty interval ending now if generate was never called.
                start: self
                    .first_generate_time
                    .get()
                    .copied()
                    .unwrap_or_else(Utc::now),
                end: Utc::now(),
            }
        } else {
            self.intervals[idx]
        };

        let span_seconds = (interval.end - interval.start)
            .num_microseconds()
            .unwrap_or(0)
            .max(0) as f64
            / 1e6;
        let offset = (r.f64() * span_seconds) as i64;

        interval.start + Duration::seconds(offset)
    }
}

impl DataGenerator for UniformDatetimeGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        self.generate_typed(r)
            .format(SQL_DATETIME_FORMAT)
            .to_string()
            .into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.sample_existing_typed(r)
            .format(SQL_DATETIME_FORMAT)
            .to_string()
            .into()
    }
}

/// Generates UUIDs. Version 1 embeds the generation timestamp; version 4 is
/// fully random. Sampling from existing is effectively broken, as a duplicate
/// UUID should essentially never be produced.
pub struct UuidGenerator {
    version: u8,
    node_id: [u8; 6],
}

impl UuidGenerator {
    /// Only version 1 (time-based) and version 4 (random) are supported.
    pub fn new(version: u8) -> anyhow::Result<Self> {
        if version != 1 && version != 4 {
            bail!("only version 1 or 4 UUIDs are supported, not version {version}");
        }

        Ok(Self {
            version,
            node_id: rand::random(),
        })
    }
}

impl DataGenerator for UuidGenerator {
    fn generate(&self, _: &mut Rand) -> Value {
        let u = match self.version {
            1 => uuid::Uuid::now_v1(&self.node_id),
            _ => uuid::Uuid::new_v4(),
        };
        u.to_string().into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Atomically generates an auto-incrementing integer from the client side.
///
/// Sampling from existing draws uniformly between the minimum and the current
/// value; there is no guarantee of landing on an existing row if rows have
/// been deleted.
pub struct AutoIncrementGenerator {
    min: i64,
    current: AtomicI64,
}

impl AutoIncrementGenerator {
    pub fn new(min: i64, current: i64) -> Self {
        Self {
            min,
            current: AtomicI64::new(current),
        }
    }

    /// Recovers the counter bounds from an already loaded table.
    pub async fn from_database(
        config: &DatabaseConfig,
        table: &str,
        column: &str,
    ) -> anyhow::Result<Self> {
        let mut conn = config.connection().await?;

        let query = format!(
            "SELECT MIN(`{col}`), MAX(`{col}`) FROM `{db}`.`{table}`",
            col = column,
            db = config.database,
            table = table,
        );
        let (min, current) = conn
            .query_first::<(Option<i64>, Option<i64>)>(&query)
            .await?
            .map(|(min, max)| (min.unwrap_or(0), max.unwrap_or(0)))
            .unwrap_or((0, 0));

        conn.close().await?;
        Ok(Self::new(min, current))
    }

    pub fn generate_typed(&self) -> i64 {
        self.current.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The current counter value, without generating a new one.
    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn min(&self) -> i64 {
        self.min
    }
}

impl DataGenerator for AutoIncrementGenerator {
    fn generate(&self, _: &mut Rand) -> Value {
        self.generate_typed().into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        r.uniform_int(self.min, self.current() + 1).into()
    }
}

/// Generates values from a discrete set of possible values. Sampling from
/// existing is the same as generating, so it may produce a value from the set
/// that no row currently holds.
pub struct EnumGenerator {
    values: Vec<String>,
}

impl EnumGenerator {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

impl DataGenerator for EnumGenerator {
    fn generate(&self, r: &mut Rand) -> Value {
        self.values[r.usize_below(self.values.len())].clone().into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Generates the same JSON document every time: an object with `obj_length`
/// keys whose values repeat the key `value_length` times.
pub struct JsonGenerator {
    obj_length: usize,
    value_length: usize,
}

impl JsonGenerator {
    pub fn new(obj_length: usize, value_length: usize) -> Self {
        Self {
            obj_length,
            value_length,
        }
    }
}

impl DataGenerator for JsonGenerator {
    fn generate(&self, _: &mut Rand) -> Value {
        let mut m = BTreeMap::new();
        for i in 0..self.obj_length {
            let v = i.to_string();
            m.insert(v.clone(), v.repeat(self.value_length));
        }

        serde_json::to_string(&m).unwrap().into()
    }

    fn sample_existing(&self, r: &mut Rand) -> Value {
        self.generate(r)
    }
}

/// Maps an integer to a fixed-length string: the decimal representation of
/// the integer, a `!` separator, and the hex-encoded MD5 of the decimal
/// representation, repeated with `-` separators until `length` is reached,
/// then truncated.
fn unique_string_from_int(v: i64, length: usize) -> String {
    let digest = md5::compute(v.to_string().as_bytes());
    let hash_str = format!("{v}!{digest:x}");

    if length == hash_str.len() {
        return hash_str;
    }

    if length < hash_str.len() {
        return hash_str[..length].to_string();
    }

    let mut extended = String::with_capacity(length + hash_str.len() + 1);
    extended.push_str(&hash_str);
    while extended.len() < length {
        extended.push('-');
        extended.push_str(&hash_str);
    }
    extended.truncate(length);

    extended
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use chrono::NaiveDateTime;

    use super::*;

    fn as_string(v: Value) -> String {
        match v {
            Value::Bytes(b) => String::from_utf8(b).unwrap(),
            other => panic!("expected a string value, got {other:?}"),
        }
    }

    fn as_int(v: Value) -> i64 {
        match v {
            Value::Int(i) => i,
            other => panic!("expected an int value, got {other:?}"),
        }
    }

    #[test]
    fn null_generates_null() {
        let mut r = Rand::new();
        assert_eq!(NullGenerator.generate(&mut r), Value::NULL);
        assert_eq!(NullGenerator.sample_existing(&mut r), Value::NULL);
    }

    #[test]
    fn histogram_int_rounds_half_integer_bins_to_integers() {
        let gen = HistogramIntGenerator::new(vec![0.5, 1.5, 2.5], &[0.7, 0.3]);
        let mut r = Rand::new();

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for _ in 0..100_000 {
            *counts.entry(as_int(gen.generate(&mut r))).or_default() += 1;
        }

        assert_eq!(counts.len(), 2);
        assert!(counts.contains_key(&1));
        assert!(counts.contains_key(&2));
    }

    #[test]
    fn uniform_cardinality_string_generates_exactly_cardinality_values() {
        const CARDINALITY: i64 = 5;
        const LENGTH: usize = 10;

        let gen = UniformCardinalityStringGenerator::new(CARDINALITY, LENGTH);
        let mut r = Rand::new();

        let mut values = HashSet::new();
        for _ in 0..100_000 {
            let v = as_string(gen.generate(&mut r));
            assert_eq!(v.len(), LENGTH);
            values.insert(v);
        }

        assert_eq!(values.len(), CARDINALITY as usize);
    }

    #[test]
    fn histogram_cardinality_string_generates_two_values() {
        let gen = HistogramCardinalityStringGenerator::new(vec![0.5, 1.5, 2.5], &[0.8, 0.2], 15);
        let mut r = Rand::new();

        let mut values = HashSet::new();
        for _ in 0..100_000 {
            let v = as_string(gen.generate(&mut r));
            assert_eq!(v.len(), 15);
            values.insert(v);
        }

        assert_eq!(values.len(), 2);
    }

    #[test]
    fn uniform_length_string_length_distribution() {
        let gen = UniformLengthStringGenerator::new(3, 5);
        let mut r = Rand::new();

        let mut lengths: HashMap<usize, usize> = HashMap::new();
        for _ in 0..100_000 {
            let v = as_string(gen.generate(&mut r));
            assert!(v.bytes().all(|b| CHARACTERS.contains(&b)));
            *lengths.entry(v.len()).or_default() += 1;
        }

        assert_eq!(lengths.len(), 2);
        assert!(lengths.contains_key(&3));
        assert!(lengths.contains_key(&4));
    }

    #[test]
    fn histogram_length_string_lengths_follow_bins() {
        let gen = HistogramLengthStringGenerator::new(vec![9.5, 10.5, 11.5], &[0.8, 0.2]);
        let mut r = Rand::new();

        let mut lengths: HashMap<usize, usize> = HashMap::new();
        for _ in 0..100_000 {
            *lengths.entry(as_string(gen.generate(&mut r)).len()).or_default() += 1;
        }

        assert_eq!(lengths.len(), 2);
        assert!(lengths.contains_key(&10));
        assert!(lengths.contains_key(&11));
    }

    #[test]
    fn unique_string_generates_distinct_values() {
        const LENGTH: usize = 15;
        let gen = UniqueStringGenerator::new(LENGTH, 0, 0);
        let mut r = Rand::new();

        let mut values = HashSet::new();
        for _ in 0..100_000 {
            let v = as_string(gen.generate(&mut r));
            assert_eq!(v.len(), LENGTH);
            assert!(values.insert(v), "value generated twice");
        }

        assert_eq!(values.len(), 100_000);
    }

    #[test]
    fn unique_string_samples_only_existing_values() {
        const NUM_GENERATE: usize = 10;
        const NUM_SAMPLE: usize = 100_000;

        let gen = UniqueStringGenerator::new(15, 0, 0);
        let mut r = Rand::new();

        let mut values = HashSet::new();
        for _ in 0..NUM_GENERATE {
            values.insert(as_string(gen.generate(&mut r)));
        }

        let mut sampled = HashSet::new();
        for _ in 0..NUM_SAMPLE {
            let v = as_string(gen.sample_existing(&mut r));
            assert!(values.contains(&v), "sampled {v} which was never generated");
            sampled.insert(v);
        }

        // With 100k samples over 10 values, every value shows up.
        assert_eq!(sampled.len(), NUM_GENERATE);
    }

    #[test]
    fn unique_string_from_int_has_no_collisions() {
        let mut output = HashSet::new();
        for i in 0..1_000_000 {
            assert!(
                output.insert(unique_string_from_int(i, 20)),
                "duplicate value for integer {i}"
            );
        }
    }

    #[test]
    fn unique_string_from_int_extends_short_hashes() {
        let v = unique_string_from_int(3, 100);
        assert_eq!(v.len(), 100);
        assert!(v.starts_with("3!"));
        assert!(v.contains('-'));
    }

    #[test]
    fn now_generator_generates_the_present() {
        let gen = UniformDatetimeGenerator::now();
        let mut r = Rand::new();

        let before = Utc::now();
        let v = as_string(gen.generate(&mut r));
        let parsed = NaiveDateTime::parse_from_str(&v, SQL_DATETIME_FORMAT)
            .unwrap()
            .and_utc();

        let diff = (parsed - before).num_seconds().abs();
        assert!(diff <= 2, "generated {v}, which is {diff}s from now");
    }

    #[test]
    fn uniform_datetime_generates_within_intervals() {
        let day = |y, m, d, h, min| {
            chrono::NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap()
                .and_utc()
        };

        let intervals = vec![
            DatetimeInterval {
                start: day(2006, 11, 10, 11, 45),
                end: day(2006, 11, 10, 12, 0),
            },
            DatetimeInterval {
                start: day(2007, 11, 10, 11, 45),
                end: day(2007, 11, 10, 12, 0),
            },
        ];

        let gen = UniformDatetimeGenerator::new(intervals.clone(), false);
        let mut r = Rand::new();

        const N: usize = 100_000;
        let mut buckets = [0usize; 2];
        for _ in 0..N {
            let v = as_string(gen.generate(&mut r));
            let parsed = NaiveDateTime::parse_from_str(&v, SQL_DATETIME_FORMAT)
                .unwrap()
                .and_utc();

            let bucket = intervals
                .iter()
                .position(|i| parsed >= i.start && parsed <= i.end)
                .unwrap_or_else(|| panic!("{parsed} is outside both intervals"));
            buckets[bucket] += 1;
        }

        // Interval choice is a fair coin flip, so each bucket is binomial.
        let p = 0.5;
        let expected = N as f64 * p;
        let sigma = (N as f64 * p * (1.0 - p)).sqrt();
        for count in buckets {
            assert!(
                count > 0 && ((count as f64 - expected).abs() < 4.0 * sigma),
                "bucket count {count} outside 4 sigma of {expected}"
            );
        }
    }

    #[test]
    fn uuid_generator_versions() {
        let mut r = Rand::new();

        let v1 = as_string(UuidGenerator::new(1).unwrap().generate(&mut r));
        assert_eq!(uuid::Uuid::parse_str(&v1).unwrap().get_version_num(), 1);

        let v4 = as_string(UuidGenerator::new(4).unwrap().generate(&mut r));
        assert_eq!(uuid::Uuid::parse_str(&v4).unwrap().get_version_num(), 4);

        assert!(UuidGenerator::new(3).is_err());
    }

    #[test]
    fn auto_increment_is_strictly_increasing_across_threads() {
        let gen = Arc::new(AutoIncrementGenerator::new(0, 0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gen = Arc::clone(&gen);
                std::thread::spawn(move || (0..10_000).map(|_| gen.generate_typed()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let values = handle.join().unwrap();
            // Strictly increasing within each thread's observation order.
            assert!(values.windows(2).all(|w| w[1] > w[0]));
            all.extend(values);
        }

        // Distinct across all threads.
        let distinct: HashSet<_> = all.iter().copied().collect();
        assert_eq!(distinct.len(), all.len());
        assert_eq!(gen.current(), 80_000);
    }

    #[test]
    fn auto_increment_samples_within_range() {
        let gen = AutoIncrementGenerator::new(5, 20);
        let mut r = Rand::new();

        for _ in 0..10_000 {
            let v = as_int(gen.sample_existing(&mut r));
            assert!((5..=20).contains(&v));
        }
    }

    #[test]
    fn enum_generator_picks_from_the_set() {
        let values = vec!["red".to_string(), "green".to_string(), "blue".to_string()];
        let gen = EnumGenerator::new(values.clone());
        let mut r = Rand::new();

        for _ in 0..1000 {
            let v = as_string(gen.generate(&mut r));
            assert!(values.contains(&v));
        }
    }

    #[test]
    fn json_generator_is_deterministic() {
        let gen = JsonGenerator::new(3, 2);
        let mut r = Rand::new();

        let a = as_string(gen.generate(&mut r));
        let b = as_string(gen.generate(&mut r));
        assert_eq!(a, b);
        assert_eq!(a, r#"{"0":"00","1":"11","2":"22"}"#);
    }

    #[test]
    fn decimal_generator_formats_with_scale() {
        let gen = UniformDecimalGenerator::new(8, 2);
        let mut r = Rand::new();

        for _ in 0..1000 {
            let v = as_string(gen.generate(&mut r));
            let (_, frac) = v.split_once('.').expect("decimal should have a fraction");
            assert_eq!(frac.len(), 2);
            v.trim_start()
                .parse::<f64>()
                .expect("decimal should parse as a float");
        }
    }
}
