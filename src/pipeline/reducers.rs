//! GROUPBY reducers. Each is an accumulating state object fed one row at a
//! time and finished once per group.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use rand::Rng;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{parse_number, Value};
use crate::pipeline::Row;

pub trait Reducer: Send {
    fn add(&mut self, row: &Row);

    fn finish(&mut self) -> Value;
}

fn number_of(row: &Row, field: &str) -> Option<f64> {
    match row.get(field)? {
        Value::Number(n) => Some(*n),
        Value::Str(s) => parse_number(s),
        _ => None,
    }
}

/// Hashable identity of a value, for distinct counting.
fn value_key(v: &Value) -> String {
    match v {
        Value::Number(n) => format!("n{}", n),
        other => format!("s{}", other),
    }
}

struct Count(u64);

impl Reducer for Count {
    fn add(&mut self, _row: &Row) {
        self.0 += 1;
    }

    fn finish(&mut self) -> Value {
        Value::Number(self.0 as f64)
    }
}

struct Sum {
    field: String,
    sum: f64,
}

impl Reducer for Sum {
    fn add(&mut self, row: &Row) {
        self.sum += number_of(row, &self.field).unwrap_or(0.0);
    }

    fn finish(&mut self) -> Value {
        Value::Number(self.sum)
    }
}

struct Avg {
    field: String,
    sum: f64,
    n: u64,
}

impl Reducer for Avg {
    fn add(&mut self, row: &Row) {
        if let Some(v) = number_of(row, &self.field) {
            self.sum += v;
            self.n += 1;
        }
    }

    fn finish(&mut self) -> Value {
        if self.n == 0 { Value::Number(f64::NAN) } else { Value::Number(self.sum / self.n as f64) }
    }
}

struct MinMax {
    field: String,
    best: Option<f64>,
    max: bool,
}

impl Reducer for MinMax {
    fn add(&mut self, row: &Row) {
        if let Some(v) = number_of(row, &self.field) {
            self.best = Some(match self.best {
                Some(b) if self.max => b.max(v),
                Some(b) => b.min(v),
                None => v,
            });
        }
    }

    fn finish(&mut self) -> Value {
        self.best.map(Value::Number).unwrap_or(Value::Null)
    }
}

struct Quantile {
    field: String,
    q: f64,
    values: Vec<f64>,
}

impl Reducer for Quantile {
    fn add(&mut self, row: &Row) {
        if let Some(v) = number_of(row, &self.field) {
            self.values.push(v);
        }
    }

    fn finish(&mut self) -> Value {
        if self.values.is_empty() {
            return Value::Null;
        }
        self.values.sort_by(|a, b| a.total_cmp(b));
        let pos = self.q * (self.values.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let frac = pos - lo as f64;
        Value::Number(self.values[lo] + (self.values[hi] - self.values[lo]) * frac)
    }
}

/// Sample standard deviation (Welford).
struct StdDev {
    field: String,
    n: u64,
    mean: f64,
    m2: f64,
}

impl Reducer for StdDev {
    fn add(&mut self, row: &Row) {
        if let Some(v) = number_of(row, &self.field) {
            self.n += 1;
            let delta = v - self.mean;
            self.mean += delta / self.n as f64;
            self.m2 += delta * (v - self.mean);
        }
    }

    fn finish(&mut self) -> Value {
        if self.n < 2 { Value::Number(0.0) } else { Value::Number((self.m2 / (self.n - 1) as f64).sqrt()) }
    }
}

struct ToList {
    field: String,
    seen: HashSet<String>,
    values: Vec<Value>,
}

impl Reducer for ToList {
    fn add(&mut self, row: &Row) {
        if let Some(v) = row.get(&self.field) {
            if !v.is_null() && self.seen.insert(value_key(v)) {
                self.values.push(v.clone());
            }
        }
    }

    fn finish(&mut self) -> Value {
        Value::Array(std::mem::take(&mut self.values))
    }
}

/// First value of `field`, or the value on the row that sorts first by
/// `by`.
struct FirstValue {
    field: String,
    by: Option<(String, bool)>,
    best: Option<(Value, Value)>,
}

impl Reducer for FirstValue {
    fn add(&mut self, row: &Row) {
        let value = row.get(&self.field).cloned().unwrap_or(Value::Null);
        let Some((by, asc)) = &self.by else {
            if self.best.is_none() {
                self.best = Some((value, Value::Null));
            }
            return;
        };
        let key = row.get(by).cloned().unwrap_or(Value::Null);
        let better = match &self.best {
            None => true,
            Some(_) if key.is_null() => false,
            Some((_, cur)) if cur.is_null() => true,
            Some((_, cur)) if *asc => key.sort_cmp(cur).is_lt(),
            Some((_, cur)) => key.sort_cmp(cur).is_gt(),
        };
        if better {
            self.best = Some((value, key));
        }
    }

    fn finish(&mut self) -> Value {
        self.best.take().map(|(v, _)| v).unwrap_or(Value::Null)
    }
}

struct CountDistinct {
    field: String,
    seen: HashSet<String>,
}

impl Reducer for CountDistinct {
    fn add(&mut self, row: &Row) {
        if let Some(v) = row.get(&self.field) {
            self.seen.insert(value_key(v));
        }
    }

    fn finish(&mut self) -> Value {
        Value::Number(self.seen.len() as f64)
    }
}

const HLL_BITS: u32 = 10;

/// HyperLogLog with 2^10 registers, about 3% standard error.
struct CountDistinctish {
    field: String,
    registers: Vec<u8>,
}

impl CountDistinctish {
    fn new(field: String) -> Self {
        CountDistinctish { field, registers: vec![0; 1 << HLL_BITS] }
    }

    fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let sum: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let raw = alpha * m * m / sum;
        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            // Linear counting for small cardinalities
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }
}

impl Reducer for CountDistinctish {
    fn add(&mut self, row: &Row) {
        let Some(v) = row.get(&self.field) else { return };
        let mut h = DefaultHasher::new();
        value_key(v).hash(&mut h);
        let hash = h.finish();
        let idx = (hash >> (64 - HLL_BITS)) as usize;
        let rank = ((hash << HLL_BITS) | (1 << (HLL_BITS - 1))).leading_zeros() as u8 + 1;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    fn finish(&mut self) -> Value {
        Value::Number(self.estimate().round())
    }
}

/// Reservoir sample of up to `size` values.
struct RandomSample {
    field: String,
    size: usize,
    seen: u64,
    sample: Vec<Value>,
}

impl Reducer for RandomSample {
    fn add(&mut self, row: &Row) {
        let Some(v) = row.get(&self.field) else { return };
        self.seen += 1;
        if self.sample.len() < self.size {
            self.sample.push(v.clone());
        } else {
            let j = rand::thread_rng().gen_range(0..self.seen) as usize;
            if j < self.size {
                self.sample[j] = v.clone();
            }
        }
    }

    fn finish(&mut self) -> Value {
        Value::Array(std::mem::take(&mut self.sample))
    }
}

/// A parsed `REDUCE name nargs args… [AS alias]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerSpec {
    pub name: String,
    pub args: Vec<String>,
    pub alias: String,
}

impl ReducerSpec {
    /// Validates arguments; the alias defaults to `name(args)`.
    pub fn new(name: &str, args: Vec<String>, alias: Option<String>) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let alias = alias.unwrap_or_else(|| {
            let a: Vec<String> = args.iter().map(|s| s.trim_start_matches('@').to_string()).collect();
            format!("__generated_alias{}{}", upper.to_lowercase(), a.join(","))
        });
        let spec = ReducerSpec { name: upper, args, alias };
        spec.build()?;
        Ok(spec)
    }

    fn field(&self, i: usize) -> Result<String> {
        self.args
            .get(i)
            .map(|s| s.trim_start_matches('@').to_string())
            .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("{} needs an argument", self.name)))
    }

    fn number(&self, i: usize) -> Result<f64> {
        self.args
            .get(i)
            .and_then(|s| parse_number(s))
            .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("{} needs a numeric argument", self.name)))
    }

    pub fn build(&self) -> Result<Box<dyn Reducer>> {
        let r: Box<dyn Reducer> = match self.name.as_str() {
            "COUNT" => Box::new(Count(0)),
            "SUM" => Box::new(Sum { field: self.field(0)?, sum: 0.0 }),
            "AVG" => Box::new(Avg { field: self.field(0)?, sum: 0.0, n: 0 }),
            "MIN" => Box::new(MinMax { field: self.field(0)?, best: None, max: false }),
            "MAX" => Box::new(MinMax { field: self.field(0)?, best: None, max: true }),
            "QUANTILE" => {
                let q = self.number(1)?;
                if !(0.0..=1.0).contains(&q) {
                    return Err(Error::new(ErrorKind::BadParameter, "QUANTILE must be between 0 and 1"));
                }
                Box::new(Quantile { field: self.field(0)?, q, values: Vec::new() })
            }
            "STDDEV" => Box::new(StdDev { field: self.field(0)?, n: 0, mean: 0.0, m2: 0.0 }),
            "TOLIST" => Box::new(ToList { field: self.field(0)?, seen: HashSet::new(), values: Vec::new() }),
            "FIRST_VALUE" => {
                let by = match self.args.get(1).map(|s| s.to_ascii_uppercase()) {
                    Some(kw) if kw == "BY" => {
                        let asc = !matches!(self.args.get(3).map(|s| s.to_ascii_uppercase()).as_deref(), Some("DESC"));
                        Some((self.field(2)?, asc))
                    }
                    Some(_) => return Err(Error::new(ErrorKind::BadParameter, "FIRST_VALUE expects BY")),
                    None => None,
                };
                Box::new(FirstValue { field: self.field(0)?, by, best: None })
            }
            "COUNT_DISTINCT" => Box::new(CountDistinct { field: self.field(0)?, seen: HashSet::new() }),
            "COUNT_DISTINCTISH" => Box::new(CountDistinctish::new(self.field(0)?)),
            "RANDOM_SAMPLE" => {
                let size = self.number(1)?;
                if size < 1.0 {
                    return Err(Error::new(ErrorKind::BadParameter, "RANDOM_SAMPLE size must be positive"));
                }
                Box::new(RandomSample { field: self.field(0)?, size: size as usize, seen: 0, sample: Vec::new() })
            }
            other => return Err(Error::new(ErrorKind::BadParameter, format!("unknown reducer '{}'", other))),
        };
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::row;

    fn run(name: &str, args: &[&str], values: &[f64]) -> Value {
        let spec = ReducerSpec::new(name, args.iter().map(|s| s.to_string()).collect(), None).unwrap();
        let mut r = spec.build().unwrap();
        for (i, v) in values.iter().enumerate() {
            r.add(&row(i as u64, "k", 0.0, &[("x", Value::Number(*v)), ("y", Value::Number(-*v))]));
        }
        r.finish()
    }

    #[test]
    fn test_numeric_reducers() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(run("count", &[], &data), Value::Number(4.0));
        assert_eq!(run("sum", &["@x"], &data), Value::Number(10.0));
        assert_eq!(run("avg", &["@x"], &data), Value::Number(2.5));
        assert_eq!(run("min", &["@x"], &data), Value::Number(1.0));
        assert_eq!(run("max", &["@x"], &data), Value::Number(4.0));
        assert_eq!(run("quantile", &["@x", "0.5"], &data), Value::Number(2.5));
    }

    #[test]
    fn test_stddev() {
        let Value::Number(s) = run("stddev", &["@x"], &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) else { panic!() };
        assert!((s - 2.138).abs() < 0.01);
    }

    #[test]
    fn test_distinct_and_lists() {
        let data = [1.0, 1.0, 2.0];
        assert_eq!(run("count_distinct", &["@x"], &data), Value::Number(2.0));
        assert_eq!(run("count_distinctish", &["@x"], &data), Value::Number(2.0));
        assert_eq!(run("tolist", &["@x"], &data), Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]));
        let Value::Array(sample) = run("random_sample", &["@x", "2"], &[1.0, 2.0, 3.0, 4.0]) else { panic!() };
        assert_eq!(sample.len(), 2);
    }

    #[test]
    fn test_first_value_by() {
        let data = [3.0, 1.0, 2.0];
        assert_eq!(run("first_value", &["@x"], &data), Value::Number(3.0));
        assert_eq!(run("first_value", &["@x", "BY", "@y", "ASC"], &data), Value::Number(3.0));
        assert_eq!(run("first_value", &["@x", "BY", "@y", "DESC"], &data), Value::Number(1.0));
    }

    #[test]
    fn test_bad_reducers() {
        assert!(ReducerSpec::new("nope", vec![], None).is_err());
        assert!(ReducerSpec::new("quantile", vec!["@x".into(), "2".into()], None).is_err());
        assert!(ReducerSpec::new("sum", vec![], None).is_err());
    }
}
