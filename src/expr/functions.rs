use chrono::{DateTime, Datelike, Timelike, Utc};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Value, format_number};
use crate::expr::bool_value;
use crate::index::geo;

/// (name, min args, max args)
const FUNCTIONS: &[(&str, usize, usize)] = &[
    ("lower", 1, 1),
    ("upper", 1, 1),
    ("substr", 3, 3),
    ("strlen", 1, 1),
    ("format", 1, usize::MAX),
    ("split", 1, 3),
    ("contains", 2, 2),
    ("startswith", 2, 2),
    ("hasprefix", 2, 2),
    ("exists", 1, 1),
    ("abs", 1, 1),
    ("ceil", 1, 1),
    ("floor", 1, 1),
    ("log", 1, 1),
    ("log2", 1, 1),
    ("log10", 1, 1),
    ("exp", 1, 1),
    ("sqrt", 1, 1),
    ("to_number", 1, 1),
    ("to_str", 1, 1),
    ("geodistance", 2, 4),
    ("timefmt", 1, 2),
    ("year", 1, 1),
    ("monthofyear", 1, 1),
    ("dayofmonth", 1, 1),
    ("dayofweek", 1, 1),
    ("hour", 1, 1),
    ("minute", 1, 1),
];

pub(crate) fn check_arity(name: &str, n: usize) -> Result<()> {
    let Some((_, min, max)) = FUNCTIONS.iter().find(|(f, _, _)| *f == name) else {
        return Err(Error::new(ErrorKind::BadParameter, format!("unknown function '{}'", name)));
    };
    if n < *min || n > *max {
        return Err(Error::new(
            ErrorKind::BadParameter,
            format!("wrong number of arguments for function '{}'", name),
        ));
    }
    Ok(())
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn number_fn(v: &Value, f: impl Fn(f64) -> f64) -> Value {
    match v.as_number().map(f) {
        Some(n) if !n.is_nan() => Value::Number(n),
        _ => Value::Null,
    }
}

fn timestamp(v: &Value) -> Option<DateTime<Utc>> {
    let secs = v.as_number()?;
    DateTime::from_timestamp(secs as i64, 0)
}

/// Evaluates a library function over already-evaluated arguments.
/// Null inputs mostly yield null rather than an error.
pub fn call(name: &str, args: &[Value]) -> Result<Value> {
    check_arity(name, args.len())?;
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);

    let v = match name {
        "lower" => text(&arg(0)).map(|s| Value::Str(s.to_lowercase())).unwrap_or(Value::Null),
        "upper" => text(&arg(0)).map(|s| Value::Str(s.to_uppercase())).unwrap_or(Value::Null),
        "strlen" => text(&arg(0)).map(|s| Value::Number(s.chars().count() as f64)).unwrap_or(Value::Null),
        "substr" => {
            let Some(s) = text(&arg(0)) else { return Ok(Value::Null) };
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let mut offset = arg(1).as_number().unwrap_or(0.0) as i64;
            if offset < 0 {
                offset = (len + offset).max(0);
            }
            let offset = offset.min(len);
            let mut count = arg(2).as_number().unwrap_or(-1.0) as i64;
            if count < 0 {
                count = (len - offset + count + 1).max(0);
            }
            let end = (offset + count).min(len);
            Value::Str(chars[offset as usize..end as usize].iter().collect())
        }
        "format" => {
            let Some(fmt) = text(&arg(0)) else { return Ok(Value::Null) };
            let mut out = String::new();
            let mut next = 1;
            let mut chars = fmt.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '%' {
                    match chars.next() {
                        Some('s') => {
                            out.push_str(&arg(next).to_string());
                            next += 1;
                        }
                        Some('%') => out.push('%'),
                        Some(other) => {
                            return Err(Error::new(
                                ErrorKind::BadParameter,
                                format!("unsupported format specifier '%{}'", other),
                            ));
                        }
                        None => out.push('%'),
                    }
                } else {
                    out.push(c);
                }
            }
            Value::Str(out)
        }
        "split" => {
            let Some(s) = text(&arg(0)) else { return Ok(Value::Null) };
            let seps = text(&arg(1)).unwrap_or_else(|| ",".to_string());
            let strip = text(&arg(2)).unwrap_or_else(|| " ".to_string());
            let parts = s
                .split(|c| seps.contains(c))
                .map(|p| p.trim_matches(|c| strip.contains(c)))
                .filter(|p| !p.is_empty())
                .map(|p| Value::Str(p.to_string()))
                .collect();
            Value::Array(parts)
        }
        "contains" => match (text(&arg(0)), text(&arg(1))) {
            (Some(h), Some(n)) => {
                if n.is_empty() {
                    Value::Number((h.chars().count() + 1) as f64)
                } else {
                    Value::Number(h.matches(n.as_str()).count() as f64)
                }
            }
            _ => Value::Null,
        },
        "startswith" | "hasprefix" => match (text(&arg(0)), text(&arg(1))) {
            (Some(s), Some(p)) => bool_value(s.starts_with(&p)),
            _ => bool_value(false),
        },
        "exists" => bool_value(!arg(0).is_null()),
        "abs" => number_fn(&arg(0), f64::abs),
        "ceil" => number_fn(&arg(0), f64::ceil),
        "floor" => number_fn(&arg(0), f64::floor),
        "log" => number_fn(&arg(0), f64::ln),
        "log2" => number_fn(&arg(0), f64::log2),
        "log10" => number_fn(&arg(0), f64::log10),
        "exp" => number_fn(&arg(0), f64::exp),
        "sqrt" => number_fn(&arg(0), f64::sqrt),
        "to_number" => arg(0).as_number().map(Value::Number).unwrap_or(Value::Null),
        "to_str" => match arg(0) {
            Value::Null => Value::Null,
            Value::Number(n) => Value::Str(format_number(n)),
            other => Value::Str(other.to_string()),
        },
        "geodistance" => {
            let coords = match args.len() {
                2 => {
                    let a = text(&arg(0)).and_then(|s| geo::parse_point(&s).ok());
                    let b = text(&arg(1)).and_then(|s| geo::parse_point(&s).ok());
                    a.zip(b).map(|((lon1, lat1), (lon2, lat2))| (lon1, lat1, lon2, lat2))
                }
                3 => {
                    let a = text(&arg(0)).and_then(|s| geo::parse_point(&s).ok());
                    let lon = arg(1).as_number();
                    let lat = arg(2).as_number();
                    match (a, lon, lat) {
                        (Some((lon1, lat1)), Some(lon2), Some(lat2)) => Some((lon1, lat1, lon2, lat2)),
                        _ => None,
                    }
                }
                _ => {
                    let n: Vec<Option<f64>> = args.iter().map(|a| a.as_number()).collect();
                    match n.as_slice() {
                        [Some(a), Some(b), Some(c), Some(d)] => Some((*a, *b, *c, *d)),
                        _ => None,
                    }
                }
            };
            match coords {
                Some((lon1, lat1, lon2, lat2)) => Value::Number(geo::haversine_m(lon1, lat1, lon2, lat2)),
                None => Value::Null,
            }
        }
        "timefmt" => {
            let Some(ts) = timestamp(&arg(0)) else { return Ok(Value::Null) };
            let fmt = text(&arg(1)).unwrap_or_else(|| "%FT%TZ".to_string());
            Value::Str(ts.format(&fmt).to_string())
        }
        "year" => timestamp(&arg(0)).map(|t| Value::Number(t.year() as f64)).unwrap_or(Value::Null),
        "monthofyear" => timestamp(&arg(0)).map(|t| Value::Number(t.month0() as f64)).unwrap_or(Value::Null),
        "dayofmonth" => timestamp(&arg(0)).map(|t| Value::Number(t.day() as f64)).unwrap_or(Value::Null),
        "dayofweek" => timestamp(&arg(0))
            .map(|t| Value::Number(t.weekday().num_days_from_sunday() as f64))
            .unwrap_or(Value::Null),
        "hour" => timestamp(&arg(0))
            .map(|t| Value::Number((t.timestamp() - t.minute() as i64 * 60 - t.second() as i64) as f64))
            .unwrap_or(Value::Null),
        "minute" => timestamp(&arg(0))
            .map(|t| Value::Number((t.timestamp() - t.second() as i64) as f64))
            .unwrap_or(Value::Null),
        _ => return Err(Error::new(ErrorKind::BadParameter, format!("unknown function '{}'", name))),
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("upper", &[s("abc")]).unwrap(), s("ABC"));
        assert_eq!(call("substr", &[s("hello"), Value::Number(1.0), Value::Number(3.0)]).unwrap(), s("ell"));
        assert_eq!(call("substr", &[s("hello"), Value::Number(-3.0), Value::Number(-1.0)]).unwrap(), s("llo"));
        assert_eq!(call("strlen", &[s("héllo")]).unwrap(), Value::Number(5.0));
        assert_eq!(call("format", &[s("%s-%s"), s("a"), Value::Number(2.0)]).unwrap(), s("a-2"));
        assert_eq!(
            call("split", &[s("a, b,,c")]).unwrap(),
            Value::Array(vec![s("a"), s("b"), s("c")])
        );
        assert_eq!(call("contains", &[s("banana"), s("an")]).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_math_null_propagation() {
        assert_eq!(call("sqrt", &[Value::Number(16.0)]).unwrap(), Value::Number(4.0));
        assert_eq!(call("sqrt", &[Value::Number(-1.0)]).unwrap(), Value::Null);
        assert_eq!(call("floor", &[s("x")]).unwrap(), Value::Null);
    }

    #[test]
    fn test_time_functions() {
        // 2021-03-04T05:06:07Z
        let ts = Value::Number(1614834367.0);
        assert_eq!(call("year", &[ts.clone()]).unwrap(), Value::Number(2021.0));
        assert_eq!(call("dayofmonth", &[ts.clone()]).unwrap(), Value::Number(4.0));
        assert_eq!(call("timefmt", &[ts, s("%Y-%m-%d")]).unwrap(), s("2021-03-04"));
    }

    #[test]
    fn test_geodistance_zero() {
        let d = call("geodistance", &[s("2.35,48.85"), s("2.35,48.85")]).unwrap();
        assert_eq!(d, Value::Number(0.0));
    }

    #[test]
    fn test_arity_checked() {
        assert_eq!(call("abs", &[]).unwrap_err().kind, ErrorKind::BadParameter);
        assert!(check_arity("nope", 0).is_err());
    }
}
