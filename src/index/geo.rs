//! Point geo fields: coordinates are interleaved into a 52-bit hash and kept
//! in a numeric tree, so a radius query becomes a handful of hash ranges
//! followed by an exact distance check.

use crate::core::error::{Error, ErrorKind, Result};

pub const STEP_MAX: u32 = 26;
pub const LAT_MIN: f64 = -85.05112878;
pub const LAT_MAX: f64 = 85.05112878;
pub const LON_MIN: f64 = -180.0;
pub const LON_MAX: f64 = 180.0;
const EARTH_RADIUS_M: f64 = 6372797.560856;
const MAX_CELLS_PER_AXIS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl DistanceUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "m" => Ok(DistanceUnit::Meters),
            "km" => Ok(DistanceUnit::Kilometers),
            "mi" => Ok(DistanceUnit::Miles),
            "ft" => Ok(DistanceUnit::Feet),
            other => Err(Error::new(ErrorKind::BadParameter, format!("unknown distance unit '{}'", other))),
        }
    }

    pub fn to_meters(&self, v: f64) -> f64 {
        match self {
            DistanceUnit::Meters => v,
            DistanceUnit::Kilometers => v * 1000.0,
            DistanceUnit::Miles => v * 1609.34,
            DistanceUnit::Feet => v * 0.3048,
        }
    }
}

/// Parses "lon,lat" (or "lon lat") and validates the ranges.
pub fn parse_point(s: &str) -> Result<(f64, f64)> {
    let mut parts = s.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty());
    let bad = || Error::new(ErrorKind::BadParameter, format!("invalid geo point '{}'", s));
    let lon: f64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let lat: f64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    if parts.next().is_some() {
        return Err(bad());
    }
    validate(lon, lat)?;
    Ok((lon, lat))
}

pub fn validate(lon: f64, lat: f64) -> Result<()> {
    if !(LON_MIN..=LON_MAX).contains(&lon) || !(LAT_MIN..=LAT_MAX).contains(&lat) {
        return Err(Error::new(
            ErrorKind::BadParameter,
            format!("coordinates out of range: {},{}", lon, lat),
        ));
    }
    Ok(())
}

fn spread(v: u32) -> u64 {
    let mut x = v as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

fn squash(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}

fn cell_index(v: f64, min: f64, max: f64, step: u32) -> u32 {
    let cells = (1u64 << step) as f64;
    let idx = ((v - min) / (max - min) * cells).floor();
    idx.clamp(0.0, cells - 1.0) as u32
}

/// Latitude in the even bits, longitude in the odd bits.
pub fn encode(lon: f64, lat: f64) -> u64 {
    let lat_i = cell_index(lat, LAT_MIN, LAT_MAX, STEP_MAX);
    let lon_i = cell_index(lon, LON_MIN, LON_MAX, STEP_MAX);
    spread(lat_i) | (spread(lon_i) << 1)
}

/// Centre of the cell a hash names.
pub fn decode(hash: u64) -> (f64, f64) {
    let lat_i = squash(hash);
    let lon_i = squash(hash >> 1);
    let cells = (1u64 << STEP_MAX) as f64;
    let lat = LAT_MIN + (lat_i as f64 + 0.5) * (LAT_MAX - LAT_MIN) / cells;
    let lon = LON_MIN + (lon_i as f64 + 0.5) * (LON_MAX - LON_MIN) / cells;
    (lon, lat)
}

pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Half-open hash ranges whose union covers the circle. Each range is one
/// cell at a coarse step; callers post-filter with [`haversine_m`].
pub fn covering_ranges(lon: f64, lat: f64, radius_m: f64) -> Vec<(u64, u64)> {
    let full = vec![(0u64, 1u64 << (2 * STEP_MAX))];
    let lat_delta = (radius_m / EARTH_RADIUS_M).to_degrees();
    let lat_lo = (lat - lat_delta).max(LAT_MIN);
    let lat_hi = (lat + lat_delta).min(LAT_MAX);
    if lat - lat_delta <= -90.0 || lat + lat_delta >= 90.0 {
        return full;
    }
    let cos_lat = lat.to_radians().cos().max(1e-9);
    let lon_delta = lat_delta / cos_lat;
    if lon_delta >= 180.0 {
        return full;
    }

    // Split a box crossing the antimeridian in two
    let mut boxes = Vec::new();
    let (lon_lo, lon_hi) = (lon - lon_delta, lon + lon_delta);
    if lon_lo < LON_MIN {
        boxes.push((lon_lo + 360.0, LON_MAX));
        boxes.push((LON_MIN, lon_hi));
    } else if lon_hi > LON_MAX {
        boxes.push((lon_lo, LON_MAX));
        boxes.push((LON_MIN, lon_hi - 360.0));
    } else {
        boxes.push((lon_lo, lon_hi));
    }

    let mut ranges = Vec::new();
    for (blon_lo, blon_hi) in boxes {
        let step = choose_step(blon_hi - blon_lo, lat_hi - lat_lo);
        let shift = 2 * (STEP_MAX - step);
        let (la0, la1) = (cell_index(lat_lo, LAT_MIN, LAT_MAX, step), cell_index(lat_hi, LAT_MIN, LAT_MAX, step));
        let (lo0, lo1) = (cell_index(blon_lo, LON_MIN, LON_MAX, step), cell_index(blon_hi, LON_MIN, LON_MAX, step));
        for la in la0..=la1 {
            for lo in lo0..=lo1 {
                let cell = spread(la) | (spread(lo) << 1);
                ranges.push((cell << shift, (cell + 1) << shift));
            }
        }
    }
    merge_ranges(ranges)
}

fn choose_step(lon_span: f64, lat_span: f64) -> u32 {
    let mut step = STEP_MAX;
    while step > 0 {
        let cells = (1u64 << step) as f64;
        let lon_cells = lon_span / ((LON_MAX - LON_MIN) / cells);
        let lat_cells = lat_span / ((LAT_MAX - LAT_MIN) / cells);
        if lon_cells + 1.0 <= MAX_CELLS_PER_AXIS && lat_cells + 1.0 <= MAX_CELLS_PER_AXIS {
            break;
        }
        step -= 1;
    }
    step
}

fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort();
    let mut out: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        match out.last_mut() {
            Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
            _ => out.push((lo, hi)),
        }
    }
    out
}
