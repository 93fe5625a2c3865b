use std::collections::BTreeMap;
use std::str::FromStr;
use geo::{BoundingRect, Contains, Geometry, Intersects, Rect, Within};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CoordSystem {
    Flat,
    Spherical,
}

impl CoordSystem {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FLAT" => Ok(CoordSystem::Flat),
            "SPHERICAL" => Ok(CoordSystem::Spherical),
            other => Err(Error::new(ErrorKind::BadSchema, format!("unknown COORD_SYSTEM '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoordSystem::Flat => "FLAT",
            CoordSystem::Spherical => "SPHERICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapePredicate {
    Within,
    Contains,
    Intersects,
    Disjoint,
}

impl ShapePredicate {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WITHIN" => Ok(ShapePredicate::Within),
            "CONTAINS" => Ok(ShapePredicate::Contains),
            "INTERSECTS" => Ok(ShapePredicate::Intersects),
            "DISJOINT" => Ok(ShapePredicate::Disjoint),
            other => Err(Error::syntax(format!("unknown geoshape predicate '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ShapePredicate::Within => "WITHIN",
            ShapePredicate::Contains => "CONTAINS",
            ShapePredicate::Intersects => "INTERSECTS",
            ShapePredicate::Disjoint => "DISJOINT",
        }
    }
}

pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    wkt::Wkt::from_str(text)
        .map_err(|e| Error::new(ErrorKind::BadParameter, format!("invalid WKT: {:?}", e)))
        .and_then(|w| {
            w.try_into()
                .map_err(|e: wkt::conversion::Error| Error::new(ErrorKind::BadParameter, format!("invalid WKT: {:?}", e)))
        })
}

#[derive(Debug, Clone)]
struct ShapeEntry {
    wkt: String,
    geom: Geometry<f64>,
    bbox: Rect<f64>,
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

fn rect_inside(inner: &Rect<f64>, outer: &Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.max().x <= outer.max().x
        && inner.min().y >= outer.min().y
        && inner.max().y <= outer.max().y
}

/// Shapes of one GEOSHAPE field, prefiltered by bounding box and checked
/// with the exact predicate.
#[derive(Debug, Clone)]
pub struct GeoShapeIndex {
    coord_system: CoordSystem,
    shapes: BTreeMap<DocId, ShapeEntry>,
}

impl GeoShapeIndex {
    pub fn new(coord_system: CoordSystem) -> Self {
        GeoShapeIndex { coord_system, shapes: BTreeMap::new() }
    }

    pub fn coord_system(&self) -> CoordSystem {
        self.coord_system
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn add(&mut self, doc_id: DocId, wkt: &str) -> Result<()> {
        let geom = parse_wkt(wkt)?;
        let bbox = geom
            .bounding_rect()
            .ok_or_else(|| Error::new(ErrorKind::BadParameter, "empty geometry"))?;
        if self.coord_system == CoordSystem::Spherical
            && (bbox.min().x < -180.0 || bbox.max().x > 180.0 || bbox.min().y < -90.0 || bbox.max().y > 90.0)
        {
            return Err(Error::new(ErrorKind::BadParameter, "geometry outside lon/lat bounds"));
        }
        self.shapes.insert(doc_id, ShapeEntry { wkt: wkt.to_string(), geom, bbox });
        Ok(())
    }

    pub fn remove(&mut self, doc_id: DocId) -> bool {
        self.shapes.remove(&doc_id).is_some()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(DocId) -> bool) -> usize {
        let before = self.shapes.len();
        self.shapes.retain(|id, _| keep(*id));
        before - self.shapes.len()
    }

    /// Matching doc ids in ascending order.
    pub fn query(&self, predicate: ShapePredicate, wkt: &str) -> Result<Vec<DocId>> {
        let query = parse_wkt(wkt)?;
        let Some(qbox) = query.bounding_rect() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (id, entry) in &self.shapes {
            let hit = match predicate {
                ShapePredicate::Within => rect_inside(&entry.bbox, &qbox) && entry.geom.is_within(&query),
                ShapePredicate::Contains => rect_inside(&qbox, &entry.bbox) && entry.geom.contains(&query),
                ShapePredicate::Intersects => rects_overlap(&entry.bbox, &qbox) && entry.geom.intersects(&query),
                ShapePredicate::Disjoint => !rects_overlap(&entry.bbox, &qbox) || !entry.geom.intersects(&query),
            };
            if hit {
                out.push(*id);
            }
        }
        Ok(out)
    }

    pub fn wkt_of(&self, doc_id: DocId) -> Option<&str> {
        self.shapes.get(&doc_id).map(|e| e.wkt.as_str())
    }

    /// (doc, wkt) pairs for snapshots.
    pub fn dump(&self) -> Vec<(DocId, String)> {
        self.shapes.iter().map(|(id, e)| (*id, e.wkt.clone())).collect()
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    pub fn bytes(&self) -> usize {
        self.shapes.values().map(|e| e.wkt.len() + std::mem::size_of::<ShapeEntry>()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> GeoShapeIndex {
        let mut idx = GeoShapeIndex::new(CoordSystem::Flat);
        idx.add(DocId(1), "POLYGON((1 1, 2 1, 2 2, 1 2, 1 1))").unwrap();
        idx.add(DocId(2), "POINT(5 5)").unwrap();
        idx.add(DocId(3), "POLYGON((0 0, 20 0, 20 20, 0 20, 0 0))").unwrap();
        idx
    }

    #[test]
    fn test_within() {
        let ids = index().query(ShapePredicate::Within, "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))").unwrap();
        assert_eq!(ids, vec![DocId(1), DocId(2)]);
    }

    #[test]
    fn test_contains() {
        let ids = index().query(ShapePredicate::Contains, "POINT(1.5 1.5)").unwrap();
        assert_eq!(ids, vec![DocId(1), DocId(3)]);
    }

    #[test]
    fn test_intersects_and_disjoint_partition() {
        let idx = index();
        let q = "POLYGON((4 4, 6 4, 6 6, 4 6, 4 4))";
        let hit = idx.query(ShapePredicate::Intersects, q).unwrap();
        let miss = idx.query(ShapePredicate::Disjoint, q).unwrap();
        assert_eq!(hit, vec![DocId(2), DocId(3)]);
        assert_eq!(miss, vec![DocId(1)]);
    }

    #[test]
    fn test_bad_wkt_rejected() {
        let mut idx = GeoShapeIndex::new(CoordSystem::Flat);
        assert!(idx.add(DocId(1), "POLYGON((oops").is_err());
    }

    #[test]
    fn test_spherical_bounds() {
        let mut idx = GeoShapeIndex::new(CoordSystem::Spherical);
        assert!(idx.add(DocId(1), "POINT(200 10)").is_err());
        assert!(idx.add(DocId(2), "POINT(20 10)").is_ok());
    }
}
