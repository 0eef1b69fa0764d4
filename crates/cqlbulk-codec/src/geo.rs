//! Geospatial codecs: point, linestring, polygon.
//!
//! Loading accepts well-known text (`POINT (1 2)`) and GeoJSON; unloading
//! always emits well-known text. On the JSON side a GeoJSON object or a WKT
//! string are both accepted, and WKT is emitted as a JSON string.

use cqlbulk_core::{CodecError, CqlType, CqlValue, ExternalType, ExternalValue, LineString, Point, Polygon};
use serde_json::Value as Json;

use crate::registry::Codec;

fn parse_err(input: &str, target: CqlType, reason: impl Into<String>) -> CodecError {
    CodecError::Parse { input: input.to_string(), target, reason: reason.into() }
}

/// `"1.5 2"` → Point. Coordinates are whitespace-separated.
fn parse_coordinate_pair(s: &str, target: &CqlType) -> Result<Point, CodecError> {
    let mut parts = s.split_whitespace();
    let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(parse_err(s, target.clone(), "expected two coordinates"));
    };
    let x: f64 = x.parse().map_err(|_| parse_err(s, target.clone(), "bad x coordinate"))?;
    let y: f64 = y.parse().map_err(|_| parse_err(s, target.clone(), "bad y coordinate"))?;
    Ok(Point { x, y })
}

/// Strip `TAG ( ... )`, returning the inner text. Case-insensitive tag,
/// optional whitespace before the parenthesis.
fn strip_wkt_tag<'a>(input: &'a str, tag: &str, target: &CqlType) -> Result<&'a str, CodecError> {
    let trimmed = input.trim();
    let matches_tag = trimmed
        .get(..tag.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(tag));
    if !matches_tag {
        return Err(parse_err(input, target.clone(), format!("expected '{tag}'")));
    }
    let rest = trimmed[tag.len()..].trim_start();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.trim_end().strip_suffix(')'))
        .ok_or_else(|| parse_err(input, target.clone(), "unbalanced parentheses"))?;
    Ok(inner.trim())
}

/// Split `(a), (b), (c)` at top level into the parenthesized groups.
fn split_rings<'a>(inner: &'a str, input: &str, target: &CqlType) -> Result<Vec<&'a str>, CodecError> {
    let mut rings = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = Some(i + 1);
                }
                depth += 1;
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_err(input, target.clone(), "unbalanced parentheses"))?;
                if depth == 0 {
                    rings.push(&inner[start.unwrap()..i]);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(parse_err(input, target.clone(), "unbalanced parentheses"));
    }
    Ok(rings)
}

fn parse_point_list(inner: &str, target: &CqlType) -> Result<Vec<Point>, CodecError> {
    inner
        .split(',')
        .map(|pair| parse_coordinate_pair(pair.trim(), target))
        .collect()
}

fn fmt_coord(v: f64) -> String {
    // WKT keeps integral coordinates short.
    if v.fract() == 0.0 && v.is_finite() {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn wkt_point(p: &Point) -> String {
    format!("POINT ({} {})", fmt_coord(p.x), fmt_coord(p.y))
}

fn wkt_linestring(ls: &LineString) -> String {
    let coords: Vec<String> =
        ls.0.iter().map(|p| format!("{} {}", fmt_coord(p.x), fmt_coord(p.y))).collect();
    format!("LINESTRING ({})", coords.join(", "))
}

fn wkt_polygon(poly: &Polygon) -> String {
    let rings: Vec<String> = poly
        .rings
        .iter()
        .map(|ring| {
            let coords: Vec<String> =
                ring.iter().map(|p| format!("{} {}", fmt_coord(p.x), fmt_coord(p.y))).collect();
            format!("({})", coords.join(", "))
        })
        .collect();
    format!("POLYGON ({})", rings.join(", "))
}

fn geojson_coord(c: &Json, input: &str, target: &CqlType) -> Result<Point, CodecError> {
    let pair = c
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| parse_err(input, target.clone(), "GeoJSON coordinate is not a pair"))?;
    let x = pair[0].as_f64().ok_or_else(|| parse_err(input, target.clone(), "bad x coordinate"))?;
    let y = pair[1].as_f64().ok_or_else(|| parse_err(input, target.clone(), "bad y coordinate"))?;
    Ok(Point { x, y })
}

fn geojson_object(input: &str, target: &CqlType) -> Result<Option<Json>, CodecError> {
    let trimmed = input.trim();
    if !trimmed.starts_with('{') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| parse_err(input, target.clone(), format!("not valid GeoJSON: {e}")))
}

fn check_geojson_type(obj: &Json, expected: &str, input: &str, target: &CqlType) -> Result<(), CodecError> {
    let found = obj.get("type").and_then(Json::as_str).unwrap_or("");
    if found.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(parse_err(input, target.clone(), format!("GeoJSON type '{found}' is not '{expected}'")))
    }
}

fn coordinates<'a>(obj: &'a Json, input: &str, target: &CqlType) -> Result<&'a Json, CodecError> {
    obj.get("coordinates")
        .ok_or_else(|| parse_err(input, target.clone(), "GeoJSON object has no coordinates"))
}

/// Text content of either external family, for WKT/GeoJSON sniffing.
fn geo_input(value: &ExternalValue, target: &CqlType) -> Result<GeoInput, CodecError> {
    match value {
        ExternalValue::Json(j @ Json::Object(_)) => Ok(GeoInput::Object(j.clone())),
        other => {
            let text = other
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string());
            match geojson_object(&text, target)? {
                Some(obj) => Ok(GeoInput::Object(obj)),
                None => Ok(GeoInput::Wkt(text)),
            }
        }
    }
}

enum GeoInput {
    Wkt(String),
    Object(Json),
}

macro_rules! geo_codec {
    ($name:ident, $cql:expr) => {
        #[derive(Debug)]
        pub struct $name;

        impl $name {
            fn target(&self) -> CqlType {
                $cql
            }
        }
    };
}

geo_codec!(PointCodec, CqlType::Point);
geo_codec!(LineStringCodec, CqlType::LineString);
geo_codec!(PolygonCodec, CqlType::Polygon);

impl Codec for PointCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        self.target()
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let target = self.target();
        match geo_input(value, &target)? {
            GeoInput::Wkt(text) => {
                let inner = strip_wkt_tag(&text, "POINT", &target)?;
                Ok(CqlValue::Point(parse_coordinate_pair(inner, &target)?))
            }
            GeoInput::Object(obj) => {
                let text = obj.to_string();
                check_geojson_type(&obj, "Point", &text, &target)?;
                let coords = coordinates(&obj, &text, &target)?;
                Ok(CqlValue::Point(geojson_coord(coords, &text, &target)?))
            }
        }
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Point(p) = value else {
            return Err(CodecError::Format {
                cql: self.target(),
                external: ExternalType::Text,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        Ok(ExternalValue::Text(wkt_point(p)))
    }
}

impl Codec for LineStringCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        self.target()
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let target = self.target();
        match geo_input(value, &target)? {
            GeoInput::Wkt(text) => {
                let inner = strip_wkt_tag(&text, "LINESTRING", &target)?;
                Ok(CqlValue::LineString(LineString(parse_point_list(inner, &target)?)))
            }
            GeoInput::Object(obj) => {
                let text = obj.to_string();
                check_geojson_type(&obj, "LineString", &text, &target)?;
                let coords = coordinates(&obj, &text, &target)?
                    .as_array()
                    .ok_or_else(|| parse_err(&text, target.clone(), "coordinates is not an array"))?
                    .iter()
                    .map(|c| geojson_coord(c, &text, &target))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CqlValue::LineString(LineString(coords)))
            }
        }
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::LineString(ls) = value else {
            return Err(CodecError::Format {
                cql: self.target(),
                external: ExternalType::Text,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        Ok(ExternalValue::Text(wkt_linestring(ls)))
    }
}

impl Codec for PolygonCodec {
    fn external_type(&self) -> ExternalType {
        ExternalType::Text
    }

    fn cql_type(&self) -> CqlType {
        self.target()
    }

    fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        let target = self.target();
        match geo_input(value, &target)? {
            GeoInput::Wkt(text) => {
                let inner = strip_wkt_tag(&text, "POLYGON", &target)?;
                let rings = split_rings(inner, &text, &target)?
                    .into_iter()
                    .map(|ring| parse_point_list(ring, &target))
                    .collect::<Result<Vec<_>, _>>()?;
                if rings.is_empty() {
                    return Err(parse_err(&text, target, "polygon has no rings"));
                }
                Ok(CqlValue::Polygon(Polygon { rings }))
            }
            GeoInput::Object(obj) => {
                let text = obj.to_string();
                check_geojson_type(&obj, "Polygon", &text, &target)?;
                let rings = coordinates(&obj, &text, &target)?
                    .as_array()
                    .ok_or_else(|| parse_err(&text, target.clone(), "coordinates is not an array"))?
                    .iter()
                    .map(|ring| {
                        ring.as_array()
                            .ok_or_else(|| {
                                parse_err(&text, target.clone(), "ring is not an array")
                            })?
                            .iter()
                            .map(|c| geojson_coord(c, &text, &target))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CqlValue::Polygon(Polygon { rings }))
            }
        }
    }

    fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        let CqlValue::Polygon(p) = value else {
            return Err(CodecError::Format {
                cql: self.target(),
                external: ExternalType::Text,
                reason: format!("unexpected internal value {value:?}"),
            });
        };
        Ok(ExternalValue::Text(wkt_polygon(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_wkt_round_trip() {
        let codec = PointCodec;
        let v = codec
            .external_to_internal(&ExternalValue::Text("point (1.5 -2)".into()))
            .unwrap();
        assert_eq!(v, CqlValue::Point(Point { x: 1.5, y: -2.0 }));
        assert_eq!(
            codec.internal_to_external(&v).unwrap(),
            ExternalValue::Text("POINT (1.5 -2)".into())
        );
    }

    #[test]
    fn point_accepts_geojson() {
        let codec = PointCodec;
        let v = codec
            .external_to_internal(&ExternalValue::Text(
                r#"{"type": "Point", "coordinates": [3.0, 4.0]}"#.into(),
            ))
            .unwrap();
        assert_eq!(v, CqlValue::Point(Point { x: 3.0, y: 4.0 }));
    }

    #[test]
    fn linestring_wkt() {
        let codec = LineStringCodec;
        let v = codec
            .external_to_internal(&ExternalValue::Text("LINESTRING (0 0, 1 1, 2 0)".into()))
            .unwrap();
        let CqlValue::LineString(ls) = &v else { panic!() };
        assert_eq!(ls.0.len(), 3);
        assert_eq!(
            codec.internal_to_external(&v).unwrap(),
            ExternalValue::Text("LINESTRING (0 0, 1 1, 2 0)".into())
        );
    }

    #[test]
    fn polygon_with_hole() {
        let codec = PolygonCodec;
        let wkt = "POLYGON ((0 0, 4 0, 4 4, 0 4, 0 0), (1 1, 2 1, 2 2, 1 2, 1 1))";
        let v = codec.external_to_internal(&ExternalValue::Text(wkt.into())).unwrap();
        let CqlValue::Polygon(p) = &v else { panic!() };
        assert_eq!(p.rings.len(), 2);
        assert_eq!(codec.internal_to_external(&v).unwrap(), ExternalValue::Text(wkt.into()));
    }

    #[test]
    fn polygon_geojson_from_json_side() {
        let codec = PolygonCodec;
        let geojson = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        });
        let v = codec.external_to_internal(&ExternalValue::Json(geojson)).unwrap();
        let CqlValue::Polygon(p) = v else { panic!() };
        assert_eq!(p.rings[0].len(), 4);
    }

    #[test]
    fn malformed_wkt_is_rejected() {
        let codec = PointCodec;
        for bad in ["POINT 1 2", "POINT (1)", "POINT (1 2", "CIRCLE (1 2)"] {
            assert!(
                codec.external_to_internal(&ExternalValue::Text(bad.into())).is_err(),
                "{bad}"
            );
        }
    }
}
