//! Element model: drawable units, their identity, and the wire normalizer.
//!
//! DESIGN
//! ======
//! An `Element` is the unit of synchronization. Its `id` is generated by the
//! client that first draws it and never changes; every peer treats two
//! records with the same id as versions of one logical element.
//!
//! Raw JSON from the network is never deserialized straight into `Element`.
//! It goes through `normalize`, which fills defaults, accepts the timestamp
//! spellings older clients send (epoch numbers, numeric strings, RFC 3339
//! dates), and rejects records without an id or a known type. Rejected
//! records are dropped by callers and never propagated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

/// Client-generated element identifier.
pub type ElementId = String;

const DEFAULT_STROKE: &str = "#000000";
const TRANSPARENT: &str = "transparent";
const DEFAULT_SHAPE_SIZE: f64 = 1.0;
const DEFAULT_BRUSH_SIZE: f64 = 2.0;
const DEFAULT_TEXT_SIZE: f64 = 20.0;

// =============================================================================
// TYPES
// =============================================================================

/// The closed set of drawable element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Line,
    Rectangle,
    Circle,
    Arrow,
    /// Freehand path made of sampled points.
    Brush,
    Text,
}

impl ElementKind {
    /// Parse a wire type name. Case-insensitive; `freehand` is accepted for brush.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "line" => Some(Self::Line),
            "rectangle" => Some(Self::Rectangle),
            "circle" => Some(Self::Circle),
            "arrow" => Some(Self::Arrow),
            "brush" | "freehand" | "freehand-path" => Some(Self::Brush),
            "text" => Some(Self::Text),
            _ => None,
        }
    }

    /// Two-endpoint shapes drawn from `(x1, y1)` to `(x2, y2)`.
    #[must_use]
    pub fn is_shape(self) -> bool {
        matches!(self, Self::Line | Self::Rectangle | Self::Circle | Self::Arrow)
    }

    #[must_use]
    pub fn default_size(self) -> f64 {
        match self {
            Self::Brush => DEFAULT_BRUSH_SIZE,
            Self::Text => DEFAULT_TEXT_SIZE,
            _ => DEFAULT_SHAPE_SIZE,
        }
    }
}

/// A sampled point of a freehand path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Style inputs chosen by the user when starting a gesture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Style {
    pub stroke: Option<String>,
    pub fill: Option<String>,
    pub size: Option<f64>,
}

/// A drawable element as stored and sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub stroke: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    pub size: f64,
    /// Logical creation time, epoch milliseconds.
    pub created_at: i64,
    /// Logical last-mutation time, epoch milliseconds.
    pub updated_at: i64,
    /// Tombstone flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidElement {
    #[error("element is not a JSON object")]
    NotAnObject,
    #[error("element id missing")]
    MissingId,
    #[error("element type missing")]
    MissingType,
    #[error("unknown element type: {0}")]
    UnknownType(String),
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Element {
    /// A two-endpoint shape (line, rectangle, circle, arrow).
    #[must_use]
    pub fn shape(id: impl Into<ElementId>, kind: ElementKind, from: Point, to: Point, style: &Style, at: i64) -> Self {
        let mut el = Self::bare(id.into(), kind, style, at);
        el.x1 = Some(from.x);
        el.y1 = Some(from.y);
        el.x2 = Some(to.x);
        el.y2 = Some(to.y);
        el
    }

    /// A freehand path starting at `start`.
    #[must_use]
    pub fn brush(id: impl Into<ElementId>, start: Point, style: &Style, at: i64) -> Self {
        let mut el = Self::bare(id.into(), ElementKind::Brush, style, at);
        el.points = Some(vec![start]);
        el
    }

    /// A text element anchored at `anchor` with empty content.
    #[must_use]
    pub fn text(id: impl Into<ElementId>, anchor: Point, style: &Style, at: i64) -> Self {
        let mut el = Self::bare(id.into(), ElementKind::Text, style, at);
        el.x1 = Some(anchor.x);
        el.y1 = Some(anchor.y);
        el.text = Some(String::new());
        el
    }

    fn bare(id: ElementId, kind: ElementKind, style: &Style, at: i64) -> Self {
        Self {
            id,
            kind,
            x1: None,
            y1: None,
            x2: None,
            y2: None,
            points: None,
            text: None,
            stroke: style.stroke.clone().unwrap_or_else(|| DEFAULT_STROKE.into()),
            fill: default_fill(kind, style.fill.clone()),
            size: style.size.unwrap_or_else(|| kind.default_size()),
            created_at: at,
            updated_at: at,
            is_deleted: false,
        }
    }
}

fn default_fill(kind: ElementKind, fill: Option<String>) -> Option<String> {
    match (kind, fill) {
        (_, Some(fill)) => Some(fill),
        (ElementKind::Brush, None) => None,
        (_, None) => Some(TRANSPARENT.into()),
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Normalize a raw wire element into a well-formed `Element`.
///
/// `now` is used as `createdAt` when the record carries none.
///
/// # Errors
///
/// Returns `InvalidElement` when the record has no id, no type, or a type
/// outside the closed set.
pub fn normalize(raw: &Value, now: i64) -> Result<Element, InvalidElement> {
    let obj = raw.as_object().ok_or(InvalidElement::NotAnObject)?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(InvalidElement::MissingId),
    };
    let kind = match obj.get("type").and_then(Value::as_str) {
        Some(name) => ElementKind::parse(name).ok_or_else(|| InvalidElement::UnknownType(name.to_owned()))?,
        None => return Err(InvalidElement::MissingType),
    };

    let created_at = timestamp_field(obj.get("createdAt")).unwrap_or(now);
    let updated_at = timestamp_field(obj.get("updatedAt")).unwrap_or(created_at);

    let points = match obj.get("points") {
        Some(Value::Array(items)) => Some(items.iter().filter_map(parse_point).collect()),
        _ if kind == ElementKind::Brush => Some(Vec::new()),
        _ => None,
    };
    let text = match obj.get("text").and_then(Value::as_str) {
        Some(t) => Some(t.to_owned()),
        None if kind == ElementKind::Text => Some(String::new()),
        None => None,
    };

    Ok(Element {
        id,
        kind,
        x1: obj.get("x1").and_then(Value::as_f64),
        y1: obj.get("y1").and_then(Value::as_f64),
        x2: obj.get("x2").and_then(Value::as_f64),
        y2: obj.get("y2").and_then(Value::as_f64),
        points,
        text,
        stroke: obj
            .get("stroke")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_STROKE)
            .to_owned(),
        fill: default_fill(kind, obj.get("fill").and_then(Value::as_str).map(str::to_owned)),
        size: obj
            .get("size")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or_else(|| kind.default_size()),
        created_at,
        updated_at,
        is_deleted: obj.get("isDeleted").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Normalize a batch, dropping invalid records and keeping input order.
#[must_use]
pub fn normalize_all(raw: &[Value], now: i64) -> Vec<Element> {
    raw.iter()
        .filter_map(|value| match normalize(value, now) {
            Ok(el) => Some(el),
            Err(e) => {
                debug!(error = %e, "dropping invalid element");
                None
            }
        })
        .collect()
}

fn parse_point(value: &Value) -> Option<Point> {
    match value {
        Value::Object(obj) => Some(Point { x: obj.get("x")?.as_f64()?, y: obj.get("y")?.as_f64()? }),
        Value::Array(pair) if pair.len() >= 2 => Some(Point { x: pair[0].as_f64()?, y: pair[1].as_f64()? }),
        _ => None,
    }
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Normalize a Date-like, epoch-number, or absent value to epoch milliseconds.
///
/// Absent or unparsable values map to `0`, the oldest possible time, so any
/// real timestamp beats a missing one.
#[must_use]
pub fn normalize_timestamp(value: Option<&Value>) -> i64 {
    timestamp_field(value).unwrap_or(0)
}

fn timestamp_field(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(f64_to_ms)),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    let dt = OffsetDateTime::parse(s, &Rfc3339).ok()?;
    i64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok()
}

#[allow(clippy::cast_possible_truncation)]
fn f64_to_ms(f: f64) -> i64 {
    f.trunc() as i64
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Element {
    /// Timestamp used for last-writer-wins: `updatedAt`, falling back to `createdAt`.
    #[must_use]
    pub fn effective_updated_at(&self) -> i64 {
        if self.updated_at != 0 { self.updated_at } else { self.created_at }
    }

    /// Overlay `newer` on top of `self`. Fields present in `newer` win;
    /// geometry `newer` leaves unset is kept from `self`, and `createdAt`
    /// stays with the original record.
    #[must_use]
    pub fn overlay(self, newer: Element) -> Element {
        Element {
            id: newer.id,
            kind: newer.kind,
            x1: newer.x1.or(self.x1),
            y1: newer.y1.or(self.y1),
            x2: newer.x2.or(self.x2),
            y2: newer.y2.or(self.y2),
            points: newer.points.or(self.points),
            text: newer.text.or(self.text),
            stroke: newer.stroke,
            fill: newer.fill.or(self.fill),
            size: newer.size,
            // Creation time is fixed by the first record seen.
            created_at: if self.created_at != 0 { self.created_at } else { newer.created_at },
            updated_at: if newer.updated_at != 0 { newer.updated_at } else { self.updated_at },
            is_deleted: newer.is_deleted,
        }
    }

    /// True when both records describe the same drawing, ignoring timestamps.
    #[must_use]
    pub fn same_content(&self, other: &Element) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.x1 == other.x1
            && self.y1 == other.y1
            && self.x2 == other.x2
            && self.y2 == other.y2
            && self.points == other.points
            && self.text == other.text
            && self.stroke == other.stroke
            && self.fill == other.fill
            && self.size.to_bits() == other.size.to_bits()
            && self.is_deleted == other.is_deleted
    }
}

#[cfg(test)]
#[path = "element_test.rs"]
mod tests;
