use super::*;
use serde_json::json;

const NOW: i64 = 1_700_000_000_000;

#[test]
fn normalize_fills_defaults_for_shapes() {
    let el = normalize(&json!({"id": "r1", "type": "rectangle", "x1": 1, "y1": 2, "x2": 3, "y2": 4}), NOW).unwrap();
    assert_eq!(el.kind, ElementKind::Rectangle);
    assert_eq!(el.created_at, NOW);
    assert_eq!(el.updated_at, NOW);
    assert_eq!(el.fill.as_deref(), Some("transparent"));
    assert_eq!(el.stroke, "#000000");
    assert!((el.size - 1.0).abs() < f64::EPSILON);
    assert_eq!(el.x2, Some(3.0));
    assert!(!el.is_deleted);
}

#[test]
fn normalize_updated_at_defaults_to_created_at() {
    let el = normalize(&json!({"id": "a", "type": "line", "createdAt": 1000}), NOW).unwrap();
    assert_eq!(el.created_at, 1000);
    assert_eq!(el.updated_at, 1000);
}

#[test]
fn normalize_per_tool_sizes() {
    let text = normalize(&json!({"id": "t", "type": "text"}), NOW).unwrap();
    assert!((text.size - 20.0).abs() < f64::EPSILON);
    assert_eq!(text.text.as_deref(), Some(""));

    let brush = normalize(&json!({"id": "b", "type": "brush"}), NOW).unwrap();
    assert!((brush.size - 2.0).abs() < f64::EPSILON);
    assert_eq!(brush.points, Some(vec![]));
    assert!(brush.fill.is_none());
}

#[test]
fn normalize_accepts_legacy_type_spellings() {
    let el = normalize(&json!({"id": "b", "type": "BRUSH", "points": [{"x": 1, "y": 2}, [3, 4], "junk"]}), NOW).unwrap();
    assert_eq!(el.kind, ElementKind::Brush);
    assert_eq!(el.points, Some(vec![Point { x: 1.0, y: 2.0 }, Point { x: 3.0, y: 4.0 }]));

    let el = normalize(&json!({"id": "f", "type": "freehand"}), NOW).unwrap();
    assert_eq!(el.kind, ElementKind::Brush);
}

#[test]
fn normalize_rejects_missing_id_or_type() {
    assert_eq!(normalize(&json!({"type": "line"}), NOW), Err(InvalidElement::MissingId));
    assert_eq!(normalize(&json!({"id": "", "type": "line"}), NOW), Err(InvalidElement::MissingId));
    assert_eq!(normalize(&json!({"id": "a"}), NOW), Err(InvalidElement::MissingType));
    assert_eq!(
        normalize(&json!({"id": "a", "type": "hexagon"}), NOW),
        Err(InvalidElement::UnknownType("hexagon".into()))
    );
    assert_eq!(normalize(&json!("a"), NOW), Err(InvalidElement::NotAnObject));
}

#[test]
fn normalize_all_drops_invalid_and_keeps_order() {
    let raw = vec![
        json!({"id": "b", "type": "line"}),
        json!({"type": "line"}),
        json!({"id": "a", "type": "circle"}),
    ];
    let ids: Vec<_> = normalize_all(&raw, NOW).into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[test]
fn normalize_timestamp_variants() {
    assert_eq!(normalize_timestamp(None), 0);
    assert_eq!(normalize_timestamp(Some(&json!(null))), 0);
    assert_eq!(normalize_timestamp(Some(&json!("not a date"))), 0);
    assert_eq!(normalize_timestamp(Some(&json!(1234))), 1234);
    assert_eq!(normalize_timestamp(Some(&json!(1234.9))), 1234);
    assert_eq!(normalize_timestamp(Some(&json!("5678"))), 5678);
    assert_eq!(normalize_timestamp(Some(&json!("1970-01-01T00:00:01.500Z"))), 1500);
}

#[test]
fn serializes_camel_case_and_omits_live_flag() {
    let el = Element::shape("r1", ElementKind::Rectangle, Point { x: 0.0, y: 0.0 }, Point { x: 1.0, y: 1.0 }, &Style::default(), 1000);
    let value = serde_json::to_value(&el).unwrap();
    assert_eq!(value["type"], "rectangle");
    assert_eq!(value["createdAt"], 1000);
    assert_eq!(value["updatedAt"], 1000);
    assert!(value.get("isDeleted").is_none());
    assert!(value.get("points").is_none());
}

#[test]
fn overlay_keeps_geometry_the_newer_record_lacks() {
    let base = Element::shape("a", ElementKind::Line, Point { x: 0.0, y: 0.0 }, Point { x: 5.0, y: 5.0 }, &Style::default(), 10);
    let newer = normalize(&json!({"id": "a", "type": "line", "stroke": "#ff0000", "updatedAt": 20}), NOW).unwrap();
    let merged = base.overlay(newer);
    assert_eq!(merged.stroke, "#ff0000");
    assert_eq!(merged.x2, Some(5.0));
    assert_eq!(merged.updated_at, 20);
    assert_eq!(merged.created_at, 10);
}

#[test]
fn same_content_ignores_timestamps() {
    let a = Element::text("t", Point { x: 1.0, y: 1.0 }, &Style::default(), 10);
    let mut b = a.clone();
    b.updated_at = 99;
    assert!(a.same_content(&b));
    b.text = Some("hi".into());
    assert!(!a.same_content(&b));
}
