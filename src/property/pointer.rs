//! JSON-pointer partial updates
//!
//! A partial Set body is an object whose keys are pointer paths
//! (`/a/b`, `~1` for `/`, `~0` for `~`) and whose values replace whatever
//! sits at that path in the stored value. The empty path replaces the whole
//! value. Every segment before the last must resolve to an existing object;
//! anything else fails the whole update and leaves the stored value as is.

use super::PropertyError;
use crate::json::JsonValue;

/// Split a pointer into unescaped segments
pub fn parse_pointer(path: &str) -> Result<Vec<String>, PropertyError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PropertyError::InvalidPointer(path.to_string()));
    };
    rest.split('/')
        .map(|segment| unescape_segment(segment).ok_or_else(|| PropertyError::InvalidPointer(path.to_string())))
        .collect()
}

fn unescape_segment(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '1' => out.push('/'),
            '0' => out.push('~'),
            _ => return None,
        }
    }
    Some(out)
}

/// Apply a partial update body to `base`, returning the patched value
pub fn apply_partial_update(base: &JsonValue, patch: &JsonValue) -> Result<JsonValue, PropertyError> {
    let members = patch.as_object().ok_or_else(|| {
        PropertyError::MalformedHeader("partial update body must be an object".to_string())
    })?;
    let mut result = base.clone();
    for (path, value) in members {
        let segments = parse_pointer(path)?;
        set_at(&mut result, &segments, value.clone(), path)?;
    }
    Ok(result)
}

fn set_at(
    target: &mut JsonValue,
    segments: &[String],
    value: JsonValue,
    path: &str,
) -> Result<(), PropertyError> {
    let Some((last, parents)) = segments.split_last() else {
        *target = value;
        return Ok(());
    };
    let not_object = || PropertyError::PointerNotObject {
        path: path.to_string(),
    };
    let mut node = target;
    for segment in parents {
        node = node
            .as_object_mut()
            .ok_or_else(not_object)?
            .get_mut(segment.as_str())
            .ok_or_else(not_object)?;
    }
    node.as_object_mut()
        .ok_or_else(not_object)?
        .insert(last.clone(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn json(text: &str) -> JsonValue {
        JsonValue::parse(text).unwrap()
    }

    #[test]
    fn test_parse_pointer() {
        assert_eq!(parse_pointer("").unwrap(), Vec::<String>::new());
        assert_eq!(parse_pointer("/a/b").unwrap(), vec!["a", "b"]);
        assert_eq!(parse_pointer("/a~1b/c~0d").unwrap(), vec!["a/b", "c~d"]);
        assert_eq!(parse_pointer("/~01").unwrap(), vec!["~1"]);
        assert!(parse_pointer("a/b").is_err());
        assert!(parse_pointer("/a~2").is_err());
    }

    #[test]
    fn test_replace_nested_values() {
        let base = json(r#"{"name":"Piano","tone":{"attack":10,"release":20}}"#);
        let patch = json(r#"{"/tone/attack":5,"/name":"EP"}"#);
        let result = apply_partial_update(&base, &patch).unwrap();
        assert_eq!(
            result.serialize(),
            r#"{"name":"EP","tone":{"attack":5,"release":20}}"#
        );
    }

    #[test]
    fn test_adds_missing_leaf() {
        let base = json(r#"{"tone":{}}"#);
        let result = apply_partial_update(&base, &json(r#"{"/tone/a~1b":true}"#)).unwrap();
        assert_eq!(result.serialize(), r#"{"tone":{"a/b":true}}"#);
    }

    #[test]
    fn test_root_path_replaces_value() {
        let base = json(r#"{"a":1}"#);
        let result = apply_partial_update(&base, &json(r#"{"":[1,2]}"#)).unwrap();
        assert_eq!(result.serialize(), "[1,2]");
    }

    #[test]
    fn test_non_object_container_fails_whole_update() {
        let base = json(r#"{"list":[1,2],"x":0}"#);
        let err = apply_partial_update(&base, &json(r#"{"/x":1,"/list/0":9}"#)).unwrap_err();
        assert_eq!(
            err,
            PropertyError::PointerNotObject {
                path: "/list/0".to_string()
            }
        );
        let err = apply_partial_update(&base, &json(r#"{"/missing/y":1}"#)).unwrap_err();
        assert!(matches!(err, PropertyError::PointerNotObject { .. }));
    }

    #[test]
    fn test_patch_must_be_object() {
        assert!(apply_partial_update(&json("{}"), &json("[1]")).is_err());
    }

    fn arb_leaf() -> impl Strategy<Value = JsonValue> {
        prop_oneof![
            any::<bool>().prop_map(JsonValue::Bool),
            (-1000i64..1000).prop_map(JsonValue::from),
            "[a-z]{0,6}".prop_map(JsonValue::from),
        ]
    }

    proptest! {
        #[test]
        fn prop_partial_update_is_idempotent(
            keys in prop::collection::vec("[a-c]{1,2}", 1..4),
            values in prop::collection::vec(arb_leaf(), 1..4),
        ) {
            let base = json(r#"{"a":{"b":1},"c":2}"#);
            let patch = JsonValue::object(
                keys.iter()
                    .zip(values.iter())
                    .map(|(k, v)| (format!("/{}", k), v.clone())),
            );
            let once = apply_partial_update(&base, &patch);
            let twice = once.clone().and_then(|v| apply_partial_update(&v, &patch));
            prop_assert_eq!(once, twice);
        }
    }
}
