//! In-place edits of the stored `permissions` subtree.
//!
//! Each edit touches only the node it targets. Keys the typed model does not
//! know, and entries it skips when building a snapshot, are written back
//! exactly as they were read.

use serde_json::{Map, Value};

use super::grant::{ChannelSet, Grant};
use crate::error::Result;

/// Object at `path` below `root`, created along with any missing parents.
///
/// A node on the way that is not an object is replaced by an empty one; the
/// snapshot ignores such nodes anyway.
pub(crate) fn object_at<'a>(
    root: &'a mut Value,
    path: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    let mut node = root;
    for key in path {
        node = ensure_object(node)?
            .entry(key.to_string())
            .or_insert(Value::Null);
    }
    ensure_object(node)
}

/// Existing object at `path` below `root`. Creates nothing.
pub(crate) fn find_object<'a>(
    root: &'a mut Value,
    path: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    let mut node = root;
    for key in path {
        node = node.get_mut(*key)?;
    }
    node.as_object_mut()
}

/// Add a subject to the grant list stored under `field`, or update it.
///
/// A new subject gets `channels` (empty when `None`). An existing subject only
/// has its `channels` key replaced, and only when `channels` is given and
/// differs; its other keys are kept.
pub(crate) fn upsert_grant(
    parent: &mut Map<String, Value>,
    field: &str,
    subject_id: &str,
    channels: Option<ChannelSet>,
) -> Result<()> {
    let Some(items) = ensure_array(parent, field) else {
        return Ok(());
    };

    let existing = items
        .iter()
        .position(|item| grant_id(item).as_deref() == Some(subject_id));
    match (existing, channels) {
        (None, channels) => {
            let grant = Grant::new(subject_id, channels.unwrap_or_default());
            items.push(serde_json::to_value(&grant)?);
        }
        (Some(_), None) => {}
        (Some(index), Some(channels)) => {
            let item = &mut items[index];
            let current = serde_json::from_value::<Grant>(item.clone()).ok();
            if current.is_some_and(|g| g.channels == channels) {
                return Ok(());
            }
            let channels = serde_json::to_value(&channels)?;
            match item.as_object_mut() {
                Some(fields) => {
                    fields.insert("channels".to_string(), channels);
                }
                None => {
                    let mut fields = Map::new();
                    fields.insert("id".to_string(), Value::String(subject_id.to_string()));
                    fields.insert("channels".to_string(), channels);
                    *item = Value::Object(fields);
                }
            }
        }
    }
    Ok(())
}

/// Drop every grant for `subject_id` from the list under `field`.
///
/// Entries are matched on their id alone, so a grant the snapshot skips (a
/// stored `*` channel, say) can still be removed.
pub(crate) fn remove_grant(parent: &mut Map<String, Value>, field: &str, subject_id: &str) {
    if let Some(items) = parent.get_mut(field).and_then(Value::as_array_mut) {
        items.retain(|item| grant_id(item).as_deref() != Some(subject_id));
    }
}

/// Set a boolean flag unless it already holds `value`.
pub(crate) fn set_flag(entry: &mut Map<String, Value>, key: &str, value: bool) {
    if entry.get(key) != Some(&Value::Bool(value)) {
        entry.insert(key.to_string(), Value::Bool(value));
    }
}

/// Replace a channel list, removing the key when `channels` is empty.
pub(crate) fn set_channels(
    entry: &mut Map<String, Value>,
    key: &str,
    channels: &ChannelSet,
) -> Result<()> {
    let current = entry
        .get(key)
        .and_then(|v| serde_json::from_value::<ChannelSet>(v.clone()).ok());
    if current.as_ref() == Some(channels) {
        return Ok(());
    }
    if channels.is_empty() {
        entry.remove(key);
    } else {
        entry.insert(key.to_string(), serde_json::to_value(channels)?);
    }
    Ok(())
}

/// Append patterns missing from the list stored under `bundle`.
pub(crate) fn append_patterns(map: &mut Map<String, Value>, bundle: &str, patterns: &[String]) {
    let Some(items) = ensure_array(map, bundle) else {
        return;
    };
    for pattern in patterns {
        if !items.iter().any(|item| item.as_str() == Some(pattern)) {
            items.push(Value::String(pattern.clone()));
        }
    }
}

/// Remove one pattern from a bundle, dropping the bundle once it is empty.
pub(crate) fn remove_pattern(map: &mut Map<String, Value>, bundle: &str, pattern: &str) {
    let emptied = match map.get_mut(bundle).and_then(Value::as_array_mut) {
        Some(items) => {
            items.retain(|item| item.as_str() != Some(pattern));
            items.is_empty()
        }
        None => false,
    };
    if emptied {
        map.remove(bundle);
    }
}

/// Id of a stored grant, read the way [`Grant`] reads it.
fn grant_id(item: &Value) -> Option<String> {
    let id = match item {
        Value::Object(fields) => fields.get("id")?,
        other => other,
    };
    match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn ensure_object(value: &mut Value) -> Option<&mut Map<String, Value>> {
    if !value.is_object() {
        if !value.is_null() {
            log::warn!("replacing permissions node that is not an object: {}", value);
        }
        *value = Value::Object(Map::new());
    }
    value.as_object_mut()
}

fn ensure_array<'a>(parent: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Vec<Value>> {
    let slot = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        log::warn!("replacing '{}' that is not a list: {}", key, slot);
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {}", other),
        }
    }

    // ===== Path Tests =====

    #[test]
    fn test_object_at_creates_missing_parents() {
        let mut root = Value::Null;
        object_at(&mut root, &["guilds", "900", "commands"])
            .unwrap()
            .insert("help".into(), json!({}));
        assert_eq!(root, json!({"guilds": {"900": {"commands": {"help": {}}}}}));
    }

    #[test]
    fn test_object_at_keeps_siblings() {
        let mut root = json!({"audit": 1, "guilds": {"900": {"notes": "x"}}});
        object_at(&mut root, &["guilds", "900", "commands"]).unwrap();
        assert_eq!(
            root,
            json!({"audit": 1, "guilds": {"900": {"notes": "x", "commands": {}}}})
        );
    }

    #[test]
    fn test_find_object_creates_nothing() {
        let mut root = json!({"guilds": {}});
        assert!(find_object(&mut root, &["guilds", "900", "commands"]).is_none());
        assert_eq!(root, json!({"guilds": {}}));
    }

    // ===== Grant Tests =====

    #[test]
    fn test_upsert_keeps_unknown_grant_keys() {
        let mut entry = object(json!({
            "users": [{"id": "1", "channels": ["111"], "added_by": "9"}]
        }));

        upsert_grant(&mut entry, "users", "1", Some(ChannelSet::public())).unwrap();
        assert_eq!(
            entry["users"],
            json!([{"id": "1", "channels": ["public"], "added_by": "9"}])
        );

        // Re-adding without channels leaves the grant alone.
        let before = entry.clone();
        upsert_grant(&mut entry, "users", "1", None).unwrap();
        assert_eq!(entry, before);
    }

    #[test]
    fn test_upsert_appends_new_subject() {
        let mut entry = object(json!({"roles": ["5"]}));
        upsert_grant(&mut entry, "roles", "6", None).unwrap();
        assert_eq!(entry["roles"], json!(["5", {"id": "6", "channels": []}]));

        // A legacy bare id becomes a full grant once channels are given.
        upsert_grant(&mut entry, "roles", "5", Some(ChannelSet::public())).unwrap();
        assert_eq!(entry["roles"][0], json!({"id": "5", "channels": ["public"]}));
    }

    #[test]
    fn test_remove_matches_on_id_only() {
        let mut entry = object(json!({
            "users": [{"id": "1", "channels": ["*"]}, {"id": "2", "channels": []}, 1]
        }));
        remove_grant(&mut entry, "users", "1");
        assert_eq!(entry["users"], json!([{"id": "2", "channels": []}]));
    }

    // ===== Flag Tests =====

    #[test]
    fn test_set_flag_and_channels() {
        let mut entry = object(json!({"public": true, "public_channels": ["2", "1"]}));

        set_flag(&mut entry, "public", true);
        set_channels(&mut entry, "public_channels", &ChannelSet::parse(["1", "2"]).unwrap())
            .unwrap();
        assert_eq!(entry["public_channels"], json!(["2", "1"]));

        set_channels(&mut entry, "public_channels", &ChannelSet::new()).unwrap();
        assert!(!entry.contains_key("public_channels"));
    }

    #[test]
    fn test_patterns() {
        let mut map = Map::new();
        append_patterns(&mut map, "mods", &["roles.*".into(), "bc.get".into()]);
        append_patterns(&mut map, "mods", &["roles.*".into()]);
        assert_eq!(map["mods"], json!(["roles.*", "bc.get"]));

        remove_pattern(&mut map, "mods", "roles.*");
        assert_eq!(map["mods"], json!(["bc.get"]));
        remove_pattern(&mut map, "mods", "bc.get");
        assert!(!map.contains_key("mods"));
    }
}
