use serde_json::Value;
use tracing::warn;

use flowdeck_core::types::ConnectionRef;

/// Deepest nesting scanned for connection references.
pub const MAX_DEPTH: usize = 64;

/// Find every connection reference embedded in an input value.
///
/// Recognizes two shapes:
/// - a bare reference, `{from_node, from_output}`, which is returned as-is
///   without descending into it;
/// - a wrapped reference, `{connection: {from_node, from_output}, ...}`,
///   whose sibling members are still scanned.
///
/// Objects and arrays are walked in declaration order. Subtrees deeper than
/// [`MAX_DEPTH`] are skipped with a warning.
pub fn find_connections(value: &Value) -> Vec<ConnectionRef> {
    let mut found = Vec::new();
    collect(value, 0, &mut found);
    found
}

fn collect(value: &Value, depth: usize, found: &mut Vec<ConnectionRef>) {
    if depth > MAX_DEPTH {
        warn!(max_depth = MAX_DEPTH, "Connection scan depth exceeded, skipping subtree");
        return;
    }

    match value {
        Value::Object(map) => {
            if let Some(conn) = as_connection(value) {
                found.push(conn);
                return;
            }
            for (key, member) in map {
                if key == "connection" {
                    if let Some(conn) = as_connection(member) {
                        found.push(conn);
                        continue;
                    }
                }
                collect(member, depth + 1, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, depth + 1, found);
            }
        }
        _ => {}
    }
}

/// Interpret an object with string `from_node` and `from_output` as a reference.
pub fn as_connection(value: &Value) -> Option<ConnectionRef> {
    let map = value.as_object()?;
    let from_node = map.get("from_node")?.as_str()?;
    let from_output = map.get("from_output")?.as_str()?;
    Some(ConnectionRef::new(from_node, from_output))
}
