//! Query texts used by the navigation core.
//!
//! Lookups bind their inputs as parameters. The path query is rendered with
//! the names inlined because its text is what the repair loop shows to the
//! reasoning service.

use super::types::NodeKind;

pub const NODE_EXISTS: &str = "\
MATCH (n {name: $name})
WHERE $label IN labels(n)
RETURN count(n) AS count";

pub const LABEL_OF: &str = "\
MATCH (n {name: $name})
RETURN head(labels(n)) AS label
LIMIT 1";

pub const NEAREST_SCREEN: &str = "\
MATCH (start {name: $name})
MATCH (target:Screen)
WHERE target.name IN $screens
MATCH path = shortestPath((start)-[:CONTAINS|TRIGGERS|LEADS_TO*..10]-(target))
RETURN target.name AS screen_name, length(path) AS distance
ORDER BY distance ASC
LIMIT 1";

pub const TRIGGER_OF: &str = "\
MATCH (u:UIElement {name: $name})-[:TRIGGERS]->(a)
WHERE NOT a:UIElement
OPTIONAL MATCH (a)-[:LEADS_TO]->(s:Screen)
RETURN a.name AS action_name, s.name AS screen_name
ORDER BY s.name IS NULL
LIMIT 1";

pub const IS_CONTAINED: &str = "\
MATCH (s:Screen {name: $screen}), (e:UIElement {name: $element})
RETURN exists((s)-[:CONTAINS|TRIGGERS*]->(e)) AS contained";

pub const SCREEN_DESCRIPTION: &str = "\
MATCH (s:Screen {name: $name})
WHERE s.description IS NOT NULL
RETURN s.description AS description";

pub const CONTAINED_ELEMENTS: &str = "\
MATCH (s {name: $name})-[:CONTAINS]->(u:UIElement)
OPTIONAL MATCH (u)-[:TRIGGERS]->(a)
RETURN u.name AS name, u.x AS x, u.y AS y, a.name AS action
ORDER BY name";

/// Quote a node name as a string literal
pub fn quote(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Shortest forward path from `start` to `target`, returning the
/// coordinate-bearing UI elements on it in path order.
pub fn shortest_path(start_kind: NodeKind, start: &str, target_kind: NodeKind, target: &str) -> String {
    format!(
        "MATCH (start:{} {{name: {}}})
MATCH (target:{} {{name: {}}})
MATCH path = shortestPath((start)-[:CONTAINS|TRIGGERS|LEADS_TO*]->(target))
UNWIND nodes(path) AS n
WITH n, path
WHERE n:UIElement AND n.x IS NOT NULL AND n.y IS NOT NULL
RETURN n.name AS name, n.x AS x, n.y AS y
ORDER BY apoc.coll.indexOf(nodes(path), n)",
        start_kind.label(),
        quote(start),
        target_kind.label(),
        quote(target)
    )
}
