//! Accessibility tree snapshot.
//!
//! Converts Chrome's accessibility tree into the indented `- role "name"` text
//! form. Role/name pairs in the output can be fed back as selectors.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AXNode {
    pub role: String,
    pub name: String,
    pub value: String,
    pub backend_node_id: Option<i64>,
    pub ignored: bool,
    pub level: Option<i64>,
    pub checked: Option<String>,
    pub pressed: Option<String>,
    pub disabled: bool,
    pub expanded: Option<bool>,
    pub selected: bool,
    pub children: Vec<AXNode>,
}

/// Containers that add nothing to the outline when unnamed.
const STRUCTURAL_ROLES: &[&str] = &[
    "generic",
    "none",
    "presentation",
    "GenericContainer",
    "Section",
    "Ignored",
    "LayoutTable",
    "LayoutTableRow",
    "LayoutTableCell",
];

/// Chrome-internal roles that never render.
const HIDDEN_ROLES: &[&str] = &["InlineTextBox", "LineBreak"];

/// Build the tree rooted at the node whose DOM backend id is `backend_node_id`,
/// or at the first node when `None`.
pub fn parse_ax_tree(cdp_response: &Value, backend_node_id: Option<i64>) -> Option<AXNode> {
    let nodes = cdp_response.get("nodes").and_then(|v| v.as_array())?;

    let mut node_map: HashMap<&str, &Value> = HashMap::new();
    for node in nodes {
        if let Some(id) = node.get("nodeId").and_then(|v| v.as_str()) {
            node_map.insert(id, node);
        }
    }

    let root = match backend_node_id {
        Some(wanted) => nodes
            .iter()
            .find(|n| n.get("backendDOMNodeId").and_then(|v| v.as_i64()) == Some(wanted))?,
        None => nodes.first()?,
    };
    let root_id = root.get("nodeId").and_then(|v| v.as_str())?;
    Some(build_ax_node(root_id, &node_map, 0))
}

fn build_ax_node(node_id: &str, node_map: &HashMap<&str, &Value>, depth: usize) -> AXNode {
    let Some(node) = node_map.get(node_id).copied() else {
        return AXNode {
            role: "unknown".to_string(),
            ignored: true,
            ..AXNode::default()
        };
    };

    let mut ax = AXNode {
        role: get_ax_value(node, "role"),
        name: get_ax_value(node, "name"),
        value: get_ax_value(node, "value"),
        backend_node_id: node.get("backendDOMNodeId").and_then(|v| v.as_i64()),
        ignored: node.get("ignored").and_then(|v| v.as_bool()).unwrap_or(false),
        ..AXNode::default()
    };

    if let Some(props) = node.get("properties").and_then(|v| v.as_array()) {
        for prop in props {
            let prop_name = prop.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let prop_value = prop
                .get("value")
                .and_then(|v| v.get("value"))
                .cloned()
                .unwrap_or(Value::Null);
            match prop_name {
                "level" => ax.level = prop_value.as_i64(),
                "checked" => ax.checked = tristate(&prop_value),
                "pressed" => ax.pressed = tristate(&prop_value),
                "disabled" => ax.disabled = prop_value.as_bool().unwrap_or(false),
                "expanded" => ax.expanded = prop_value.as_bool(),
                "selected" => ax.selected = prop_value.as_bool().unwrap_or(false),
                _ => {}
            }
        }
    }

    // Guard against malformed cyclic trees.
    if depth < 256 {
        if let Some(child_ids) = node.get("childIds").and_then(|v| v.as_array()) {
            ax.children = child_ids
                .iter()
                .filter_map(|id| id.as_str())
                .map(|id| build_ax_node(id, node_map, depth + 1))
                .collect();
        }
    }
    ax
}

fn tristate(v: &Value) -> Option<String> {
    match v {
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn get_ax_value(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| {
            // CDP returns {type: "...", value: "..."} for role/name/value
            v.get("value").and_then(|val| val.as_str()).or_else(|| v.as_str())
        })
        .unwrap_or("")
        .to_string()
}

fn display_role(role: &str) -> &str {
    match role {
        "image" => "img",
        "RootWebArea" | "WebArea" => "document",
        "StaticText" => "text",
        other => other,
    }
}

/// Render the tree as indented outline text.
pub fn render_tree(root: &AXNode) -> String {
    let mut lines = Vec::new();
    render_node(&mut lines, root, 0);
    lines.join("\n")
}

fn render_node(lines: &mut Vec<String>, node: &AXNode, indent: usize) {
    if HIDDEN_ROLES.contains(&node.role.as_str()) {
        return;
    }

    if node.role == "StaticText" {
        let text = node.name.trim();
        if !text.is_empty() {
            lines.push(format!("{}- text: {}", "  ".repeat(indent), text));
        }
        return;
    }

    let transparent = node.ignored
        || (STRUCTURAL_ROLES.iter().any(|r| r.eq_ignore_ascii_case(&node.role)) && node.name.is_empty());
    if transparent {
        for child in &node.children {
            render_node(lines, child, indent);
        }
        return;
    }

    let mut line = format!("{}- {}", "  ".repeat(indent), display_role(&node.role));
    if !node.name.is_empty() {
        line.push_str(&format!(" \"{}\"", node.name.replace('"', "\\\"")));
    }
    if let Some(level) = node.level {
        line.push_str(&format!(" [level={}]", level));
    }
    match node.checked.as_deref() {
        Some("true") => line.push_str(" [checked]"),
        Some("mixed") => line.push_str(" [checked=mixed]"),
        _ => {}
    }
    match node.pressed.as_deref() {
        Some("true") => line.push_str(" [pressed]"),
        Some("mixed") => line.push_str(" [pressed=mixed]"),
        _ => {}
    }
    if node.disabled {
        line.push_str(" [disabled]");
    }
    if let Some(true) = node.expanded {
        line.push_str(" [expanded]");
    }
    if node.selected {
        line.push_str(" [selected]");
    }

    let mut child_lines = Vec::new();
    for child in &node.children {
        render_node(&mut child_lines, child, indent + 1);
    }

    // Text that only repeats the accessible name is noise.
    let own_text = format!("{}- text: {}", "  ".repeat(indent + 1), node.name.trim());
    if !node.name.is_empty() && child_lines.len() == 1 && child_lines[0] == own_text {
        child_lines.clear();
    }

    if !node.value.is_empty() {
        line.push_str(&format!(": {}", node.value));
        lines.push(line);
        lines.extend(child_lines);
        return;
    }

    let text_prefix = format!("{}- text: ", "  ".repeat(indent + 1));
    if node.name.is_empty() && child_lines.len() == 1 && child_lines[0].starts_with(&text_prefix) {
        line.push_str(&format!(": {}", &child_lines[0][text_prefix.len()..]));
        lines.push(line);
        return;
    }

    if !child_lines.is_empty() {
        line.push(':');
    }
    lines.push(line);
    lines.extend(child_lines);
}
