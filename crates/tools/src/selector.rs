//! Selector normalization.
//!
//! Callers may pass a raw engine selector (CSS, `xpath=`, `text=`, `role=`) or the
//! `role "name"` form printed by aria snapshots, e.g. `button "Submit"`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Roles accepted in the `role "name"` shorthand.
pub const ROLES: &[&str] = &[
    "link",
    "button",
    "heading",
    "textbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "option",
    "menuitem",
    "menu",
    "tab",
    "tabpanel",
    "img",
    "dialog",
    "alertdialog",
    "alert",
    "status",
    "cell",
    "row",
    "grid",
    "table",
    "list",
    "listitem",
    "navigation",
    "main",
    "banner",
    "contentinfo",
    "complementary",
    "form",
    "search",
    "article",
    "region",
];

static ROLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(r#"(?i)^({})\s+["'](.+)["']$"#, ROLES.join("|"));
    Regex::new(&pattern).expect("role pattern is a valid regex")
});

/// Rewrite `role "name"` into `role=<role>[name="<name>"]`; anything else is
/// returned unchanged.
pub fn normalize(selector: &str) -> String {
    let trimmed = selector.trim();
    if let Some(caps) = ROLE_PATTERN.captures(trimmed) {
        let role = caps[1].to_lowercase();
        let name = caps[2].replace('"', "\\\"");
        return format!("role={}[name=\"{}\"]", role, name);
    }
    selector.to_string()
}

/// In-page resolver understanding css, `css=`, `xpath=`/`//`, `text=` and
/// `role=<role>[name="..."]` selectors. Evaluates to `(selector, all) => Element | Element[] | null`.
pub const ENGINE_JS: &str = include_str!("browser/selector_engine.js");

/// JS expression resolving `selector` to the first match (or `null`).
pub fn query_expression(selector: &str) -> String {
    format!("({})({}, false)", ENGINE_JS, js_string(selector))
}

/// JS expression resolving `selector` to an array of every match.
pub fn query_all_expression(selector: &str) -> String {
    format!("({})({}, true)", ENGINE_JS, js_string(selector))
}

/// Quote a Rust string as a JS string literal.
pub fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_shorthand() {
        assert_eq!(normalize(r#"button "Submit""#), r#"role=button[name="Submit"]"#);
        assert_eq!(
            normalize(r#"link "Green Energy Fund""#),
            r#"role=link[name="Green Energy Fund"]"#
        );
        assert_eq!(normalize("heading 'Home'"), r#"role=heading[name="Home"]"#);
    }

    #[test]
    fn test_role_is_case_insensitive_and_lowercased() {
        assert_eq!(normalize(r#"Button "OK""#), r#"role=button[name="OK"]"#);
        assert_eq!(normalize(r#"  TEXTBOX "Email"  "#), r#"role=textbox[name="Email"]"#);
    }

    #[test]
    fn test_inner_quotes_are_escaped() {
        assert_eq!(
            normalize(r#"button "Say "hi" now""#),
            r#"role=button[name="Say \"hi\" now"]"#
        );
    }

    #[test]
    fn test_other_selectors_pass_through() {
        for sel in [
            "#login",
            "div.card > a",
            "text=Sign in",
            "xpath=//button",
            "widget \"Foo\"",
            "button Submit",
            "  .padded  ",
        ] {
            assert_eq!(normalize(sel), sel);
        }
    }

    #[test]
    fn test_query_expression_quotes_selector() {
        let expr = query_expression(r#"role=button[name="Go"]"#);
        assert!(expr.ends_with(r#"("role=button[name=\"Go\"]", false)"#));
        assert!(query_all_expression("a").ends_with(r#"("a", true)"#));
    }
}
