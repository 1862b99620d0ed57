//! A single attached page target and the operations tools perform on it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use pagehost_core::{Error, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::cdp::{CdpClient, CdpEvent};
use super::snapshot::{parse_ax_tree, render_tree};
use crate::selector::{query_all_expression, query_expression};

/// Applied to element waits unless a tool passes its own.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const NAVIGATION_TIMEOUT_MS: u64 = 60_000;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const VISIBLE_JS: &str = "function() { \
    if (!this.isConnected) return false; \
    const style = getComputedStyle(this); \
    if (style.visibility === 'hidden' || style.display === 'none') return false; \
    const r = this.getBoundingClientRect(); \
    return r.width > 0 && r.height > 0; }";

const CLICK_POINT_JS: &str = "function() { \
    this.scrollIntoView({block: 'center', inline: 'center'}); \
    const r = this.getBoundingClientRect(); \
    return {x: r.left + r.width / 2, y: r.top + r.height / 2, w: r.width, h: r.height}; }";

const FILL_JS: &str = "function(value) { \
    const direct = ['date', 'time', 'datetime-local', 'month', 'week', 'color', 'range']; \
    const tag = this.tagName; \
    if (tag === 'INPUT') { \
        const type = (this.getAttribute('type') || 'text').toLowerCase(); \
        if (['checkbox', 'radio', 'file', 'button', 'submit', 'reset', 'image', 'hidden'].includes(type)) \
            throw new Error('Input of type \"' + type + '\" cannot be filled'); \
        this.focus(); \
        if (direct.includes(type)) { \
            this.value = value; \
            this.dispatchEvent(new Event('input', {bubbles: true})); \
            this.dispatchEvent(new Event('change', {bubbles: true})); \
            return 'set'; \
        } \
        this.select(); this.value = ''; \
        this.dispatchEvent(new Event('input', {bubbles: true})); \
        return 'type'; \
    } \
    if (tag === 'TEXTAREA') { \
        this.focus(); this.select(); this.value = ''; \
        this.dispatchEvent(new Event('input', {bubbles: true})); \
        return 'type'; \
    } \
    if (this.isContentEditable) { \
        this.focus(); \
        const range = document.createRange(); range.selectNodeContents(this); \
        const sel = window.getSelection(); sel.removeAllRanges(); sel.addRange(range); \
        document.execCommand('delete'); \
        return 'type'; \
    } \
    throw new Error('Element is not an <input>, <textarea> or [contenteditable] element'); }";

const CHANGE_JS: &str = "function() { this.dispatchEvent(new Event('change', {bubbles: true})); }";

const SELECT_JS: &str = "function(by, value) { \
    if (this.tagName !== 'SELECT') throw new Error('Element is not a <select> element'); \
    const options = Array.from(this.options); \
    let option; \
    if (by === 'index') option = options[parseInt(value, 10)]; \
    else if (by === 'label') option = options.find(o => o.label === value || o.textContent.trim() === value); \
    else option = options.find(o => o.value === value); \
    if (!option) throw new Error('No option matching ' + by + ' \"' + value + '\"'); \
    options.forEach(o => { o.selected = o === option; }); \
    this.dispatchEvent(new Event('input', {bubbles: true})); \
    this.dispatchEvent(new Event('change', {bubbles: true})); \
    return options.filter(o => o.selected).map(o => o.value); }";

const ELEMENT_RECT_JS: &str = "function() { \
    this.scrollIntoView({block: 'center', inline: 'center'}); \
    const r = this.getBoundingClientRect(); \
    return {x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height}; }";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "load" => Some(Self::Load),
            "domcontentloaded" => Some(Self::DomContentLoaded),
            "networkidle" => Some(Self::NetworkIdle),
            _ => None,
        }
    }

    /// Name of the matching `Page.lifecycleEvent`.
    fn lifecycle_name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkIdle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl ElementState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "visible" => Some(Self::Visible),
            "hidden" => Some(Self::Hidden),
            "attached" => Some(Self::Attached),
            "detached" => Some(Self::Detached),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::Attached => "attached",
            Self::Detached => "detached",
        }
    }

    fn satisfied(self, present: bool, visible: bool) -> bool {
        match self {
            Self::Visible => visible,
            Self::Hidden => !visible,
            Self::Attached => present,
            Self::Detached => !present,
        }
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectBy {
    Value,
    Label,
    Index,
}

impl SelectBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "value" => Some(Self::Value),
            "label" => Some(Self::Label),
            "index" => Some(Self::Index),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Label => "label",
            Self::Index => "index",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperFormat {
    A4,
    Letter,
}

impl PaperFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A4" => Some(Self::A4),
            "Letter" => Some(Self::Letter),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A4 => "A4",
            Self::Letter => "Letter",
        }
    }

    /// Portrait (width, height) in inches.
    pub fn size_inches(self) -> (f64, f64) {
        match self {
            Self::A4 => (8.27, 11.69),
            Self::Letter => (8.5, 11.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub selector: Option<String>,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, Copy)]
pub struct PdfOptions {
    pub format: PaperFormat,
    pub landscape: bool,
}

/// Handle to one page target, attached through a flattened CDP session.
#[derive(Clone)]
pub struct Page {
    cdp: Arc<CdpClient>,
    target_id: String,
    session_id: String,
    browser_context_id: Option<String>,
    default_timeout_ms: u64,
}

impl Page {
    /// Attach to `target_id` and enable the domains tools rely on.
    pub async fn attach(
        cdp: Arc<CdpClient>,
        target_id: &str,
        browser_context_id: Option<String>,
    ) -> Result<Self> {
        let session_id = cdp.attach_to_target(target_id).await?;
        let page = Self {
            cdp,
            target_id: target_id.to_string(),
            session_id,
            browser_context_id,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        };
        for domain in ["Page", "Runtime", "Network", "DOM"] {
            page.send(&format!("{}.enable", domain), json!({})).await?;
        }
        page.send("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        debug!(target = %page.target_id, session = %page.session_id, "Attached to page");
        Ok(page)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Send a command on this page's session.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.cdp.send(method, params, Some(&self.session_id)).await
    }

    pub async fn subscribe(&self, methods: &[&str]) -> mpsc::Receiver<CdpEvent> {
        self.cdp.subscribe(methods, Some(&self.session_id)).await
    }

    /// Whether the target still exists in the browser.
    pub async fn is_open(&self) -> bool {
        if self.cdp.is_closed() {
            return false;
        }
        match self.cdp.get_targets().await {
            Ok(targets) => targets
                .iter()
                .any(|t| t.get("targetId").and_then(|v| v.as_str()) == Some(&self.target_id)),
            Err(_) => false,
        }
    }

    pub async fn url(&self) -> Result<String> {
        let info = self
            .cdp
            .send_command("Target.getTargetInfo", json!({ "targetId": self.target_id }))
            .await?;
        Ok(info
            .pointer("/targetInfo/url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    pub async fn title(&self) -> Result<String> {
        let title = self.evaluate("document.title").await?;
        Ok(title.as_str().unwrap_or_default().to_string())
    }

    /// Number of page targets sharing this page's browser context.
    pub async fn context_page_count(&self) -> Result<usize> {
        let targets = self.cdp.get_targets().await?;
        Ok(targets
            .iter()
            .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            .filter(|t| {
                self.browser_context_id.is_none()
                    || t.get("browserContextId").and_then(|v| v.as_str())
                        == self.browser_context_id.as_deref()
            })
            .count())
    }

    /// Evaluate an expression and return its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    pub async fn goto(&self, url: &str, wait_until: WaitUntil) -> Result<()> {
        let mut events = self.subscribe(&["Page.lifecycleEvent"]).await;
        let nav = self.send("Page.navigate", json!({ "url": url })).await?;

        if let Some(err) = nav.get("errorText").and_then(|v| v.as_str()) {
            if !err.is_empty() {
                return Err(Error::Tool(format!("page.goto: {} at {}", err, url)));
            }
        }
        // Same-document navigations have no loader and fire no lifecycle events.
        let Some(loader_id) = nav.get("loaderId").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let frame_id = nav.get("frameId").and_then(|v| v.as_str()).unwrap_or_default();
        let wanted = wait_until.lifecycle_name();

        let wait = async {
            while let Some(event) = events.recv().await {
                let p = &event.params;
                if p.get("name").and_then(|v| v.as_str()) == Some(wanted)
                    && p.get("loaderId").and_then(|v| v.as_str()) == Some(loader_id)
                    && p.get("frameId").and_then(|v| v.as_str()) == Some(frame_id)
                {
                    return Ok(());
                }
            }
            Err(Error::Transport("Page closed during navigation".into()))
        };
        match tokio::time::timeout(Duration::from_millis(NAVIGATION_TIMEOUT_MS), wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(NAVIGATION_TIMEOUT_MS, format!("navigating to {}", url))),
        }
    }

    /// First element matching `selector`, as a remote object id.
    pub async fn query(&self, selector: &str) -> Result<Option<String>> {
        let result = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": query_expression(selector),
                    "returnByValue": false,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result
            .pointer("/result/objectId")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Call `function_declaration` with `this` bound to the remote object.
    pub async fn call_on(&self, object_id: &str, function_declaration: &str, args: &[Value]) -> Result<Value> {
        let arguments: Vec<Value> = args.iter().map(|a| json!({ "value": a })).collect();
        let result = self
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function_declaration,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Poll until `selector` reaches `state`. Returns the element when one is present.
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout_ms: u64,
    ) -> Result<Option<String>> {
        let started = Instant::now();
        loop {
            let element = self.query(selector).await?;
            let visible = match &element {
                Some(id) => self.call_on(id, VISIBLE_JS, &[]).await?.as_bool().unwrap_or(false),
                None => false,
            };
            if state.satisfied(element.is_some(), visible) {
                return Ok(element);
            }
            if started.elapsed() >= Duration::from_millis(timeout_ms) {
                return Err(Error::timeout(
                    timeout_ms,
                    format!("waiting for {} to be {}", selector, state),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn actionable(&self, selector: &str, force: bool) -> Result<String> {
        let state = if force {
            ElementState::Attached
        } else {
            ElementState::Visible
        };
        self.wait_for_selector(selector, state, self.default_timeout_ms)
            .await?
            .ok_or_else(|| Error::Tool(format!("Element not found: {}", selector)))
    }

    pub async fn click(&self, selector: &str, double: bool, force: bool) -> Result<()> {
        let element = self.actionable(selector, force).await?;
        let point = self.call_on(&element, CLICK_POINT_JS, &[]).await?;
        let (x, y) = (
            point["x"].as_f64().unwrap_or(0.0),
            point["y"].as_f64().unwrap_or(0.0),
        );
        let has_box = point["w"].as_f64().unwrap_or(0.0) > 0.0 && point["h"].as_f64().unwrap_or(0.0) > 0.0;

        if !has_box {
            // Forced clicks on zero-size elements go through the DOM.
            let script = if double {
                "function() { this.click(); this.click(); this.dispatchEvent(new MouseEvent('dblclick', {bubbles: true})); }"
            } else {
                "function() { this.click(); }"
            };
            self.call_on(&element, script, &[]).await?;
            return Ok(());
        }

        self.mouse_event("mouseMoved", x, y, 0).await?;
        let clicks = if double { 2 } else { 1 };
        for count in 1..=clicks {
            self.mouse_event("mousePressed", x, y, count).await?;
            self.mouse_event("mouseReleased", x, y, count).await?;
        }
        Ok(())
    }

    async fn mouse_event(&self, event_type: &str, x: f64, y: f64, click_count: i32) -> Result<()> {
        let mut params = json!({ "type": event_type, "x": x, "y": y });
        if event_type != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(click_count);
        }
        self.send("Input.dispatchMouseEvent", params).await?;
        Ok(())
    }

    pub async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.actionable(selector, false).await?;
        let mode = self.call_on(&element, FILL_JS, &[json!(value)]).await?;
        if mode.as_str() == Some("type") && !value.is_empty() {
            self.send("Input.insertText", json!({ "text": value })).await?;
        }
        self.call_on(&element, CHANGE_JS, &[]).await?;
        Ok(())
    }

    /// Select one option and return the values now selected.
    pub async fn select_option(&self, selector: &str, by: SelectBy, value: &str) -> Result<Vec<String>> {
        let element = self.actionable(selector, false).await?;
        let selected = self
            .call_on(&element, SELECT_JS, &[json!(by.as_str()), json!(value)])
            .await?;
        Ok(selected
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    /// `textContent` of the first match, `None` if nothing matches.
    pub async fn text_content(&self, selector: &str) -> Result<Option<String>> {
        match self.query(selector).await? {
            Some(id) => {
                let text = self.call_on(&id, "function() { return this.textContent; }", &[]).await?;
                Ok(Some(text.as_str().unwrap_or_default().to_string()))
            }
            None => Ok(None),
        }
    }

    /// `textContent` of every match, in document order.
    pub async fn text_contents(&self, selector: &str) -> Result<Vec<String>> {
        let expr = format!("{}.map(el => el.textContent || '')", query_all_expression(selector));
        let texts = self.evaluate(&expr).await?;
        Ok(texts
            .as_array()
            .map(|arr| arr.iter().map(|v| v.as_str().unwrap_or_default().to_string()).collect())
            .unwrap_or_default())
    }

    pub async fn html(&self, selector: &str, outer: bool) -> Result<Option<String>> {
        let Some(id) = self.query(selector).await? else {
            return Ok(None);
        };
        let script = if outer {
            "function() { return this.outerHTML; }"
        } else {
            "function() { return this.innerHTML; }"
        };
        let html = self.call_on(&id, script, &[]).await?;
        Ok(Some(html.as_str().unwrap_or_default().to_string()))
    }

    pub async fn any_visible(&self, css: &str) -> Result<bool> {
        let expr = format!(
            "Array.from(document.querySelectorAll({})).some(el => ({}).call(el))",
            crate::selector::js_string(css),
            VISIBLE_JS
        );
        Ok(self.evaluate(&expr).await?.as_bool().unwrap_or(false))
    }

    pub async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        let mut params = json!({ "format": options.format.as_str() });

        if let Some(selector) = options.selector.as_deref() {
            let element = self
                .query(selector)
                .await?
                .ok_or_else(|| Error::Tool(format!("Element not found: {}", selector)))?;
            let rect = self.call_on(&element, ELEMENT_RECT_JS, &[]).await?;
            params["clip"] = json!({
                "x": rect["x"].as_f64().unwrap_or(0.0),
                "y": rect["y"].as_f64().unwrap_or(0.0),
                "width": rect["width"].as_f64().unwrap_or(0.0).max(1.0),
                "height": rect["height"].as_f64().unwrap_or(0.0).max(1.0),
                "scale": 1,
            });
            params["captureBeyondViewport"] = json!(true);
        } else if options.full_page {
            let metrics = self.send("Page.getLayoutMetrics", json!({})).await?;
            let size = metrics
                .get("cssContentSize")
                .or_else(|| metrics.get("contentSize"))
                .cloned()
                .unwrap_or(Value::Null);
            params["clip"] = json!({
                "x": 0,
                "y": 0,
                "width": size["width"].as_f64().unwrap_or(1280.0),
                "height": size["height"].as_f64().unwrap_or(720.0),
                "scale": 1,
            });
            params["captureBeyondViewport"] = json!(true);
        }

        let result = self.send("Page.captureScreenshot", params).await?;
        decode_data(&result, "screenshot")
    }

    pub async fn pdf(&self, options: &PdfOptions) -> Result<Vec<u8>> {
        let (width, height) = options.format.size_inches();
        let result = self
            .send(
                "Page.printToPDF",
                json!({
                    "printBackground": true,
                    "landscape": options.landscape,
                    "paperWidth": width,
                    "paperHeight": height,
                }),
            )
            .await;
        match result {
            Ok(value) => decode_data(&value, "PDF"),
            Err(e) if e.to_string().contains("PrintToPDF") => {
                Err(Error::Tool("PDF export requires headless mode".into()))
            }
            Err(e) => Err(e),
        }
    }

    /// Accessibility outline of the subtree rooted at `selector`.
    pub async fn aria_snapshot(&self, selector: &str) -> Result<String> {
        let element = self
            .wait_for_selector(selector, ElementState::Attached, self.default_timeout_ms)
            .await?
            .ok_or_else(|| Error::Tool(format!("Element not found: {}", selector)))?;
        let described = self
            .send("DOM.describeNode", json!({ "objectId": element }))
            .await?;
        let backend_id = described
            .pointer("/node/backendNodeId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::Cdp("describeNode returned no backendNodeId".into()))?;

        let tree = self.send("Accessibility.getFullAXTree", json!({})).await?;
        let root = parse_ax_tree(&tree, Some(backend_id)).ok_or_else(|| {
            Error::Tool(format!("Element is not in the accessibility tree: {}", selector))
        })?;
        Ok(render_tree(&root))
    }
}

fn check_exception(result: &Value) -> Result<()> {
    let Some(details) = result.get("exceptionDetails") else {
        return Ok(());
    };
    let message = details
        .pointer("/exception/description")
        .and_then(|v| v.as_str())
        .or_else(|| details.get("text").and_then(|v| v.as_str()))
        .unwrap_or("Evaluation failed");
    // Keep the first line; the rest is a JS stack trace.
    let first = message.lines().next().unwrap_or(message);
    Err(Error::Tool(first.trim_start_matches("Error: ").to_string()))
}

fn decode_data(result: &Value, what: &str) -> Result<Vec<u8>> {
    let data = result
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Cdp(format!("No {} data returned", what)))?;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::Cdp(format!("base64 decode: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_state_semantics() {
        use ElementState::*;
        assert!(Visible.satisfied(true, true));
        assert!(!Visible.satisfied(true, false));
        assert!(Hidden.satisfied(false, false));
        assert!(Hidden.satisfied(true, false));
        assert!(!Hidden.satisfied(true, true));
        assert!(Attached.satisfied(true, false));
        assert!(Detached.satisfied(false, false));
        assert!(!Detached.satisfied(true, false));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(WaitUntil::parse("networkidle"), Some(WaitUntil::NetworkIdle));
        assert_eq!(WaitUntil::parse("idle"), None);
        assert_eq!(WaitUntil::DomContentLoaded.lifecycle_name(), "DOMContentLoaded");
        assert_eq!(SelectBy::parse("label"), Some(SelectBy::Label));
        assert_eq!(ImageFormat::parse("jpeg").map(|f| f.extension()), Some("jpg"));
        assert_eq!(PaperFormat::parse("a4"), None);
        assert_eq!(PaperFormat::Letter.size_inches(), (8.5, 11.0));
    }

    #[test]
    fn test_exception_message_first_line() {
        let result = json!({
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "Error: No option matching value \"x\"\n    at <anonymous>:1:2" }
            }
        });
        let err = check_exception(&result).unwrap_err();
        assert_eq!(err.to_string(), "No option matching value \"x\"");
        assert!(check_exception(&json!({"result": {}})).is_ok());
    }

    #[test]
    fn test_decode_data() {
        let bytes = decode_data(&json!({"data": "aGVsbG8="}), "PDF").unwrap();
        assert_eq!(bytes, b"hello");
        assert!(decode_data(&json!({}), "PDF").is_err());
    }
}
