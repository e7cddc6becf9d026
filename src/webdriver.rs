use std::collections::HashMap;
use chrono::{DateTime, Utc};
use fantoccini::cookies::Cookie;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder};
use log::{info, warn};
use serde_json::{json, Map, Value};
use tokio::runtime::{Builder, Runtime};

use crate::browser::{BrowserError, BrowserSession, ElementRef, Locator, ScriptArg, SessionFactory};
use crate::config::{BrowserConfig, PolicySettings};

/// One browser driven over WebDriver (chromedriver and friends). The flows
/// are synchronous, so each session owns a small runtime and blocks on
/// every command. Acquire with [`WebDriverSession::start`], give back with
/// [`WebDriverSession::release`].
pub struct WebDriverSession {
    runtime: Runtime,
    client: Option<Client>,
    elements: HashMap<String, Element>,
    next_element: u64,
}

impl WebDriverSession {
    pub fn start(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let caps = match capabilities(config) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let client = runtime.block_on(ClientBuilder::native().capabilities(caps).connect(&config.webdriver_url))?;

        info!("ChromeDriver session at {} initialized successfully.", config.webdriver_url);
        Ok(WebDriverSession {
            runtime,
            client: Some(client),
            elements: HashMap::new(),
            next_element: 0,
        })
    }

    /// Ends the browser session on the driver.
    pub fn release(mut self) -> Result<(), BrowserError> {
        self.close()
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        self.elements.clear();
        if let Some(client) = self.client.take() {
            self.runtime.block_on(client.close())?;
            info!("Browser session closed.");
        }
        Ok(())
    }

    fn client(&self) -> Result<&Client, BrowserError> {
        self.client
            .as_ref()
            .ok_or_else(|| BrowserError::InvalidResponse("session already released".to_string()))
    }

    fn element(&self, element: &ElementRef) -> Result<&Element, BrowserError> {
        self.elements
            .get(element.id())
            .ok_or_else(|| BrowserError::NoSuchElement(format!("element handle {}", element.id())))
    }

    fn register(&mut self, element: Element) -> ElementRef {
        self.next_element += 1;
        let id = format!("e{}", self.next_element);
        self.elements.insert(id.clone(), element);
        ElementRef::new(id)
    }

    fn lookup_error(err: fantoccini::error::CmdError, locator: &Locator) -> BrowserError {
        if err.is_no_such_element() {
            BrowserError::NoSuchElement(locator.to_string())
        } else {
            BrowserError::Command(err)
        }
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.client.is_some() {
            warn!("Browser session dropped without release; closing it now.");
            if let Err(e) = self.close() {
                warn!("Failed to close browser session: {}", e);
            }
        }
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.runtime.block_on(self.client()?.goto(url))?;
        // Handles from the previous page are dead now.
        self.elements.clear();
        info!("Navigated to {}", url);
        Ok(())
    }

    fn find_elements(&mut self, locator: &Locator) -> Result<Vec<ElementRef>, BrowserError> {
        let found = self.runtime.block_on(self.client()?.find_all(wd_locator(locator)))?;
        Ok(found.into_iter().map(|e| self.register(e)).collect())
    }

    fn find_element(&mut self, locator: &Locator) -> Result<ElementRef, BrowserError> {
        let found = self
            .runtime
            .block_on(self.client()?.find(wd_locator(locator)))
            .map_err(|e| Self::lookup_error(e, locator))?;
        Ok(self.register(found))
    }

    fn find_child(&mut self, parent: &ElementRef, locator: &Locator) -> Result<ElementRef, BrowserError> {
        let found = self
            .runtime
            .block_on(self.element(parent)?.find(wd_locator(locator)))
            .map_err(|e| Self::lookup_error(e, locator))?;
        Ok(self.register(found))
    }

    fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.runtime.block_on(self.element(element)?.click())?;
        Ok(())
    }

    fn clear(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.runtime.block_on(self.element(element)?.clear())?;
        Ok(())
    }

    fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<(), BrowserError> {
        self.runtime.block_on(self.element(element)?.send_keys(text))?;
        Ok(())
    }

    fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError> {
        Ok(self.runtime.block_on(self.element(element)?.text())?)
    }

    fn is_clickable(&mut self, element: &ElementRef) -> Result<bool, BrowserError> {
        let handle = self.element(element)?;
        if !self.runtime.block_on(handle.is_displayed())? {
            return Ok(false);
        }
        Ok(self.runtime.block_on(handle.is_enabled())?)
    }

    fn execute_script(&mut self, script: &str, args: &[ScriptArg]) -> Result<Value, BrowserError> {
        let mut wire = Vec::with_capacity(args.len());
        for arg in args {
            wire.push(match arg {
                ScriptArg::Element(element) => serde_json::to_value(self.element(element)?)
                    .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?,
                ScriptArg::Value(value) => value.clone(),
            });
        }
        Ok(self.runtime.block_on(self.client()?.execute(script, wire))?)
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        Ok(self.runtime.block_on(self.client()?.screenshot())?)
    }

    fn cookies(&mut self) -> Result<Vec<Value>, BrowserError> {
        let cookies = self.runtime.block_on(self.client()?.get_all_cookies())?;
        Ok(cookies.iter().map(cookie_to_value).collect())
    }

    fn add_cookie(&mut self, cookie: Value) -> Result<(), BrowserError> {
        let cookie = cookie_from_value(&cookie)?;
        self.runtime.block_on(self.client()?.add_cookie(cookie))?;
        Ok(())
    }
}

/// Starts a WebDriver session per acquire, retrying driver start-up under
/// the configured policy.
pub struct WebDriverFactory {
    browser: BrowserConfig,
    start_policy: PolicySettings,
}

impl WebDriverFactory {
    pub fn new(browser: BrowserConfig, start_policy: PolicySettings) -> Self {
        WebDriverFactory { browser, start_policy }
    }
}

impl SessionFactory for WebDriverFactory {
    type Session = WebDriverSession;

    fn acquire(&mut self) -> Result<WebDriverSession, BrowserError> {
        let policy = self
            .start_policy
            .policy::<BrowserError>("driver start")
            .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;
        policy.run(|| WebDriverSession::start(&self.browser))
    }

    fn release(&mut self, session: WebDriverSession) -> Result<(), BrowserError> {
        session.release()
    }
}

/// Chrome capabilities for the configured profile.
pub fn capabilities(config: &BrowserConfig) -> Value {
    let mut args = config.args.clone();
    if let Some(dir) = &config.user_data_dir {
        args.push(format!("--user-data-dir={}", dir.display()));
        if let Some(profile) = &config.profile_directory {
            args.push(format!("--profile-directory={}", profile));
        }
    }
    if config.headless {
        args.push("--headless=new".to_string());
    }
    json!({
        "browserName": "chrome",
        "goog:chromeOptions": { "args": args }
    })
}

fn wd_locator(locator: &Locator) -> fantoccini::Locator<'_> {
    match locator {
        Locator::Css(selector) => fantoccini::Locator::Css(selector),
        Locator::XPath(path) => fantoccini::Locator::XPath(path),
    }
}

/// Cookie in the JSON shape browsers export (`name`, `value`, `domain`,
/// `path`, `secure`, `httpOnly`, `expiry`, `sameSite`).
pub fn cookie_to_value(cookie: &Cookie<'_>) -> Value {
    let mut map = Map::new();
    map.insert("name".into(), json!(cookie.name()));
    map.insert("value".into(), json!(cookie.value()));
    if let Some(domain) = cookie.domain() {
        map.insert("domain".into(), json!(domain));
    }
    if let Some(path) = cookie.path() {
        map.insert("path".into(), json!(path));
    }
    map.insert("secure".into(), json!(cookie.secure().unwrap_or(false)));
    map.insert("httpOnly".into(), json!(cookie.http_only().unwrap_or(false)));
    if let Some(expires) = cookie.expires_datetime() {
        map.insert("expiry".into(), json!(expires.unix_timestamp()));
    }
    if let Some(same_site) = cookie.same_site() {
        map.insert("sameSite".into(), json!(same_site.to_string()));
    }
    Value::Object(map)
}

/// Inverse of [`cookie_to_value`]. Only `name` is required.
pub fn cookie_from_value(value: &Value) -> Result<Cookie<'static>, BrowserError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| BrowserError::InvalidResponse(format!("cookie without a name: {}", value)))?;
    let mut header = format!("{}={}", name, value.get("value").and_then(Value::as_str).unwrap_or_default());

    if let Some(domain) = value.get("domain").and_then(Value::as_str) {
        header.push_str(&format!("; Domain={}", domain));
    }
    if let Some(path) = value.get("path").and_then(Value::as_str) {
        header.push_str(&format!("; Path={}", path));
    }
    if value.get("secure").and_then(Value::as_bool).unwrap_or(false) {
        header.push_str("; Secure");
    }
    if value.get("httpOnly").and_then(Value::as_bool).unwrap_or(false) {
        header.push_str("; HttpOnly");
    }
    if let Some(same_site) = value.get("sameSite").and_then(Value::as_str) {
        header.push_str(&format!("; SameSite={}", same_site));
    }
    if let Some(expires) = value
        .get("expiry")
        .and_then(Value::as_f64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0))
    {
        header.push_str(&format!("; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT")));
    }

    Cookie::parse(header).map_err(|e| BrowserError::InvalidResponse(format!("bad cookie '{}': {}", name, e)))
}
