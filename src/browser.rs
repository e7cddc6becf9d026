use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use fantoccini::error::{CmdError, ErrorStatus, NewSessionError};
use serde_json::{Map, Value};
use thiserror::Error;

/// W3C WebDriver key code for Enter.
pub const ENTER: &str = "\u{E007}";

pub(crate) const LOCAL_STORAGE_DUMP: &str = "return Object.assign({}, window.localStorage);";
pub(crate) const LOCAL_STORAGE_SET: &str = "window.localStorage.setItem(arguments[0], arguments[1]);";

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("no element matches {0}")]
    NoSuchElement(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("webdriver error '{error}': {message}")]
    Protocol { error: String, message: String },
    #[error("unexpected webdriver response: {0}")]
    InvalidResponse(String),
    #[error("webdriver command failed: {0}")]
    Command(#[from] CmdError),
    #[error("could not start a webdriver session: {0}")]
    NewSession(#[from] NewSessionError),
    #[error("could not start the webdriver runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl BrowserError {
    /// Element went away between lookup and use; polling loops treat it as
    /// "not there yet".
    pub fn is_stale(&self) -> bool {
        match self {
            BrowserError::Protocol { error, .. } => error == "stale element reference",
            BrowserError::Command(CmdError::Standard(wd)) => matches!(wd.error, ErrorStatus::StaleElementReference),
            _ => false,
        }
    }
}

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value")]
pub enum Locator {
    #[serde(rename = "css")]
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Locator::XPath(path.into())
    }

    /// Location strategy name as WebDriver spells it.
    pub fn strategy(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css selector",
            Locator::XPath(_) => "xpath",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::Css(v) | Locator::XPath(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(v) => write!(f, "css `{}`", v),
            Locator::XPath(v) => write!(f, "xpath `{}`", v),
        }
    }
}

/// Opaque handle to an element inside one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        ElementRef(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Element(ElementRef),
    Value(Value),
}

impl From<&ElementRef> for ScriptArg {
    fn from(element: &ElementRef) -> Self {
        ScriptArg::Element(element.clone())
    }
}

impl From<&str> for ScriptArg {
    fn from(text: &str) -> Self {
        ScriptArg::Value(Value::String(text.to_string()))
    }
}

impl From<Value> for ScriptArg {
    fn from(value: Value) -> Self {
        ScriptArg::Value(value)
    }
}

/// A live browser the automation flows drive.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    fn find_elements(&mut self, locator: &Locator) -> Result<Vec<ElementRef>, BrowserError>;

    fn find_element(&mut self, locator: &Locator) -> Result<ElementRef, BrowserError> {
        self.find_elements(locator)?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::NoSuchElement(locator.to_string()))
    }

    /// Looks up an element inside `parent` only.
    fn find_child(&mut self, parent: &ElementRef, locator: &Locator) -> Result<ElementRef, BrowserError>;

    fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError>;

    fn clear(&mut self, element: &ElementRef) -> Result<(), BrowserError>;

    fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<(), BrowserError>;

    fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError>;

    /// Displayed and enabled.
    fn is_clickable(&mut self, element: &ElementRef) -> Result<bool, BrowserError>;

    fn execute_script(&mut self, script: &str, args: &[ScriptArg]) -> Result<Value, BrowserError>;

    /// PNG bytes of the current viewport.
    fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    fn cookies(&mut self) -> Result<Vec<Value>, BrowserError>;

    fn add_cookie(&mut self, cookie: Value) -> Result<(), BrowserError>;

    fn local_storage(&mut self) -> Result<Map<String, Value>, BrowserError> {
        match self.execute_script(LOCAL_STORAGE_DUMP, &[])? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(BrowserError::InvalidResponse(format!(
                "expected an object from localStorage, got {}",
                other
            ))),
        }
    }

    fn set_local_storage_item(&mut self, key: &str, value: &str) -> Result<(), BrowserError> {
        self.execute_script(LOCAL_STORAGE_SET, &[ScriptArg::from(key), ScriptArg::from(value)])?;
        Ok(())
    }
}

/// Hands out sessions and takes them back. Every acquired session is
/// released explicitly; nothing is cleaned up behind the caller's back.
pub trait SessionFactory {
    type Session: BrowserSession;

    fn acquire(&mut self) -> Result<Self::Session, BrowserError>;

    fn release(&mut self, session: Self::Session) -> Result<(), BrowserError>;
}

/// Runs `work` against a freshly acquired session and releases it
/// afterwards whatever the outcome.
pub fn with_session<F, T, E, W>(factory: &mut F, work: W) -> Result<T, E>
where
    F: SessionFactory,
    E: From<BrowserError>,
    W: FnOnce(&mut F::Session) -> Result<T, E>,
{
    let mut session = factory.acquire()?;
    let outcome = work(&mut session);
    if let Err(e) = factory.release(session) {
        warn!("Failed to release browser session: {}", e);
    }
    outcome
}

/// Blocking wait for a page condition, polled until a timeout.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    timeout: Duration,
    poll: Duration,
}

impl Wait {
    pub fn new(timeout: Duration) -> Self {
        Wait {
            timeout,
            poll: Duration::from_millis(500),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn until_present<S>(&self, session: &mut S, locator: &Locator) -> Result<ElementRef, BrowserError>
    where
        S: BrowserSession + ?Sized,
    {
        self.until(session, &format!("{} to be present", locator), |s| {
            Ok(s.find_elements(locator)?.into_iter().next())
        })
    }

    pub fn until_clickable<S>(&self, session: &mut S, locator: &Locator) -> Result<ElementRef, BrowserError>
    where
        S: BrowserSession + ?Sized,
    {
        self.until(session, &format!("{} to be clickable", locator), |s| {
            let Some(element) = s.find_elements(locator)?.into_iter().next() else {
                return Ok(None);
            };
            Ok(s.is_clickable(&element)?.then_some(element))
        })
    }

    fn until<S, T, F>(&self, session: &mut S, what: &str, mut check: F) -> Result<T, BrowserError>
    where
        S: BrowserSession + ?Sized,
        F: FnMut(&mut S) -> Result<Option<T>, BrowserError>,
    {
        // A timeout too large to represent means waiting indefinitely.
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            match check(session) {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => {}
                Err(e) if e.is_stale() => debug!("Stale element while waiting for {}", what),
                Err(e) => return Err(e),
            }

            let Some(deadline) = deadline else {
                thread::sleep(self.poll);
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Err(BrowserError::Timeout {
                    what: what.to_string(),
                    after: self.timeout,
                });
            }
            thread::sleep(self.poll.min(deadline - now));
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory browser for flow tests.

    use super::*;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    pub struct FakeSession {
        pub log: Vec<String>,
        pub cookies: Vec<Value>,
        pub storage: Map<String, Value>,
        pub screenshot: Vec<u8>,
        elements: HashMap<String, Vec<ElementRef>>,
        children: HashMap<(String, String), ElementRef>,
        texts: HashMap<String, String>,
        hidden: HashSet<String>,
        failing_clicks: HashSet<String>,
        appear_after: HashMap<String, usize>,
        lookups: HashMap<String, usize>,
    }

    impl FakeSession {
        pub fn new() -> Self {
            FakeSession::default()
        }

        pub fn with_element(mut self, locator: &str, id: &str) -> Self {
            self.elements.entry(locator.to_string()).or_default().push(ElementRef::new(id));
            self
        }

        pub fn with_child(mut self, parent: &str, locator: &str, id: &str) -> Self {
            self.children.insert((parent.to_string(), locator.to_string()), ElementRef::new(id));
            self
        }

        pub fn with_text(mut self, id: &str, text: &str) -> Self {
            self.texts.insert(id.to_string(), text.to_string());
            self
        }

        pub fn hidden(mut self, id: &str) -> Self {
            self.hidden.insert(id.to_string());
            self
        }

        pub fn failing_click(mut self, id: &str) -> Self {
            self.failing_clicks.insert(id.to_string());
            self
        }

        /// Element lookups for `locator` come back empty this many times first.
        pub fn appearing_after(mut self, locator: &str, lookups: usize) -> Self {
            self.appear_after.insert(locator.to_string(), lookups);
            self
        }

        pub fn entries(&self, prefix: &str) -> Vec<String> {
            self.log.iter().filter(|l| l.starts_with(prefix)).cloned().collect()
        }
    }

    impl BrowserSession for FakeSession {
        fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
            self.log.push(format!("navigate {}", url));
            Ok(())
        }

        fn find_elements(&mut self, locator: &Locator) -> Result<Vec<ElementRef>, BrowserError> {
            let key = locator.value().to_string();
            let seen = self.lookups.entry(key.clone()).or_insert(0);
            *seen += 1;
            if self.appear_after.get(&key).is_some_and(|n| *seen <= *n) {
                return Ok(Vec::new());
            }
            Ok(self.elements.get(&key).cloned().unwrap_or_default())
        }

        fn find_child(&mut self, parent: &ElementRef, locator: &Locator) -> Result<ElementRef, BrowserError> {
            self.children
                .get(&(parent.id().to_string(), locator.value().to_string()))
                .cloned()
                .ok_or_else(|| BrowserError::NoSuchElement(locator.to_string()))
        }

        fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
            if self.failing_clicks.contains(element.id()) {
                return Err(BrowserError::Protocol {
                    error: "element click intercepted".into(),
                    message: element.id().to_string(),
                });
            }
            self.log.push(format!("click {}", element.id()));
            Ok(())
        }

        fn clear(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
            self.log.push(format!("clear {}", element.id()));
            Ok(())
        }

        fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<(), BrowserError> {
            self.log.push(format!("keys {} {}", element.id(), text));
            Ok(())
        }

        fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError> {
            Ok(self.texts.get(element.id()).cloned().unwrap_or_default())
        }

        fn is_clickable(&mut self, element: &ElementRef) -> Result<bool, BrowserError> {
            Ok(!self.hidden.contains(element.id()))
        }

        fn execute_script(&mut self, script: &str, args: &[ScriptArg]) -> Result<Value, BrowserError> {
            self.log.push(format!("script {}", script));
            if script == LOCAL_STORAGE_DUMP {
                return Ok(Value::Object(self.storage.clone()));
            }
            if script == LOCAL_STORAGE_SET {
                if let [ScriptArg::Value(Value::String(k)), ScriptArg::Value(v)] = args {
                    self.storage.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Null)
        }

        fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
            self.log.push("screenshot".to_string());
            Ok(self.screenshot.clone())
        }

        fn cookies(&mut self) -> Result<Vec<Value>, BrowserError> {
            Ok(self.cookies.clone())
        }

        fn add_cookie(&mut self, cookie: Value) -> Result<(), BrowserError> {
            if cookie.get("name").is_none() {
                return Err(BrowserError::Protocol {
                    error: "invalid argument".into(),
                    message: "cookie without a name".into(),
                });
            }
            self.cookies.push(cookie);
            Ok(())
        }
    }

    /// Hands out clones of one scripted session and counts the handoffs.
    pub struct FakeFactory {
        pub template: FakeSession,
        pub acquired: usize,
        pub released: usize,
        pub sessions: Vec<FakeSession>,
    }

    impl FakeFactory {
        pub fn new(template: FakeSession) -> Self {
            FakeFactory { template, acquired: 0, released: 0, sessions: Vec::new() }
        }
    }

    impl SessionFactory for FakeFactory {
        type Session = FakeSession;

        fn acquire(&mut self) -> Result<FakeSession, BrowserError> {
            self.acquired += 1;
            Ok(FakeSession {
                log: Vec::new(),
                cookies: self.template.cookies.clone(),
                storage: self.template.storage.clone(),
                screenshot: self.template.screenshot.clone(),
                elements: self.template.elements.clone(),
                children: self.template.children.clone(),
                texts: self.template.texts.clone(),
                hidden: self.template.hidden.clone(),
                failing_clicks: self.template.failing_clicks.clone(),
                appear_after: self.template.appear_after.clone(),
                lookups: HashMap::new(),
            })
        }

        fn release(&mut self, session: FakeSession) -> Result<(), BrowserError> {
            self.released += 1;
            self.sessions.push(session);
            Ok(())
        }
    }
}
