use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::browser::Locator;
use crate::retry::{AttemptPolicy, PolicyError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no selector named '{0}' in the selector table")]
    UnknownSelector(String),
    #[error("invalid url in {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub user_data_dir: Option<PathBuf>,
    pub profile_directory: Option<String>,
    pub args: Vec<String>,
    pub headless: bool,
    pub request_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            webdriver_url: "http://localhost:9515".to_string(),
            user_data_dir: None,
            profile_directory: Some("Profile 13".to_string()),
            args: vec![
                "--start-maximized".to_string(),
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-extensions".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                "--ignore-certificate-errors".to_string(),
                "--ignore-ssl-errors".to_string(),
            ],
            headless: false,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub url: String,
    pub message: String,
    pub response_file: PathBuf,
    pub capture_image: bool,
    pub image_search_url: String,
    /// Unset means `<sanitized title>.png` next to the response file.
    pub screenshot_file: Option<PathBuf>,
    pub zoom: String,
    pub input_timeout_secs: u64,
    pub pre_send_pause_secs: u64,
    pub response_settle_secs: u64,
    pub image_search_timeout_secs: u64,
    pub scroll_pause_secs: u64,
}

impl ChatConfig {
    pub fn input_timeout(&self) -> Duration { secs(self.input_timeout_secs) }
    pub fn pre_send_pause(&self) -> Duration { secs(self.pre_send_pause_secs) }
    pub fn response_settle(&self) -> Duration { secs(self.response_settle_secs) }
    pub fn image_search_timeout(&self) -> Duration { secs(self.image_search_timeout_secs) }
    pub fn scroll_pause(&self) -> Duration { secs(self.scroll_pause_secs) }
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            url: "https://chatgpt.com/".to_string(),
            message: "this time give me other news, can you compare you ensure and don't give me same news, \
                      cryptocurrency news for blog posting. give me only one news. without your talk. \
                      summarize. add emoji"
                .to_string(),
            response_file: PathBuf::from("chatgpt_response.txt"),
            capture_image: true,
            image_search_url: "https://images.google.com/".to_string(),
            screenshot_file: Some(PathBuf::from("Unlimited.png")),
            zoom: "300%".to_string(),
            input_timeout_secs: 60,
            pre_send_pause_secs: 5,
            response_settle_secs: 10,
            image_search_timeout_secs: 20,
            scroll_pause_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquareConfig {
    pub login_url: String,
    pub profile_url: String,
    pub post_text_file: PathBuf,
    pub image_path: Option<PathBuf>,
    /// `{stem}` is replaced by the uploaded file's stem.
    pub uploaded_image_xpath: String,
    pub manual_login_wait_secs: u64,
    pub element_timeout_secs: u64,
    pub after_upload_pause_secs: u64,
    pub click_pause_min_secs: u64,
    pub click_pause_max_secs: u64,
    pub before_post_pause_secs: u64,
    pub after_post_pause_secs: u64,
    /// Selector names clicked in order before posting.
    pub click_sequence: Vec<String>,
}

impl SquareConfig {
    pub fn manual_login_wait(&self) -> Duration { secs(self.manual_login_wait_secs) }
    pub fn element_timeout(&self) -> Duration { secs(self.element_timeout_secs) }
    pub fn after_upload_pause(&self) -> Duration { secs(self.after_upload_pause_secs) }
    pub fn before_post_pause(&self) -> Duration { secs(self.before_post_pause_secs) }
    pub fn after_post_pause(&self) -> Duration { secs(self.after_post_pause_secs) }
}

impl Default for SquareConfig {
    fn default() -> Self {
        SquareConfig {
            login_url: "https://www.binance.com/en/login".to_string(),
            profile_url: "https://www.binance.com/en/square".to_string(),
            post_text_file: PathBuf::from("chatgpt_response.txt"),
            image_path: Some(PathBuf::from("Unlimited.png")),
            uploaded_image_xpath: "//img[contains(@src, '{stem}')]".to_string(),
            manual_login_wait_secs: 5,
            element_timeout_secs: 30,
            after_upload_pause_secs: 5,
            click_pause_min_secs: 2,
            click_pause_max_secs: 4,
            before_post_pause_secs: 5,
            after_post_pause_secs: 1,
            click_sequence: [
                "square_editor_tool",
                "square_tool_option",
                "square_editor_tool",
                "square_tool_option",
                "square_more_icon",
                "square_more_first_option",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookies_file: PathBuf,
    pub local_storage_file: PathBuf,
    /// Page opened before replaying an artifact; cookies only apply to the
    /// current domain.
    pub origin_url: String,
    pub capture_wait_secs: u64,
}

impl SessionConfig {
    pub fn capture_wait(&self) -> Duration { secs(self.capture_wait_secs) }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            cookies_file: PathBuf::from("cookies.json"),
            local_storage_file: PathBuf::from("local_storage.json"),
            origin_url: "https://www.binance.com/en".to_string(),
            capture_wait_secs: 60,
        }
    }
}

/// Missing fields fall back to three attempts five seconds apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        PolicySettings { max_attempts: 3, delay_secs: 5 }
    }
}

impl PolicySettings {
    pub fn policy<E>(&self, label: &str) -> Result<AttemptPolicy<E>, PolicyError> {
        AttemptPolicy::new(label, self.max_attempts, secs(self.delay_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub driver_start: PolicySettings,
    pub chat: PolicySettings,
    pub post: PolicySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            driver_start: PolicySettings { max_attempts: 3, delay_secs: 5 },
            chat: PolicySettings { max_attempts: 5, delay_secs: 10 },
            post: PolicySettings { max_attempts: 3, delay_secs: 5 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: Option<PathBuf>,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            file: Some(PathBuf::from("automation.log")),
            level: "info".to_string(),
        }
    }
}

/// Logical element name to locator. Upstream markup changes are fixed here
/// and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorTable(BTreeMap<String, Locator>);

impl SelectorTable {
    pub fn empty() -> Self {
        SelectorTable(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Result<&Locator, ConfigError> {
        self.0.get(name).ok_or_else(|| ConfigError::UnknownSelector(name.to_string()))
    }

    pub fn insert(&mut self, name: impl Into<String>, locator: Locator) {
        self.0.insert(name.into(), locator);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries from `overrides` replace same-named ones.
    pub fn merge(&mut self, overrides: SelectorTable) {
        self.0.extend(overrides.0);
    }
}

impl Default for SelectorTable {
    fn default() -> Self {
        let mut table = SelectorTable::empty();
        table.insert("chat_input", Locator::css("div[contenteditable='true']"));
        table.insert("chat_response", Locator::css("div.markdown.prose"));
        table.insert("image_search_input", Locator::css("[name='q']"));
        table.insert("image_search_results", Locator::css("div#search"));
        table.insert(
            "square_editor",
            Locator::xpath("//p[contains(@class, 'selected') and @data-placeholder='Share your thoughts']"),
        );
        table.insert("square_upload_container", Locator::xpath("//*[@id=\"shortPostEditorImageUploaderBox\"]"));
        table.insert("square_file_input", Locator::xpath(".//input[@type=\"file\"]"));
        table.insert("square_file_input_fallback", Locator::css("input[type=\"file\"]"));
        table.insert(
            "square_editor_tool",
            Locator::xpath(
                "//*[@id=\"feed-home-tabs\"]/div[1]/div[1]/div[1]/div[1]/div[2]/div[2]/div[1]/div/div[1]/div/div[5]",
            ),
        );
        table.insert("square_tool_option", Locator::xpath("//*[@id=\"tippy-7\"]/div/div[2]/div[2]"));
        table.insert("square_more_icon", Locator::xpath("//*[@id=\"post-editor-more-icon\"]/div[1]"));
        table.insert("square_more_first_option", Locator::xpath("//*[@id=\"tippy-9\"]/div/div[1]"));
        table.insert(
            "square_post_button",
            Locator::xpath("//button[@data-bn-type='button' and .//span[text()='Post']]"),
        );
        table
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub browser: BrowserConfig,
    pub chat: ChatConfig,
    pub square: SquareConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    pub loop_interval_secs: u64,
    pub selectors: SelectorTable,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        AutomationConfig {
            browser: BrowserConfig::default(),
            chat: ChatConfig::default(),
            square: SquareConfig::default(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            loop_interval_secs: 5 * 60,
            selectors: SelectorTable::default(),
        }
    }
}

impl AutomationConfig {
    /// Reads the JSON config at `path`. A missing file means defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file found at {:?}. Using defaults.", path);
            return Ok(AutomationConfig::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: AutomationConfig = serde_json::from_str(content)?;
        // A partial selector table in the file only overrides what it names.
        let mut selectors = SelectorTable::default();
        selectors.merge(std::mem::replace(&mut config.selectors, SelectorTable::empty()));
        config.selectors = selectors;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let urls: [(&'static str, &str); 6] = [
            ("browser.webdriver_url", &self.browser.webdriver_url),
            ("chat.url", &self.chat.url),
            ("chat.image_search_url", &self.chat.image_search_url),
            ("square.login_url", &self.square.login_url),
            ("square.profile_url", &self.square.profile_url),
            ("session.origin_url", &self.session.origin_url),
        ];
        for (field, value) in urls {
            Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })?;
        }

        self.retry.driver_start.policy::<ConfigError>("driver_start")?;
        self.retry.chat.policy::<ConfigError>("chat")?;
        self.retry.post.policy::<ConfigError>("post")?;

        for name in &self.square.click_sequence {
            self.selectors.get(name)?;
        }
        Ok(())
    }

    pub fn loop_interval(&self) -> Duration {
        secs(self.loop_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AutomationConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AutomationConfig::default());
        assert_eq!(config.loop_interval(), Duration::from_secs(300));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "chat": {{ "message": "one headline please", "pre_send_pause_secs": 0 }},
                "retry": {{ "chat": {{ "max_attempts": 2, "delay_secs": 1 }} }},
                "selectors": {{ "chat_input": {{ "by": "css", "value": "textarea#prompt" }} }}
            }}"#
        )
        .unwrap();

        let config = AutomationConfig::load(file.path()).unwrap();
        assert_eq!(config.chat.message, "one headline please");
        assert_eq!(config.chat.pre_send_pause(), Duration::ZERO);
        assert_eq!(config.chat.response_settle(), Duration::from_secs(10));
        assert_eq!(config.retry.chat, PolicySettings { max_attempts: 2, delay_secs: 1 });
        assert_eq!(config.retry.post, RetryConfig::default().post);
        assert_eq!(config.selectors.get("chat_input").unwrap(), &Locator::css("textarea#prompt"));
        assert_eq!(config.selectors.get("chat_response").unwrap(), &Locator::css("div.markdown.prose"));
        assert_eq!(config.selectors.len(), SelectorTable::default().len());
    }

    #[test]
    fn partial_policy_fills_missing_fields() {
        let config = AutomationConfig::from_json(r#"{ "retry": { "post": { "max_attempts": 2 } } }"#).unwrap();
        assert_eq!(config.retry.post, PolicySettings { max_attempts: 2, delay_secs: 5 });
        assert_eq!(config.retry.chat, RetryConfig::default().chat);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = AutomationConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = AutomationConfig::from_json(r#"{"retry": {"post": {"max_attempts": 0, "delay_secs": 5}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Policy(PolicyError::ZeroAttempts(_))));
    }

    #[test]
    fn bad_url_names_the_field() {
        let err = AutomationConfig::from_json(r#"{"square": {"profile_url": "not a url"}}"#).unwrap_err();
        assert!(err.to_string().contains("square.profile_url"));
    }

    #[test]
    fn click_sequence_must_reference_known_selectors() {
        let err = AutomationConfig::from_json(r#"{"square": {"click_sequence": ["square_more_icon", "nope"]}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSelector(name) if name == "nope"));
    }

    #[test]
    fn unknown_selector_lookup_fails() {
        let table = SelectorTable::default();
        assert!(table.get("square_post_button").is_ok());
        assert!(matches!(table.get("logout"), Err(ConfigError::UnknownSelector(_))));
    }
}
