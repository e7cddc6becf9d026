pub mod retry;
pub mod browser;
pub mod webdriver;
pub mod config;
pub mod error;
pub mod session_store;
pub mod chat_scraper;
pub mod square_poster;
pub mod runner;
pub mod delay_manager;
pub mod logger;
pub mod pairlist;
pub mod kv_dump;

// Exporting types for convenience
pub use retry::{AttemptPolicy, PolicyError};
pub use browser::{with_session, BrowserError, BrowserSession, Locator, SessionFactory};
pub use webdriver::{WebDriverFactory, WebDriverSession};
pub use config::{AutomationConfig, ConfigError};
pub use error::AutomationError;
pub use session_store::{SessionArtifact, SessionStore};
pub use chat_scraper::ChatScraper;
pub use square_poster::SquarePoster;
pub use runner::Cycle;
pub use pairlist::PairCache;
