use std::fs;
use std::path::PathBuf;
use log::{info, warn};

use crate::browser::{BrowserSession, Wait, ENTER};
use crate::config::{AutomationConfig, ChatConfig, SelectorTable};
use crate::delay_manager;
use crate::error::AutomationError;

/// Asks the chat assistant for a post, saves the answer and grabs an
/// illustration screenshot from an image search on the answer's title.
pub struct ChatScraper<'a> {
    config: &'a ChatConfig,
    selectors: &'a SelectorTable,
}

impl<'a> ChatScraper<'a> {
    pub fn new(config: &'a AutomationConfig) -> Self {
        ChatScraper {
            config: &config.chat,
            selectors: &config.selectors,
        }
    }

    /// Whole flow: ask, save, screenshot. Returns the response text.
    pub fn run<S: BrowserSession + ?Sized>(&self, session: &mut S) -> Result<String, AutomationError> {
        let response = self.ask(session)?;
        self.save_response(&response)?;

        if self.config.capture_image {
            let title = response_title(&response);
            if title.is_empty() {
                warn!("Response has no text to search images for; skipping screenshot.");
            } else {
                info!("Extracted title for image search: {}", title);
                self.capture_image(session, title)?;
            }
        }
        Ok(response)
    }

    pub fn ask<S: BrowserSession + ?Sized>(&self, session: &mut S) -> Result<String, AutomationError> {
        session.navigate(&self.config.url)?;

        info!("Waiting for chat input field to be clickable...");
        let input_locator = self.selectors.get("chat_input")?;
        let input = Wait::new(self.config.input_timeout()).until_clickable(session, input_locator)?;
        info!("Chat input field is clickable.");

        delay_manager::pause("before sending message", self.config.pre_send_pause());
        session.click(&input)?;
        session.send_keys(&input, &self.config.message)?;
        session.send_keys(&input, ENTER)?;
        info!("Typed and sent message: {}", self.config.message);

        self.read_response(session)
    }

    fn read_response<S: BrowserSession + ?Sized>(&self, session: &mut S) -> Result<String, AutomationError> {
        let response_locator = self.selectors.get("chat_response")?;
        info!("Waiting for response from chat assistant...");
        Wait::new(self.config.input_timeout()).until_present(session, response_locator)?;

        // The element shows up as soon as streaming starts.
        delay_manager::pause("response to finish", self.config.response_settle());

        let responses = session.find_elements(response_locator)?;
        let last = responses
            .last()
            .ok_or_else(|| AutomationError::NoResponse(response_locator.to_string()))?;
        let text = session.text(last)?;
        info!("Chat assistant responded: {}", text);
        Ok(text)
    }

    pub fn save_response(&self, text: &str) -> Result<(), AutomationError> {
        let path = &self.config.response_file;
        fs::write(path, text).map_err(|e| AutomationError::file(path, e))?;
        info!("Response saved to {:?}", path);
        Ok(())
    }

    /// Searches images for `title` and saves a full-page screenshot.
    pub fn capture_image<S: BrowserSession + ?Sized>(&self, session: &mut S, title: &str) -> Result<PathBuf, AutomationError> {
        session.navigate(&self.config.image_search_url)?;
        let wait = Wait::new(self.config.image_search_timeout());

        let search_input = wait.until_present(session, self.selectors.get("image_search_input")?)?;
        session.clear(&search_input)?;
        session.send_keys(&search_input, title)?;
        session.send_keys(&search_input, ENTER)?;
        info!("Typed and submitted search query: {}", title);

        wait.until_present(session, self.selectors.get("image_search_results")?)?;
        info!("Search results loaded.");

        session.execute_script("window.scrollTo(0, document.body.scrollHeight);", &[])?;
        delay_manager::pause("scrolling", self.config.scroll_pause());

        session.execute_script("window.devicePixelRatio = 1", &[])?;
        let zoom = format!("document.body.style.zoom='{}'", self.config.zoom);
        session.execute_script(&zoom, &[])?;

        let path = self
            .config
            .screenshot_file
            .clone()
            .unwrap_or_else(|| {
                let stem = match sanitize_filename(title) {
                    name if name.is_empty() => "screenshot".to_string(),
                    name => name,
                };
                self.config.response_file.with_file_name(format!("{}.png", stem))
            });
        let png = session.screenshot()?;
        fs::write(&path, png).map_err(|e| AutomationError::file(&path, e))?;
        info!("Screenshot saved as {:?}", path);
        Ok(path)
    }
}

/// First non-blank line of a response, used as its headline.
pub fn response_title(text: &str) -> &str {
    text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default()
}

/// Replaces every non-alphanumeric character with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}
