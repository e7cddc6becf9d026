use std::fs;
use std::path::Path;
use log::{error, info, warn};

use crate::browser::{BrowserSession, Locator, ScriptArg, Wait};
use crate::config::{AutomationConfig, SelectorTable, SessionConfig, SquareConfig};
use crate::delay_manager;
use crate::error::AutomationError;
use crate::session_store::{self, SessionStore};

pub const DEFAULT_POST_TEXT: &str = "Default post text.";

/// Post body from `path`, or a placeholder when the file is missing.
pub fn load_post_text(path: &Path) -> Result<String, AutomationError> {
    if !path.exists() {
        warn!("Post text file not found at {:?}. Using default text.", path);
        return Ok(DEFAULT_POST_TEXT.to_string());
    }
    let content = fs::read_to_string(path).map_err(|e| AutomationError::file(path, e))?;
    info!("Post text loaded from {:?}.", path);
    Ok(content.trim().to_string())
}

/// Publishes a text (and optionally an image) to the feed.
pub struct SquarePoster<'a> {
    square: &'a SquareConfig,
    session: &'a SessionConfig,
    selectors: &'a SelectorTable,
}

impl<'a> SquarePoster<'a> {
    pub fn new(config: &'a AutomationConfig) -> Self {
        SquarePoster {
            square: &config.square,
            session: &config.session,
            selectors: &config.selectors,
        }
    }

    pub fn run<S: BrowserSession + ?Sized>(&self, session: &mut S, store: &SessionStore) -> Result<(), AutomationError> {
        self.sign_in(session, store)?;
        let text = load_post_text(&self.square.post_text_file)?;
        self.publish(session, &text)
    }

    /// Replays a saved session when there is one, otherwise leaves the
    /// login page open for a person to log in.
    pub fn sign_in<S: BrowserSession + ?Sized>(&self, session: &mut S, store: &SessionStore) -> Result<(), AutomationError> {
        match store.load()? {
            Some(artifact) => {
                session.navigate(&self.session.origin_url)?;
                session_store::replay(session, &artifact);
            }
            None => {
                session.navigate(&self.square.login_url)?;
                info!("Waiting for manual login.");
                delay_manager::pause("manual login", self.square.manual_login_wait());
            }
        }
        Ok(())
    }

    pub fn publish<S: BrowserSession + ?Sized>(&self, session: &mut S, text: &str) -> Result<(), AutomationError> {
        let wait = Wait::new(self.square.element_timeout());

        session.navigate(&self.square.profile_url)?;
        let editor = wait.until_clickable(session, self.selectors.get("square_editor")?)?;
        info!("Post editor is visible.");

        session.click(&editor)?;
        session.execute_script("arguments[0].innerHTML = '';", &[ScriptArg::from(&editor)])?;
        info!("Cleared existing text in the post editor.");
        session.click(&editor)?;
        session.send_keys(&editor, text)?;
        info!("Typed post text into the editor: {}", text);

        if let Some(image) = &self.square.image_path {
            // The post still goes out without its image.
            if let Err(e) = self.upload_image(session, image) {
                error!("An error occurred during image upload: {}", e);
            }
            delay_manager::pause("image processing", self.square.after_upload_pause());
        }

        let clicked = self.run_click_sequence(session);
        info!("Clicked {} of {} editor options.", clicked, self.square.click_sequence.len());

        delay_manager::pause("before posting", self.square.before_post_pause());
        let post_button = wait.until_clickable(session, self.selectors.get("square_post_button")?)?;
        session.click(&post_button)?;
        info!("Clicked the 'Post' button.");
        delay_manager::pause("post to go through", self.square.after_post_pause());
        Ok(())
    }

    /// Attaches `image` through the editor's hidden file input. Returns
    /// whether the uploaded image showed up in the page.
    pub fn upload_image<S: BrowserSession + ?Sized>(&self, session: &mut S, image: &Path) -> Result<bool, AutomationError> {
        if !image.is_file() {
            error!("Image file not found at {:?}.", image);
            return Ok(false);
        }
        let wait = Wait::new(self.square.element_timeout());

        let container = wait.until_present(session, self.selectors.get("square_upload_container")?)?;
        info!("Upload container located.");

        let file_input = match session.find_child(&container, self.selectors.get("square_file_input")?) {
            Ok(input) => input,
            Err(e) => {
                warn!("File input not found by primary selector ({}); trying fallback.", e);
                session.find_child(&container, self.selectors.get("square_file_input_fallback")?)?
            }
        };

        session.execute_script("arguments[0].style.display = 'block';", &[ScriptArg::from(&file_input)])?;
        let absolute = fs::canonicalize(image).map_err(|e| AutomationError::file(image, e))?;
        session.send_keys(&file_input, &absolute.to_string_lossy())?;
        info!("Image path {:?} sent to file input.", absolute);
        session.execute_script("arguments[0].dispatchEvent(new Event('change'));", &[ScriptArg::from(&file_input)])?;

        let stem = image.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let uploaded = Locator::xpath(self.square.uploaded_image_xpath.replace("{stem}", &stem));
        match wait.until_present(session, &uploaded) {
            Ok(_) => {
                info!("Image uploaded successfully.");
                Ok(true)
            }
            Err(e) => {
                error!("Uploaded image not found in the DOM: {}", e);
                Ok(false)
            }
        }
    }

    /// Clicks each configured element in turn. A step that cannot be
    /// clicked is logged and skipped. Returns how many were clicked.
    fn run_click_sequence<S: BrowserSession + ?Sized>(&self, session: &mut S) -> usize {
        let wait = Wait::new(self.square.element_timeout());
        let mut clicked = 0;

        for (index, name) in self.square.click_sequence.iter().enumerate() {
            let step = index + 1;
            let outcome = self
                .selectors
                .get(name)
                .map_err(AutomationError::from)
                .and_then(|locator| {
                    info!("Attempting to locate and click element {} ({}: {})", step, name, locator);
                    let element = wait.until_clickable(session, locator)?;
                    session.click(&element)?;
                    Ok(())
                });

            match outcome {
                Ok(()) => {
                    clicked += 1;
                    info!("Clicked element {} successfully.", step);
                    delay_manager::human_pause(self.square.click_pause_min_secs, self.square.click_pause_max_secs);
                }
                Err(e) => error!("Could not click element {} ({}): {}", step, name, e),
            }
        }
        clicked
    }
}
