use std::fmt::Display;
use std::time::{Duration, Instant};
use log::{error, info};

use crate::browser::{with_session, SessionFactory};
use crate::chat_scraper::ChatScraper;
use crate::config::AutomationConfig;
use crate::error::AutomationError;
use crate::retry::Sleeper;
use crate::session_store::SessionStore;
use crate::square_poster::SquarePoster;

/// Runs `iteration` over and over, `interval` apart, for as long as
/// `should_continue` agrees. A failed iteration is logged and the loop moves
/// on. Returns how many iterations ran.
pub fn run_loop<S, C, F, E>(interval: Duration, sleeper: &mut S, mut should_continue: C, mut iteration: F) -> u64
where
    S: Sleeper + ?Sized,
    C: FnMut(u64) -> bool,
    F: FnMut() -> Result<(), E>,
    E: Display,
{
    let mut completed = 0;
    while should_continue(completed) {
        info!("=== Starting New Iteration ===");
        let started = Instant::now();
        if let Err(e) = iteration() {
            error!("Process encountered an error: {}", e);
        }
        completed += 1;
        info!("=== Iteration Completed in {:.2} seconds ===", started.elapsed().as_secs_f64());

        if !should_continue(completed) {
            break;
        }
        info!("Sleeping for {} seconds before next iteration.", interval.as_secs());
        sleeper.sleep(interval);
    }
    completed
}

/// One chat-then-post round. Each half gets its own browser session and
/// its own retry policy; a retry starts the half over from the top.
pub struct Cycle<'a, F: SessionFactory> {
    config: &'a AutomationConfig,
    factory: F,
}

impl<'a, F: SessionFactory> Cycle<'a, F> {
    pub fn new(config: &'a AutomationConfig, factory: F) -> Self {
        Cycle { config, factory }
    }

    pub fn chat(&mut self) -> Result<String, AutomationError> {
        self.chat_with(&mut crate::retry::ThreadSleeper)
    }

    pub fn post(&mut self) -> Result<(), AutomationError> {
        self.post_with(&mut crate::retry::ThreadSleeper)
    }

    pub fn run(&mut self) -> Result<(), AutomationError> {
        self.chat()?;
        self.post()
    }

    pub fn chat_with<S: Sleeper + ?Sized>(&mut self, sleeper: &mut S) -> Result<String, AutomationError> {
        let config = self.config;
        let factory = &mut self.factory;
        let scraper = ChatScraper::new(config);
        config
            .retry
            .chat
            .policy::<AutomationError>("chat")
            .map_err(crate::config::ConfigError::from)?
            .run_with(sleeper, || with_session(factory, |session| scraper.run(session)))
    }

    pub fn post_with<S: Sleeper + ?Sized>(&mut self, sleeper: &mut S) -> Result<(), AutomationError> {
        let config = self.config;
        let factory = &mut self.factory;
        let poster = SquarePoster::new(config);
        let store = SessionStore::from_config(&config.session);
        config
            .retry
            .post
            .policy::<AutomationError>("post")
            .map_err(crate::config::ConfigError::from)?
            .on_exhaustion(|| error!("Giving up on posting for this round."))
            .run_with(sleeper, || with_session(factory, |session| poster.run(session, &store)))
    }

    pub fn into_factory(self) -> F {
        self.factory
    }
}
