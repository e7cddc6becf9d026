use square_autopost_lib::{delay_manager, kv_dump, logger, runner, session_store};
use square_autopost_lib::browser::BrowserSession;
use square_autopost_lib::{with_session, AutomationConfig, AutomationError, Cycle, SessionStore, WebDriverFactory};

use clap::{Parser, Subcommand};
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "square-autopost", version, about = "Scrapes a chat answer and posts it to the Square feed")]
struct Cli {
    /// JSON config file; missing means built-in defaults.
    #[arg(long, default_value = "autopost.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the chat assistant and save its answer and screenshot.
    Chat,
    /// Post the saved answer to the feed.
    Post,
    /// Chat then post, once.
    Cycle,
    /// Chat then post, forever, with a pause between rounds.
    Loop,
    /// Open the login page, wait for a manual login and save the session.
    CaptureSession,
    /// Print every key in a Redis database with its value.
    DumpKv {
        #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
        url: String,

        #[arg(long, default_value = "*")]
        pattern: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = AutomationConfig::load(&cli.config)?;
    logger::init(logger::parse_level(&config.logging.level), config.logging.file.as_deref())?;
    info!("Starting Square autopost...");

    let factory = WebDriverFactory::new(config.browser.clone(), config.retry.driver_start);

    match cli.command {
        Command::Chat => {
            let response = Cycle::new(&config, factory).chat()?;
            info!("Chat flow finished ({} characters).", response.chars().count());
        }
        Command::Post => Cycle::new(&config, factory).post()?,
        Command::Cycle => Cycle::new(&config, factory).run()?,
        Command::Loop => {
            let mut cycle = Cycle::new(&config, factory);
            runner::run_loop(
                config.loop_interval(),
                &mut square_autopost_lib::retry::ThreadSleeper,
                |_| true,
                || cycle.run(),
            );
        }
        Command::CaptureSession => capture_session(&config, factory)?,
        Command::DumpKv { url, pattern } => {
            let mut source = kv_dump::RedisSource::connect(&url)?;
            for entry in kv_dump::dump(&mut source, &pattern)? {
                println!("{}", entry);
            }
        }
    }

    info!("Done.");
    Ok(())
}

fn capture_session(config: &AutomationConfig, mut factory: WebDriverFactory) -> Result<(), AutomationError> {
    let store = SessionStore::from_config(&config.session);
    let artifact = with_session(&mut factory, |session| {
        session.navigate(&config.square.login_url)?;
        info!("Log in within {} seconds.", config.session.capture_wait_secs);
        delay_manager::pause("manual login", config.session.capture_wait());
        Ok::<_, AutomationError>(session_store::capture(session)?)
    })?;

    if artifact.cookies.is_empty() {
        error!("No cookies captured; was the login completed?");
    }
    store.save(&artifact)
}
