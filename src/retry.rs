use std::fmt::Display;
use std::thread;
use std::time::Duration;
use log::{info, warn, error};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    #[error("max_attempts for '{0}' must be at least 1")]
    ZeroAttempts(String),
}

/// Waits between attempts. Production code sleeps the thread.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Governs one wrapped call: how many attempts, how long to wait between
/// them, which errors are worth another try and what to do when every
/// attempt has failed.
///
/// A policy is built at the call site and consumed by [`AttemptPolicy::run`].
/// Side effects of a failed attempt are not undone before the next one.
pub struct AttemptPolicy<E> {
    label: String,
    max_attempts: u32,
    delay: Duration,
    retryable: Box<dyn Fn(&E) -> bool>,
    on_exhaustion: Option<Box<dyn FnOnce()>>,
}

impl<E> AttemptPolicy<E> {
    pub fn new(label: impl Into<String>, max_attempts: u32, delay: Duration) -> Result<Self, PolicyError> {
        let label = label.into();
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts(label));
        }
        Ok(AttemptPolicy {
            label,
            max_attempts,
            delay,
            retryable: Box::new(|_| true),
            on_exhaustion: None,
        })
    }

    /// Only errors matching `predicate` are retried; anything else is
    /// returned straight away.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + 'static,
    {
        self.retryable = Box::new(predicate);
        self
    }

    pub fn on_exhaustion<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        self.on_exhaustion = Some(Box::new(callback));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<E: Display> AttemptPolicy<E> {
    pub fn run<T, F>(self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run_with(&mut ThreadSleeper, op)
    }

    pub fn run_with<T, F, S>(self, sleeper: &mut S, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        S: Sleeper + ?Sized,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !(self.retryable)(&err) {
                warn!("{} failed with a non-retryable error: {}", self.label, err);
                return Err(err);
            }

            warn!("Attempt {} for {} failed with error: {}", attempt, self.label, err);
            if attempt >= self.max_attempts {
                error!("All {} attempts for {} failed.", self.max_attempts, self.label);
                if let Some(callback) = self.on_exhaustion {
                    callback();
                }
                return Err(err);
            }

            info!("Retrying {} in {} seconds...", self.label, self.delay.as_secs_f64());
            sleeper.sleep(self.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingSleeper {
        calls: Vec<Duration>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.calls.push(duration);
        }
    }

    #[derive(Debug, PartialEq)]
    enum TestError {
        Value(String),
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Value(msg) => write!(f, "value error: {}", msg),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    #[test]
    fn two_failures_then_ok_returns_ok_after_three_calls() {
        let policy = AttemptPolicy::new("flaky", 3, Duration::ZERO).unwrap();
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;

        let result = policy.run_with(&mut sleeper, || {
            calls += 1;
            if calls < 3 {
                Err(TestError::Value(format!("attempt {}", calls)))
            } else {
                Ok("ok")
            }
        });

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls, 3);
        assert_eq!(sleeper.calls.len(), 2);
    }

    #[test]
    fn always_failing_raises_final_error_after_max_attempts() {
        let policy = AttemptPolicy::new("broken", 2, Duration::ZERO).unwrap();
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;

        let result: Result<(), _> = policy.run_with(&mut sleeper, || {
            calls += 1;
            Err(TestError::Value(format!("attempt {}", calls)))
        });

        assert_eq!(result, Err(TestError::Value("attempt 2".to_string())));
        assert_eq!(calls, 2);
    }

    #[test]
    fn delay_runs_between_attempts_only() {
        let delay = Duration::from_millis(250);
        let policy = AttemptPolicy::new("paced", 4, delay).unwrap();
        let mut sleeper = RecordingSleeper::default();

        let result: Result<(), _> = policy.run_with(&mut sleeper, || Err(TestError::Fatal));

        assert!(result.is_err());
        assert_eq!(sleeper.calls, vec![delay; 3]);
    }

    #[test]
    fn first_try_success_never_sleeps() {
        let policy = AttemptPolicy::new("quick", 5, Duration::from_secs(10)).unwrap();
        let mut sleeper = RecordingSleeper::default();

        let result: Result<u32, TestError> = policy.run_with(&mut sleeper, || Ok(7));

        assert_eq!(result, Ok(7));
        assert!(sleeper.calls.is_empty());
    }

    #[test]
    fn exhaustion_callback_runs_once_and_only_on_exhaustion() {
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let policy = AttemptPolicy::new("doomed", 3, Duration::ZERO)
            .unwrap()
            .on_exhaustion(move || counter.set(counter.get() + 1));

        let result: Result<(), _> = policy.run_with(&mut RecordingSleeper::default(), || Err(TestError::Fatal));
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(fired.get(), 1);

        let fired_ok = Rc::new(Cell::new(0));
        let counter = fired_ok.clone();
        let mut calls = 0;
        let policy = AttemptPolicy::new("recovers", 3, Duration::ZERO)
            .unwrap()
            .on_exhaustion(move || counter.set(counter.get() + 1));
        let result = policy.run_with(&mut RecordingSleeper::default(), || {
            calls += 1;
            if calls == 1 { Err(TestError::Fatal) } else { Ok(()) }
        });
        assert!(result.is_ok());
        assert_eq!(fired_ok.get(), 0);
    }

    #[test]
    fn non_retryable_error_propagates_immediately() {
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let policy = AttemptPolicy::new("filtered", 5, Duration::from_secs(1))
            .unwrap()
            .retry_if(|e: &TestError| matches!(e, TestError::Value(_)))
            .on_exhaustion(move || flag.set(true));
        let mut sleeper = RecordingSleeper::default();
        let mut calls = 0;

        let result: Result<(), _> = policy.run_with(&mut sleeper, || {
            calls += 1;
            Err(TestError::Fatal)
        });

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls, 1);
        assert!(sleeper.calls.is_empty());
        assert!(!fired.get());
    }

    #[test]
    fn retryable_filter_still_retries_matching_errors() {
        let policy = AttemptPolicy::new("filtered", 3, Duration::ZERO)
            .unwrap()
            .retry_if(|e: &TestError| matches!(e, TestError::Value(_)));
        let mut calls = 0;

        let result = policy.run_with(&mut RecordingSleeper::default(), || {
            calls += 1;
            match calls {
                1 => Err(TestError::Value("first".into())),
                2 => Err(TestError::Fatal),
                _ => Ok(()),
            }
        });

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let result = AttemptPolicy::<TestError>::new("nothing", 0, Duration::ZERO);
        assert_eq!(result.err(), Some(PolicyError::ZeroAttempts("nothing".to_string())));
    }
}
