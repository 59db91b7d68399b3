//! Bounded polling over freshly sampled device state.
//!
//! All waiting in droidctl goes through one primitive, [`Poller::poll`]: a
//! predicate is evaluated under a [`RetryBudget`] until it holds or the budget
//! runs out. The device-level waits ([`wait_for_text`], [`wait_for_app`],
//! [`wait_for_boot`]) are thin predicates over the sampler.
//!
//! # Tick vs. delay
//!
//! A budget carries a per-attempt delay, but between evaluations the poller
//! only sleeps a short fixed tick (never longer than that delay). Polling more
//! often than the nominal delay costs extra adb round-trips and buys
//! responsiveness: a caller passing a large attempt count gets an answer soon
//! after the state changes instead of up to one full delay later.
//!
//! # Limitations
//!
//! There is no cancellation token. A poll ends only when the predicate holds
//! or the attempt budget is exhausted, and a sleeping tick cannot be
//! interrupted from another thread.
//!
//! [`wait_for_text`]: DeviceSession::wait_for_text
//! [`wait_for_app`]: DeviceSession::wait_for_app
//! [`wait_for_boot`]: DeviceSession::wait_for_boot

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::channel::CommandChannel;
use crate::config::DEFAULT_POLL_TICK;
use crate::error::{DroidError, Result};
use crate::sampler::{screen_contains, MatchStrategy};
use crate::session::DeviceSession;

/// Delay units between screen or boot checks.
const WAIT_DELAY_UNITS: u32 = 10;

/// An attempt counter paired with a per-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Number of attempts before giving up.
    pub attempts: u32,
    /// Nominal delay per attempt; caps the polling tick.
    pub delay: Duration,
}

impl RetryBudget {
    /// Creates a budget.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// The generic bounded-retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    tick: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            tick: DEFAULT_POLL_TICK,
        }
    }
}

impl Poller {
    /// Creates a poller sleeping `tick` between evaluations. A zero tick
    /// selects the default.
    pub fn new(tick: Duration) -> Self {
        if tick.is_zero() {
            Self::default()
        } else {
            Self { tick }
        }
    }

    /// The configured polling tick.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    fn sleep_for(&self, budget: &RetryBudget) -> Duration {
        if budget.delay.is_zero() {
            self.tick
        } else {
            self.tick.min(budget.delay)
        }
    }

    /// Evaluates `predicate` until it returns `Ok(true)` or the budget runs out.
    ///
    /// The predicate is evaluated once up front; if it already holds, no retry
    /// is consumed. Each further round decrements the budget and, unless it hit
    /// zero, sleeps one tick and evaluates again. An `Err` from the predicate
    /// counts as "not yet satisfied".
    ///
    /// # Returns
    ///
    /// The number of retries consumed before the predicate held.
    ///
    /// # Errors
    ///
    /// - [`DroidError::RetryExhausted`] carrying the original budget
    /// - the predicate's own error, if the final evaluation failed
    pub fn poll<F>(&self, budget: RetryBudget, mut predicate: F) -> Result<u32>
    where
        F: FnMut() -> Result<bool>,
    {
        let sleep = self.sleep_for(&budget);
        let mut last = predicate();
        if matches!(last, Ok(true)) {
            return Ok(0);
        }

        let mut remaining = budget.attempts;
        let mut consumed = 0;
        loop {
            if let Err(e) = &last {
                debug!(error = %e, "poll round failed");
            }
            remaining = remaining.saturating_sub(1);
            consumed += 1;
            if remaining == 0 {
                return Err(match last {
                    Err(e) => e,
                    Ok(_) => DroidError::RetryExhausted {
                        attempts: budget.attempts,
                    },
                });
            }

            debug!(remaining, "waiting");
            std::thread::sleep(sleep);
            last = predicate();
            if matches!(last, Ok(true)) {
                return Ok(consumed);
            }
        }
    }
}

/// Random target selection without replacement across rounds.
///
/// Each round checks a single candidate; a miss removes it. Once every
/// candidate has missed, the pool is refilled so later rounds keep sampling.
#[derive(Debug, Clone)]
pub struct SampledTargets<'a> {
    all: &'a [&'a str],
    remaining: Vec<&'a str>,
}

impl<'a> SampledTargets<'a> {
    /// Creates a pool over `targets`.
    pub fn new(targets: &'a [&'a str]) -> Self {
        Self {
            all: targets,
            remaining: targets.to_vec(),
        }
    }

    /// Number of candidates left before the next refill.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Picks the candidate for this round, refilling an exhausted pool.
    pub fn pick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<(usize, &'a str)> {
        if self.remaining.is_empty() {
            self.remaining = self.all.to_vec();
        }
        if self.remaining.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.remaining.len());
        Some((index, self.remaining[index]))
    }

    /// Drops a candidate that missed this round.
    pub fn discard(&mut self, index: usize) {
        if index < self.remaining.len() {
            self.remaining.swap_remove(index);
        }
    }
}

impl<C: CommandChannel> DeviceSession<C> {
    /// Waits until any of `targets` appears in a fresh UI dump.
    ///
    /// Matching is case-insensitive on normalized text. The session's
    /// [`MatchStrategy`] decides whether all targets or one sampled target are
    /// checked per round.
    ///
    /// # Errors
    ///
    /// - [`DroidError::InvalidInput`] if `targets` is empty
    /// - [`DroidError::RetryExhausted`] if no target appeared in time
    pub fn wait_for_text(&mut self, targets: &[&str], attempts: u32) -> Result<u32> {
        if targets.is_empty() {
            return Err(DroidError::InvalidInput("no text to wait for".to_string()));
        }
        info!(serial = %self.serial(), targets = %targets.join(" or "), "waiting for text");

        let poller = self.poller();
        let budget = RetryBudget::new(attempts, self.delay(WAIT_DELAY_UNITS));
        let strategy = self.config().match_strategy;
        match strategy {
            MatchStrategy::Exhaustive => poller.poll(budget, || self.has_in_screen(targets)),
            MatchStrategy::Sampled => {
                let mut pool = SampledTargets::new(targets);
                let mut rng = rand::thread_rng();
                poller.poll(budget, || {
                    let screen = self.ui_dump(true)?;
                    let Some((index, target)) = pool.pick(&mut rng) else {
                        return Ok(false);
                    };
                    debug!(candidate = target, "searching screen");
                    if screen_contains(&screen, target) {
                        return Ok(true);
                    }
                    pool.discard(index);
                    Ok(false)
                })
            }
        }
    }

    /// Waits until `package` is in the foreground.
    ///
    /// `delay_units` sets the nominal per-attempt delay in delay units.
    pub fn wait_for_app(&self, package: &str, attempts: u32, delay_units: u32) -> Result<u32> {
        info!(serial = %self.serial(), package, "waiting for app");
        let needle = package.to_lowercase();
        let budget = RetryBudget::new(attempts, self.delay(delay_units));
        self.poller()
            .poll(budget, || Ok(self.foreground()?.contains(&needle)))
    }

    /// Waits until the device reports boot completion.
    ///
    /// Intended right after an emulator launch or reboot, before any other
    /// interaction.
    pub fn wait_for_boot(&self, attempts: u32) -> Result<u32> {
        info!(serial = %self.serial(), "waiting for boot");
        let budget = RetryBudget::new(attempts, self.delay(WAIT_DELAY_UNITS));
        self.poller().poll(budget, || self.is_boot_completed())
    }
}
