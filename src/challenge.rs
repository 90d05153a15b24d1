//! Anti-automation interstitial handling.
//!
//! One [`ChallengeHandler`] run happens per navigation:
//!
//! ```text
//! Idle ──marker seen──▶ Detected ──▶ Waiting ──nav seen──▶ Resolved
//!  │                                    └──timeout──────▶ Failed
//!  └── no marker: terminal success
//! ```
//!
//! Nothing is carried between navigations. `Failed` is a retryable signal for
//! the fetcher, never a fatal error.

use std::time::Duration;

use crate::browser::PageDriver;
use crate::wait::{wait_until, Clock, WaitOutcome};

pub const CHALLENGE_MARKERS: &[&str] = &[
    r#"iframe[src*="cloudflare"]"#,
    "#challenge-form",
    "#cf-challenge-running",
    ".cf-browser-verification",
    "#cf_captcha_container",
    "#challenge-running",
    ".challenge-form",
];

pub const NAVIGATION_MARKERS: &[&str] = &["nav", ".menu", ".navbar"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Idle,
    Detected,
    Waiting,
    Resolved,
    Failed,
}

impl ChallengeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeState::Resolved | ChallengeState::Failed)
    }

    /// `Idle` counts as success once a run has finished without detection.
    pub fn is_clear(&self) -> bool {
        matches!(self, ChallengeState::Idle | ChallengeState::Resolved)
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub challenge_markers: Vec<String>,
    pub navigation_markers: Vec<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            challenge_markers: CHALLENGE_MARKERS.iter().map(|s| s.to_string()).collect(),
            navigation_markers: NAVIGATION_MARKERS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct ChallengeHandler {
    config: ChallengeConfig,
    state: ChallengeState,
    detected_marker: Option<String>,
}

impl ChallengeHandler {
    pub fn new(config: ChallengeConfig) -> Self {
        Self {
            config,
            state: ChallengeState::Idle,
            detected_marker: None,
        }
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    pub fn detected_marker(&self) -> Option<&str> {
        self.detected_marker.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Inspect the current page and wait out a challenge if one is showing.
    /// Returns the terminal state: `Idle`, `Resolved` or `Failed`.
    pub fn run(&mut self, page: &dyn PageDriver, clock: &dyn Clock) -> ChallengeState {
        self.state = ChallengeState::Idle;
        self.detected_marker = None;

        // Idle -> Detected
        match self.find_challenge_marker(page) {
            Some(marker) => {
                log::info!("Challenge detected ({})", marker);
                self.detected_marker = Some(marker);
                self.state = ChallengeState::Detected;
            }
            None => {
                log::debug!("No challenge detected");
                return self.state;
            }
        }

        // Detected -> Waiting
        self.state = ChallengeState::Waiting;
        log::info!(
            "Waiting up to {}s for the challenge to clear",
            self.config.timeout.as_secs()
        );

        // Waiting -> Resolved | Failed
        let outcome = wait_until(clock, self.config.timeout, self.config.poll_interval, || {
            self.has_any(page, &self.config.navigation_markers)
                || self.find_challenge_marker(page).is_none()
        });

        self.state = match outcome {
            WaitOutcome::Ready => {
                log::info!("Challenge cleared");
                ChallengeState::Resolved
            }
            WaitOutcome::TimedOut => {
                log::warn!(
                    "Challenge still present after {}s",
                    self.config.timeout.as_secs()
                );
                ChallengeState::Failed
            }
        };
        self.state
    }

    fn find_challenge_marker(&self, page: &dyn PageDriver) -> Option<String> {
        self.config
            .challenge_markers
            .iter()
            .find(|selector| page.has_element(selector).unwrap_or(false))
            .cloned()
    }

    fn has_any(&self, page: &dyn PageDriver, selectors: &[String]) -> bool {
        selectors
            .iter()
            .any(|selector| page.has_element(selector).unwrap_or(false))
    }
}
