//! Run diagnostics: timing and counts for an optimizer run.
//!
//! Durations are measured through the [`Clock`] trait so the crate
//! stays free of platform timers. [`WebClock`] uses the `web-time`
//! crate, which maps to `performance.now()` on WASM and
//! `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::fmt::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of monotonic timestamps.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Counters from one refinement hill climb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClimbStats {
    /// Mutations proposed and scored.
    pub attempts: u32,
    /// Mutations that improved on the best so far.
    pub improvements: u32,
}

/// What happened in one optimizer step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based step number.
    pub index: u32,
    /// Whether the refined step improved the canvas and was kept.
    pub applied: bool,
    /// Best distance among the initial trials.
    pub trial_distance: f64,
    /// Distance after refinement.
    pub refined_distance: f64,
    /// Canvas distance after the step.
    pub state_distance: f64,
    /// Refinement counters.
    pub climb: ClimbStats,
}

/// Summary of an optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Steps attempted.
    pub steps: u32,
    /// Steps applied to the canvas.
    pub applied: u32,
    /// Steps discarded because they did not improve the canvas.
    pub discarded: u32,
    /// Distance of the empty canvas.
    pub initial_distance: f64,
    /// Cached distance at the end of the run.
    pub final_distance: f64,
    /// Distance re-measured from the rasters at the end of the run.
    pub exact_distance: f64,
    /// Total refinement attempts over all steps.
    pub mutation_attempts: u64,
    /// Wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Human-readable multi-line report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run summary\n{}", "=".repeat(40));
        let _ = writeln!(out, "{:<22} {:>12}", "Steps", self.steps);
        let _ = writeln!(out, "{:<22} {:>12}", "Applied", self.applied);
        let _ = writeln!(out, "{:<22} {:>12}", "Discarded", self.discarded);
        let _ = writeln!(out, "{:<22} {:>12}", "Mutation attempts", self.mutation_attempts);
        let _ = writeln!(out, "{:<22} {:>12.6}", "Initial distance", self.initial_distance);
        let _ = writeln!(out, "{:<22} {:>12.6}", "Final distance", self.final_distance);
        let _ = writeln!(out, "{:<22} {:>12.6}", "Exact distance", self.exact_distance);
        let _ = write!(
            out,
            "{:<22} {:>10.3}ms",
            "Elapsed",
            self.elapsed.as_secs_f64() * 1000.0
        );
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            steps: 4,
            applied: 3,
            discarded: 1,
            initial_distance: 0.5,
            final_distance: 0.25,
            exact_distance: 0.25,
            mutation_attempts: 40,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn elapsed_serializes_as_seconds() {
        let json = serde_json::to_value(summary()).unwrap();
        assert!((json["elapsed"].as_f64().unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn summary_json_roundtrip() {
        let json = serde_json::to_string(&summary()).unwrap();
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary());
    }

    #[test]
    fn negative_elapsed_is_rejected() {
        let mut json = serde_json::to_value(summary()).unwrap();
        json["elapsed"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<RunSummary>(json).is_err());
    }

    #[test]
    fn report_mentions_counts() {
        let report = summary().report();
        assert!(report.contains("Applied"));
        assert!(report.contains("1500.000ms"));
    }

    #[test]
    fn web_clock_is_monotonic() {
        let clock = WebClock;
        let start = clock.now();
        assert!(clock.elapsed(&start) < Duration::from_secs(60));
    }
}
