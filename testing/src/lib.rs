//! # GateCheck Testing
//!
//! Testing utilities and helpers for GateCheck reducers.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - [`assertions`]: helpers for inspecting returned effects
//! - [`FixedClock`]: deterministic time for environments
//!
//! ## Example
//!
//! ```ignore
//! use gatecheck_testing::{assertions, ReducerTest};
//!
//! ReducerTest::new(CheckpointReducer::new())
//!     .with_env(test_environment())
//!     .given_state(CheckpointState::default())
//!     .when_action(CheckpointAction::Dismissed)
//!     .then_state(|state| assert!(state.phase.is_idle()))
//!     .then_effects(assertions::assert_no_effects)
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use gatecheck_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use gatecheck_testing::mocks::FixedClock;
    /// use gatecheck_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 20:15:30 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T20:15:30Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock};
pub use reducer_test::{assertions, ReducerTest};
