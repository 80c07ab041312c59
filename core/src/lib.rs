//! # GateCheck Core
//!
//! Core traits and types shared by every GateCheck crate.
//!
//! The door-side validator is modelled as a small state machine driven by a reducer:
//!
//! - **State**: what the checkpoint is doing right now (idle, validating, showing a result)
//! - **Action**: every input to the machine (a decoded code, a finished validation, a dismissal)
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: description of I/O to perform (store lookups, screen updates, re-arming the scanner)
//! - **Environment**: injected dependencies (ticket store, scanner handle, clock)
//!
//! ## Example
//!
//! ```ignore
//! use gatecheck_core::{effect::Effect, reducer::Reducer, SmallVec};
//!
//! impl Reducer for CheckpointReducer {
//!     type State = CheckpointState;
//!     type Action = CheckpointAction;
//!     type Environment = CheckpointEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CheckpointState,
//!         action: CheckpointAction,
//!         env: &CheckpointEnvironment,
//!     ) -> SmallVec<[Effect<CheckpointAction>; 4]> {
//!         // Business logic goes here
//!         SmallVec::new()
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They hold all decision logic and stay deterministic, so they can be tested without I/O.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed by the runtime
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values, not execution.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are returned from reducers and
    /// executed by the Store runtime, which feeds any produced action back into the reducer.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async computation into an [`Effect::Future`]
        #[must_use]
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Whether this effect does nothing when executed
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// External dependencies are abstracted behind traits and injected
/// via the reducer's Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};

    #[test]
    fn future_effect_yields_action() {
        let effect: Effect<u32> = Effect::future(async { Some(7) });
        let Effect::Future(fut) = effect else {
            unreachable!("Effect::future always builds a Future variant");
        };
        assert_eq!(tokio_test::block_on(fut), Some(7));
    }

    #[test]
    fn debug_hides_future_body() {
        let effect: Effect<u32> = Effect::future(async { None });
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
        assert!(Effect::<u32>::None.is_none());
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
