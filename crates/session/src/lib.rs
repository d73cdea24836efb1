//! A learner session over the simulated GPU cluster.
//!
//! [`Session`] wires the pieces together into the synchronous
//! request/response loop every front end drives:
//!
//! ```text
//!            line
//!             │
//!             ▼
//!   ┌───────────────────┐   history / hint
//!   │      Session      │──────────────────▶ builtin result
//!   └─────────┬─────────┘
//!             │ registry.parse + dispatch
//!             ▼
//!   ┌───────────────────┐      mutations      ┌──────────────┐
//!   │     Simulator     │────────────────────▶│ ClusterStore │
//!   └─────────┬─────────┘                     └──────┬───────┘
//!             │ CommandResult (+ ShellEffects)       │ state checks
//!             ▼                                      ▼
//!   ┌───────────────────┐                   ┌────────────────┐
//!   │  apply effects,   │──────────────────▶│  ScenarioRun   │
//!   │  record history   │   EvaluationInput └────────────────┘
//!   └───────────────────┘
//! ```
//!
//! The learning scheduler sits beside this loop: review answers go through
//! [`Session::answer_question`] and are timestamped with the session clock.

mod config;
mod error;
mod session;

pub use config::{ConfigError, SessionConfig};
pub use error::SessionError;
pub use session::{Session, SessionOutput, HINT_BUILTIN, HISTORY_BUILTIN};
