//! Registration form: the per-submitter conversational state machine.
//!
//! A submitter walks through contact, institution type, name, address,
//! landmark, location and an optional photo before confirming. The
//! `SessionManager` owns the in-progress forms and performs the store and
//! photo side effects around the pure step validator in `state`.

pub mod input;
pub mod manager;
pub mod model;
pub mod prompts;
pub mod state;

pub use input::{Button, Intent};
pub use manager::SessionManager;
pub use model::{Draft, InstitutionCategory, Record, SubmitterIdentity};
pub use state::{FormSession, FormStep, StepOutcome};
