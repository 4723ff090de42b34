//! The agent loop: the heart of Caduceus.
//!
//! A run follows a **Think → Act → Observe** cycle:
//!
//! 1. **Think**: send the task, the transcript so far, and the capability
//!    list to the model
//! 2. **Parse**: recover a decision from the response, either one
//!    capability call or a final answer
//! 3. **Act**: invoke the capability under a timeout
//! 4. **Observe**: append the bounded result and loop back to 1
//!
//! The loop ends on a final answer or when the iteration budget runs out.
//! [`Emitter`] streams each step to a remote observer as it is committed;
//! [`Assessor`] covers single-shot structured tasks and critique.

pub mod assess;
pub mod controller;
pub mod decision;
pub mod emitter;
pub mod prompt;
pub mod run;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assess::{AssessError, Assessment, Assessor, Critique, Verdict};
pub use controller::{Controller, ControllerSettings, NoopObserver, RunObserver};
pub use decision::Decision;
pub use emitter::{Emitter, RunHandle, RunStream};
pub use run::{DEFAULT_MAX_ITERATIONS, Outcome, RunError, RunReport, RunRequest};
