//! Payload assembly from form state.
//!
//! Every function here is a pure transform over the field list: nothing is persisted and
//! nothing can fail except the enrollment plan, whose preconditions are checked explicitly.
//!
//! - [`observations`]: observations, including groups and voids of hidden answers
//! - [`orders`]: new and voided test orders
//! - [`identifiers`]: submitted patient identifiers
//! - [`encounter`]: the encounter payload, created fresh or merged onto the one on record
//! - [`enrollment`]: the program enrollment payload and its commit plan

pub mod encounter;
pub mod enrollment;
pub mod identifiers;
pub mod observations;
pub mod orders;

pub use encounter::{merge_encounter, prepare_encounter};
pub use enrollment::{
    enrollments_for_program, plan_program_enrollment, prepare_program_enrollment, EnrollmentPlan,
};
pub use identifiers::prepare_patient_identifiers;
pub use observations::prepare_obs;
pub use orders::prepare_orders;
