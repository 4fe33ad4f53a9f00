//! # Encounter Submit Core
//!
//! Turns the state of a filled-in clinical form into the payloads an OpenMRS backend expects,
//! and dispatches them.
//!
//! - [`form`]: the field tree as read from the form-state layer
//! - [`assembly`]: pure transforms from fields to observations, orders, identifiers,
//!   encounters and program enrollments
//! - [`store`] and [`submission`]: the persistence seam and the service that drives it
//!
//! **No transport concerns**: HTTP clients, servers and the CLI live in the binaries. The
//! backend is reached only through a [`RecordStore`] supplied by the host.

pub mod assembly;
pub mod clock;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod form;
pub mod store;
pub mod submission;

pub use assembly::EnrollmentPlan;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::CoreConfig;
pub use context::{EncounterContext, EncounterSettings, SessionMode};
pub use error::{CoreError, CoreResult};
pub use form::{FieldKind, FormField, FormFields};
pub use store::{AttachmentUpload, RecordStore, RecordingStore, StoreCall, StoreError};
pub use submission::{AttachmentResult, EnrollmentOutcome, SubmissionService};
