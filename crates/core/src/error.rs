use crate::store::StoreError;
use openmrs::PatientProgram;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid field {field_id}: {reason}")]
    InvalidField { field_id: String, reason: String },
    #[error("{0}")]
    FieldTree(String),

    #[error("patient is already enrolled in program {program}")]
    AlreadyEnrolled { program: String },
    #[error("patient has {count} active enrollments in program {program}, expected at most one")]
    MultipleActiveEnrollments { program: String, count: usize },

    #[error("persistence failed: {0}")]
    Store(#[source] StoreError),
    #[error("failed to close out the active enrollment: {0}")]
    EnrollmentCloseOut(#[source] StoreError),
    #[error(
        "enrollment {} was closed out but the new enrollment was not saved: {source}",
        .closed_out.uuid
    )]
    PartialEnrollmentTransition {
        closed_out: Box<PatientProgram>,
        #[source]
        source: StoreError,
    },

    #[error("OpenMRS error: {0}")]
    OpenMrs(#[from] openmrs::OpenMrsError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
