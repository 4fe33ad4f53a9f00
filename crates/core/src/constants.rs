//! Constants used throughout the submission core.

/// Namespace stamped on group observations when none is configured.
pub const DEFAULT_FORM_NAMESPACE: &str = "rfe-forms";

/// Rendering name of file attachment fields.
pub const FILE_RENDERING: &str = "file";

/// Canonical date-time format for enrollment dates (offset with a colon, no fraction).
pub const CANONICAL_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Wire names of the field types the core assembles.
pub const OBS_FIELD_TYPE: &str = "obs";
pub const OBS_GROUP_FIELD_TYPE: &str = "obsGroup";
pub const TEST_ORDER_FIELD_TYPE: &str = "testOrder";
pub const PATIENT_IDENTIFIER_FIELD_TYPE: &str = "patientIdentifier";
pub const PROGRAM_STATE_FIELD_TYPE: &str = "programState";
