//! Test order assembly.

use crate::form::{FieldKind, FormField};
use openmrs::Order;

/// Collect the new and voided test orders of every `testOrder` field with a pending submission.
///
/// Each field contributes its new orders followed by its voided orders.
pub fn prepare_orders(fields: &[FormField]) -> Vec<Order> {
    fields
        .iter()
        .filter_map(|field| match &field.kind {
            FieldKind::TestOrder(submission) if submission.is_pending() => Some(submission),
            _ => None,
        })
        .flat_map(|submission| {
            submission
                .new_value
                .iter()
                .chain(submission.voided_value.iter())
                .flat_map(|orders| orders.iter().cloned())
        })
        .collect()
}
