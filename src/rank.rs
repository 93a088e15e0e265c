//! Activity ranking of fetched records.

use crate::schemas::AddressRecord;

/// Sort by transaction count, most active first.
///
/// The sort is stable: records with equal `n_tx` keep their input order.
pub fn rank(mut records: Vec<AddressRecord>) -> Vec<AddressRecord> {
    records.sort_by(|a, b| b.n_tx.cmp(&a.n_tx));
    records
}
