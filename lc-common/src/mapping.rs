use std::collections::HashMap;

use tracing::debug;

use crate::records::TypedRecordSet;

/// Rename columns according to `mapping` (source column name to destination item name).
/// Columns not present in the mapping keep their name; order and types are preserved.
pub fn rename_columns(
    mut records: TypedRecordSet,
    mapping: &HashMap<String, String>,
) -> TypedRecordSet {
    if mapping.is_empty() {
        return records;
    }

    let renamed: Vec<String> = records
        .columns
        .iter()
        .map(|column| match mapping.get(column) {
            Some(target) => {
                debug!(from = %column, to = %target, "renaming column");
                target.to_owned()
            }
            None => column.to_owned(),
        })
        .collect();

    // Renames apply simultaneously, so `a -> b, b -> c` never clobbers a value.
    for record in records.rows.iter_mut() {
        let mut values = std::mem::take(&mut record.values);
        record.values = records
            .columns
            .iter()
            .zip(renamed.iter())
            .filter_map(|(from, to)| values.remove(from).map(|value| (to.to_owned(), value)))
            .collect();
    }
    records.columns = renamed;

    records
}
