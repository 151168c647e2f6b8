//! Diff inversion.

use super::{ArrayPosition, Diff, DiffMismatchError};
use std::collections::BTreeMap;

/// Returns the diff leading from a diff's "after" state back to "before".
///
/// Leaves swap their recorded values. In arrays, appended items become
/// items removed from the end and vice versa, so that the inverted diff
/// addresses positions of the array it is applied to. Index positions are
/// kept, they exist on both sides.
///
/// Inverting an inverted diff yields the diff itself.
///
/// # Errors
/// - Returns `DiffMismatchError` for array diffs whose positions do not
///   describe a prefix-preserving edit: appends not keyed `+0..+k-1` or not
///   pure insertions, removals not keyed `-1..-n` or not pure deletions, and
///   index entries that insert or delete.
pub fn invert_diff(diff: &Diff) -> Result<Diff, DiffMismatchError> {
    invert_at(diff, "$")
}

fn invert_at(diff: &Diff, path: &str) -> Result<Diff, DiffMismatchError> {
    match diff {
        Diff::Generic { before, after } => Ok(Diff::Generic {
            before: after.clone(),
            after: before.clone(),
        }),
        Diff::Object(properties) => properties
            .iter()
            .map(|(name, diff)| -> Result<(String, Diff), DiffMismatchError> {
                Ok((name.clone(), invert_at(diff, &format!("{path}.{name}"))?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Diff::Object),
        Diff::Array(positions) => invert_positions(positions, path).map(Diff::Array),
    }
}

/// Whether a sub-diff expects a value before and leaves one after.
fn sides(diff: &Diff) -> (bool, bool) {
    match diff {
        Diff::Generic { before, after } => (before.is_some(), after.is_some()),
        Diff::Array(_) | Diff::Object(_) => (true, true),
    }
}

fn invert_positions(
    positions: &BTreeMap<ArrayPosition, Diff>,
    path: &str,
) -> Result<BTreeMap<ArrayPosition, Diff>, DiffMismatchError> {
    // Positions iterate as indices, then appends, then removals, each
    // ascending, so runs are checked by counting.
    let mut appended = 0;
    let mut removed = 0;
    for (position, diff) in positions {
        let entry_path = format!("{path}[{position}]");
        match (*position, sides(diff)) {
            (ArrayPosition::Index(_), (true, true)) => {}
            (ArrayPosition::Index(_), _) => {
                return Err(DiffMismatchError::new(
                    entry_path,
                    "index entry inserts or deletes an item",
                ))
            }
            (ArrayPosition::Append(offset), entry_sides) => {
                if offset != appended {
                    return Err(DiffMismatchError::new(
                        entry_path,
                        format!("expected append position +{appended}"),
                    ));
                }
                if entry_sides != (false, true) {
                    return Err(DiffMismatchError::new(
                        entry_path,
                        "append entry must only insert",
                    ));
                }
                appended += 1;
            }
            (ArrayPosition::FromEnd(offset), entry_sides) => {
                if offset != removed + 1 {
                    return Err(DiffMismatchError::new(
                        entry_path,
                        format!("expected removal position -{}", removed + 1),
                    ));
                }
                if entry_sides != (true, false) {
                    return Err(DiffMismatchError::new(
                        entry_path,
                        "removal entry must only delete",
                    ));
                }
                removed += 1;
            }
        }
    }

    positions
        .iter()
        .map(|(position, diff)| -> Result<(ArrayPosition, Diff), DiffMismatchError> {
            let inverted = match *position {
                ArrayPosition::Index(index) => ArrayPosition::Index(index),
                ArrayPosition::Append(offset) => ArrayPosition::FromEnd(appended - offset),
                ArrayPosition::FromEnd(offset) => ArrayPosition::Append(removed - offset),
            };
            let entry_path = format!("{path}[{position}]");
            Ok((inverted, invert_at(diff, &entry_path)?))
        })
        .collect()
}
