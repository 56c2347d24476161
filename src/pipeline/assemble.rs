//! Final document assembly.
//!
//! The pool returns results in whatever order units happened to finish. The
//! assembler restores source order by sorting on the unit index and wraps
//! every unit in a blank-line separator. It never edits the text itself.

use crate::pipeline::pool::ResultSet;

/// Placed before and after every unit's text.
pub const UNIT_SEPARATOR: &str = "\n\n";

/// Join `(index, text)` pairs in ascending index order.
pub fn assemble<I, S>(results: I) -> String
where
    I: IntoIterator<Item = (usize, S)>,
    S: AsRef<str>,
{
    let mut units: Vec<(usize, S)> = results.into_iter().collect();
    units.sort_by_key(|(index, _)| *index);

    let capacity = units
        .iter()
        .map(|(_, text)| text.as_ref().len() + 2 * UNIT_SEPARATOR.len())
        .sum();
    let mut out = String::with_capacity(capacity);
    for (_, text) in &units {
        out.push_str(UNIT_SEPARATOR);
        out.push_str(text.as_ref());
        out.push_str(UNIT_SEPARATOR);
    }
    out
}

/// Assemble a finished run.
pub fn assemble_results(results: &ResultSet) -> String {
    assemble(results.texts())
}
