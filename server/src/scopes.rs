use indexmap::IndexSet;

/// Requests may ask for at most this many scopes. Extra entries are dropped.
pub const MAX_SCOPES: usize = 8;

/// Reads a comma separated scopes header. Entries are trimmed, empty entries
/// dropped and repeats removed keeping the first occurrence.
pub fn parse_scopes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .collect::<IndexSet<&str>>()
        .into_iter()
        .take(MAX_SCOPES)
        .map(str::to_string)
        .collect()
}
