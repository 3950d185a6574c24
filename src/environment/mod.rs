//! Environment resolution for spawned processes
//!
//! Actions launched by the daemon should see the same variables a freshly
//! logged-in shell would, not the possibly stale environment the daemon was
//! started with. The process environment is overridden by machine-scope
//! persisted variables, which are in turn overridden by user-scope ones.

#[cfg(windows)]
mod registry;

/// Variables whose system and user values are joined instead of replaced
const CONCATENATED: &[&str] = &["Path", "PSModulePath"];

/// Separator used when joining path-list variables
const LIST_SEPARATOR: char = ';';

/// Ordered `name=value` table with case-insensitive names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvTable {
    entries: Vec<(String, String)>,
}

impl EnvTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `name=value` pairs, later duplicates winning
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = Self::new();
        for (k, v) in pairs {
            table.set(k, v);
        }
        table
    }

    /// Look up a value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Insert or overwrite a value, keeping the original position
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in table order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sort entries by name, ignoring case, as Windows expects of an
    /// environment block
    pub fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.0.to_uppercase().cmp(&b.0.to_uppercase()));
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Merge the three scopes into one table.
///
/// Machine values override process values and user values override both,
/// except for `Path` and `PSModulePath`, where the user value is appended to
/// the system value. Names starting with `=` (drive-letter bookkeeping) are
/// dropped. `%NAME%` references are expanded once all scopes are merged.
pub fn merge(process: EnvTable, system: &EnvTable, user: &EnvTable) -> EnvTable {
    let mut merged = EnvTable::new();
    for (k, v) in process.entries {
        if !k.starts_with('=') && !k.is_empty() {
            merged.set(k, v);
        }
    }
    for (k, v) in system.iter() {
        merged.set(k, v);
    }
    for (k, v) in user.iter() {
        if CONCATENATED.iter().any(|c| c.eq_ignore_ascii_case(k)) {
            let joined = match merged.get(k) {
                Some(existing) if !existing.is_empty() => {
                    format!("{existing}{LIST_SEPARATOR}{v}")
                }
                _ => v.to_string(),
            };
            merged.set(k, joined);
        } else {
            merged.set(k, v);
        }
    }

    let snapshot = merged.clone();
    for entry in &mut merged.entries {
        entry.1 = expand_variables(&entry.1, |name| snapshot.get(name).map(str::to_owned));
    }
    merged
}

/// Replace `%NAME%` references using `lookup`.
///
/// Unknown names and unmatched `%` are left untouched, which mirrors how the
/// shell treats them.
pub fn expand_variables<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('%') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if name.is_empty() {
            // "%%": keep one and rescan from the second
            out.push('%');
            rest = after;
            continue;
        }
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('%');
                out.push_str(name);
                out.push('%');
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Environment of the current process as a table
pub fn process_environment() -> EnvTable {
    EnvTable::from_pairs(std::env::vars_os().filter_map(|(k, v)| {
        Some((k.into_string().ok()?, v.into_string().ok()?))
    }))
}

/// Resolve the environment for a newly spawned action.
///
/// On Windows this re-reads the persisted machine and user variables so that
/// edits made after the daemon started are picked up. Elsewhere the process
/// environment is used as is.
pub fn resolve() -> EnvTable {
    #[cfg(windows)]
    {
        let system = registry::machine_variables().unwrap_or_else(|e| {
            tracing::warn!(?e, "cannot read machine environment");
            EnvTable::new()
        });
        let user = registry::user_variables().unwrap_or_else(|e| {
            tracing::warn!(?e, "cannot read user environment");
            EnvTable::new()
        });
        merge(process_environment(), &system, &user)
    }
    #[cfg(not(windows))]
    {
        merge(process_environment(), &EnvTable::new(), &EnvTable::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> EnvTable {
        EnvTable::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_lookup_ignores_case() {
        let t = table(&[("Path", "C:\\bin")]);
        assert_eq!(t.get("PATH"), Some("C:\\bin"));
        assert_eq!(t.get("path"), Some("C:\\bin"));
    }

    #[test]
    fn test_user_overrides_system_overrides_process() {
        let merged = merge(
            table(&[("TEMP", "proc"), ("COMPUTERNAME", "box")]),
            &table(&[("TEMP", "sys")]),
            &table(&[("temp", "user")]),
        );
        assert_eq!(merged.get("TEMP"), Some("user"));
        assert_eq!(merged.get("COMPUTERNAME"), Some("box"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_path_concatenates_system_first() {
        let merged = merge(
            table(&[("Path", "stale")]),
            &table(&[("Path", "C:\\Windows"), ("PSModulePath", "sysmods")]),
            &table(&[("PATH", "C:\\Users\\me\\bin"), ("PsModulePath", "usermods")]),
        );
        assert_eq!(merged.get("Path"), Some("C:\\Windows;C:\\Users\\me\\bin"));
        assert_eq!(merged.get("PSModulePath"), Some("sysmods;usermods"));
    }

    #[test]
    fn test_user_path_without_system_path() {
        let merged = merge(EnvTable::new(), &EnvTable::new(), &table(&[("Path", "u")]));
        assert_eq!(merged.get("Path"), Some("u"));
    }

    #[test]
    fn test_drive_entries_are_dropped() {
        let merged = merge(table(&[("=C:", "C:\\"), ("A", "1")]), &EnvTable::new(), &EnvTable::new());
        assert_eq!(merged.len(), 1);
        assert!(merged.get("=C:").is_none());
    }

    #[test]
    fn test_values_are_expanded_after_merge() {
        let merged = merge(
            table(&[("USERPROFILE", "C:\\Users\\me")]),
            &EnvTable::new(),
            &table(&[("TOOLS", "%USERPROFILE%\\tools")]),
        );
        assert_eq!(merged.get("TOOLS"), Some("C:\\Users\\me\\tools"));
    }

    #[test]
    fn test_expand_variables() {
        let lookup = |name: &str| (name == "HOME").then(|| "/home/me".to_string());
        assert_eq!(expand_variables("%HOME%/x", lookup), "/home/me/x");
        assert_eq!(expand_variables("%NOPE%/x", lookup), "%NOPE%/x");
        assert_eq!(expand_variables("100% done", lookup), "100% done");
        assert_eq!(expand_variables("%%HOME%", lookup), "%/home/me");
        assert_eq!(expand_variables("a%NOPE%HOME%", lookup), "a%NOPE%HOME%");
    }

    #[test]
    fn test_sort_ignores_case() {
        let mut t = table(&[("b", "2"), ("A", "1"), ("c", "3")]);
        t.sort();
        let names: Vec<_> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["A", "b", "c"]);
    }
}
