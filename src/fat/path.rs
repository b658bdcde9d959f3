//! POSIX-like, case-insensitive path resolution helpers (spec §4.8).
//!
//! Grounded in `examples/original_source/diskfs/fat/path.py`'s `_Flavour`
//! (a case-insensitive `pathlib` flavour): only the case-folding and lexical
//! `.`/`..` resolution this crate actually needs are kept -- a full
//! `Path`/`PurePath` object model is out of scope, so this is a handful of
//! free functions operating on `&str`/`Vec<String>` rather than a type.

/// Case-folds a path component the way FAT filename comparisons do.
pub fn casefold(s: &str) -> String {
    s.to_lowercase()
}

/// Whether `path` is absolute (starts with `/`).
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Splits `path` into its non-empty components, left to right. `.` segments
/// are dropped eagerly since they never affect resolution; `..` segments are
/// kept for [`resolve`] to interpret against the base it's given.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

/// Resolves `path` against `cwd` (an absolute component stack) the way a
/// lexical, symlink-free POSIX resolver would: `..` pops the last component
/// (a no-op at the root, never an error), `.` is dropped, everything else is
/// pushed verbatim. Returns the resolved absolute component stack.
pub fn resolve(cwd: &[String], path: &str) -> Vec<String> {
    let mut stack: Vec<String> = if is_absolute(path) {
        Vec::new()
    } else {
        cwd.to_vec()
    };

    for component in components(path) {
        if component == ".." {
            stack.pop();
        } else {
            stack.push(component.to_string());
        }
    }
    stack
}

/// Renders an absolute component stack back into a `/`-separated path
/// string (`realpath`'s output form). The root is `"/"`.
pub fn render(components: &[String]) -> String {
    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Splits `path` into `(parent_components, final_component)`. Returns `None`
/// if `path` resolves to the root itself (no final component to split off).
pub fn split_parent(cwd: &[String], path: &str) -> Option<(Vec<String>, String)> {
    let mut resolved = resolve(cwd, path);
    let last = resolved.pop()?;
    Some((resolved, last))
}

/// Case-insensitive component equality, matching the case-insensitive
/// `_Flavour.casefold` the original resolver used for every comparison.
pub fn components_eq(a: &str, b: &str) -> bool {
    casefold(a) == casefold(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn resolves_absolute_path() {
        assert_eq!(resolve(&root(), "/foo/bar"), vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn resolves_relative_to_cwd() {
        let cwd = vec!["foo".to_string()];
        assert_eq!(resolve(&cwd, "bar"), vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn dot_dot_pops_a_component() {
        let cwd = vec!["foo".to_string(), "bar".to_string()];
        assert_eq!(resolve(&cwd, ".."), vec!["foo".to_string()]);
    }

    #[test]
    fn dot_dot_at_root_is_a_no_op() {
        assert_eq!(resolve(&root(), "../../.."), Vec::<String>::new());
    }

    #[test]
    fn render_round_trips_through_resolve() {
        let resolved = resolve(&root(), "/a/b/c");
        assert_eq!(render(&resolved), "/a/b/c");
        assert_eq!(render(&root()), "/");
    }

    #[test]
    fn split_parent_separates_final_component() {
        let (parent, name) = split_parent(&root(), "/a/b/file.txt").unwrap();
        assert_eq!(parent, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(name, "file.txt");
    }

    #[test]
    fn split_parent_of_root_is_none() {
        assert!(split_parent(&root(), "/").is_none());
    }

    #[test]
    fn component_equality_is_case_insensitive() {
        assert!(components_eq("FOO", "foo"));
        assert!(!components_eq("foo", "bar"));
    }
}
