//! Property coverage for `fat::path`'s lexical resolver (spec §4.8, §9
//! ambient test tooling), following the teacher's `proptest`-based style
//! for invariants that are awkward to pin down with example-based tests.

use diskim::fat::path::{render, resolve};
use proptest::prelude::*;

fn component() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,8}".prop_map(|s| s)
}

proptest! {
    #[test]
    fn resolve_never_panics_on_arbitrary_dotdot_runs(depth in 0usize..6, up_moves in 0usize..10) {
        let cwd: Vec<String> = (0..depth).map(|i| format!("d{i}")).collect();
        let path = "../".repeat(up_moves);
        let resolved = resolve(&cwd, &path);
        prop_assert!(resolved.len() <= cwd.len());
    }

    #[test]
    fn render_of_resolve_is_always_absolute(parts in proptest::collection::vec(component(), 0..5)) {
        let path = format!("/{}", parts.join("/"));
        let resolved = resolve(&[], &path);
        let rendered = render(&resolved);
        prop_assert!(rendered.starts_with('/'));
        prop_assert_eq!(resolved.len(), parts.len());
    }

    #[test]
    fn resolve_is_idempotent_on_already_resolved_paths(parts in proptest::collection::vec(component(), 0..5)) {
        let resolved_once = resolve(&[], &format!("/{}", parts.join("/")));
        let rendered = render(&resolved_once);
        let resolved_twice = resolve(&[], &rendered);
        prop_assert_eq!(resolved_once, resolved_twice);
    }
}
