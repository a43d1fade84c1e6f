use mirror_fs::LogicalPath;
use proptest::prelude::*;

proptest! {
    #[test]
    fn normalization_invariants(s in "[a-zA-Z0-9._/\\\\-]{0,40}") {
        let path = LogicalPath::new(&s);
        let as_str = path.as_str();

        // Invariant 1: no backslashes survive normalization
        prop_assert!(!as_str.contains('\\'));

        // Invariant 2: no empty components
        prop_assert!(!as_str.contains("//"));
        prop_assert!(!as_str.starts_with('/'));
        prop_assert!(!as_str.ends_with('/'));

        // Invariant 3: normalization is idempotent
        prop_assert_eq!(LogicalPath::new(as_str), path);
    }

    #[test]
    fn join_then_parent_is_identity(base in "[a-z0-9/]{0,20}", name in "[a-z0-9]{1,10}") {
        let parent = LogicalPath::new(&base);
        let child = parent.join(&name);

        prop_assert_eq!(child.parent().unwrap(), parent);
        prop_assert_eq!(child.name().unwrap(), name.as_str());
    }

    #[test]
    fn components_rebuild_the_path(s in "[a-z0-9/]{0,30}") {
        let path = LogicalPath::new(&s);
        let rebuilt = path
            .components()
            .fold(LogicalPath::root(), |acc, c| acc.join(c));
        prop_assert_eq!(rebuilt, path);
    }
}
