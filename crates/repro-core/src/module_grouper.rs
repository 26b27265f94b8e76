//! Map failing test suites to the build modules that contain them.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Component, Path};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Build module (path relative to the workspace root) to suite names.
pub type ModuleMap = BTreeMap<String, BTreeSet<String>>;

const SOURCE_DIR: &str = "src";
const VCS_DIR: &str = ".git";

/// Module owning `relative` (a source file path relative to the root).
///
/// The module is everything before the last `src` directory that has at
/// least one more directory below it, e.g. `solr/core/src/test/Foo.java`
/// belongs to `solr/core`.
#[must_use]
pub fn module_for(relative: &Path) -> Option<String> {
    let dirs: Vec<&str> = relative
        .parent()?
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();
    let src = dirs
        .iter()
        .enumerate()
        .rev()
        .find(|&(idx, dir)| *dir == SOURCE_DIR && idx > 0 && idx + 1 < dirs.len())
        .map(|(idx, _)| idx)?;
    Some(dirs[..src].join("/"))
}

/// Walk the tree under `root` once and group the requested suites by module.
///
/// Suites with no matching source file are dropped silently.
#[must_use]
pub fn group_tests_by_module(
    root: &Path,
    source_extension: &str,
    tests: &BTreeSet<String>,
) -> ModuleMap {
    let mut modules = ModuleMap::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != OsStr::new(VCS_DIR));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension() != Some(OsStr::new(source_extension)) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(OsStr::to_str) else {
            continue;
        };
        if !tests.contains(stem) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        match module_for(relative) {
            Some(module) => {
                modules.entry(module).or_default().insert(stem.to_owned());
            }
            None => warn!(path = %relative.display(), "source file outside any module"),
        }
    }

    for (module, suites) in &modules {
        info!(module = %module, suites = ?suites, "test suites by module");
    }
    modules
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use proptest::prelude::*;

    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "class X {}").unwrap();
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn module_is_prefix_before_src() {
        assert_eq!(
            module_for(Path::new(
                "lucene/core/src/test/org/apache/lucene/FooTest.java"
            ))
            .as_deref(),
            Some("lucene/core")
        );
        assert_eq!(
            module_for(Path::new("solr/solrj/src/test/BarTest.java")).as_deref(),
            Some("solr/solrj")
        );
    }

    #[test]
    fn last_qualifying_src_wins() {
        assert_eq!(
            module_for(Path::new("a/src/b/src/test/FooTest.java")).as_deref(),
            Some("a/src/b")
        );
    }

    #[test]
    fn src_must_have_a_directory_below_it() {
        assert_eq!(module_for(Path::new("core/src/FooTest.java")), None);
        assert_eq!(module_for(Path::new("src/test/FooTest.java")), None);
        assert_eq!(module_for(Path::new("FooTest.java")), None);
    }

    #[test]
    fn groups_requested_suites_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "lucene/core/src/test/org/apache/FooTest.java");
        touch(root, "lucene/core/src/test/org/apache/OtherTest.java");
        touch(root, "solr/core/src/test/org/apache/BarTest.java");
        touch(root, "solr/core/src/test/org/apache/BazTest.txt");

        let wanted = names(&["FooTest", "BarTest", "BazTest"]);
        let modules = group_tests_by_module(root, "java", &wanted);

        let mut expected = ModuleMap::new();
        expected.insert("lucene/core".to_owned(), names(&["FooTest"]));
        expected.insert("solr/core".to_owned(), names(&["BarTest"]));
        assert_eq!(modules, expected);
    }

    #[test]
    fn missing_suite_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "lucene/core/src/test/FooTest.java");
        let modules = group_tests_by_module(dir.path(), "java", &names(&["GoneTest"]));
        assert!(modules.is_empty());
    }

    #[test]
    fn duplicate_sources_collapse() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "lucene/core/src/test/a/FooTest.java");
        touch(dir.path(), "lucene/core/src/test/b/FooTest.java");
        let modules = group_tests_by_module(dir.path(), "java", &names(&["FooTest"]));
        assert_eq!(modules["lucene/core"].len(), 1);
    }

    #[test]
    fn vcs_metadata_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".git/x/src/test/FooTest.java");
        let modules = group_tests_by_module(dir.path(), "java", &names(&["FooTest"]));
        assert!(modules.is_empty());
    }

    fn layout() -> impl Strategy<Value = Vec<(String, String)>> {
        proptest::collection::vec(
            (
                prop_oneof![
                    Just("lucene/core"),
                    Just("lucene/analysis/common"),
                    Just("solr/core"),
                ],
                "[A-E]Test",
            ),
            0..10,
        )
        .prop_map(|v| {
            v.into_iter()
                .map(|(module, test)| (module.to_owned(), test))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn grouping_is_idempotent(
            files in layout(),
            wanted in proptest::collection::btree_set("[A-F]Test", 0..6)
        ) {
            let dir = tempfile::tempdir().unwrap();
            for (module, test) in &files {
                let file = format!("{test}.java");
                let rel: PathBuf = [module.as_str(), "src", "test", "pkg", file.as_str()]
                    .iter()
                    .collect();
                touch(dir.path(), rel.to_str().unwrap());
            }
            let first = group_tests_by_module(dir.path(), "java", &wanted);
            let second = group_tests_by_module(dir.path(), "java", &wanted);
            prop_assert_eq!(&first, &second);
            for suites in first.values() {
                prop_assert!(suites.is_subset(&wanted));
            }
        }
    }
}
