use std::fs;
use std::path::Path;

use log::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

/// Hidden entries (leading '.') are skipped at every depth.
fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Hands every file denoted by `target` to `on_file`, one at a time in
/// discovery order. A directory target is walked recursively; a plain file is
/// handed over directly. Per-entry enumeration errors are logged and the walk
/// continues.
pub fn process_target<F: FnMut(&Path)>(target: &Path, mut on_file: F) {
    let base = match target.canonicalize() {
        Ok(base) => base,
        Err(e) => {
            debug!("Unable to canonicalize {:?} ({e}), using it as given", target);
            target.to_owned()
        }
    };
    debug!("Base path: {:?}", base);

    let is_directory = match fs::metadata(&base) {
        Ok(metadata) => metadata.is_dir(),
        Err(e) => {
            error!(
                "Unable to determine if {:?} refers to a folder or not ({e}) - assuming it does",
                base
            );
            true
        }
    };

    if !is_directory {
        on_file(&base);
        return;
    }

    for entry in WalkDir::new(&base)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        match entry {
            Ok(entry) => {
                debug!("Found {:?}", entry.path());
                if entry.file_type().is_file() {
                    on_file(entry.path());
                }
            }
            Err(e) => warn!("Error enumerating under {:?}: {e}", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn collect_names(target: &Path) -> Vec<String> {
        let mut seen = Vec::new();
        process_target(target, |p| {
            seen.push(p.file_name().unwrap().to_string_lossy().into_owned());
        });
        seen.sort();
        seen
    }

    #[test]
    fn walks_directories_recursively_skipping_hidden_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.gpx"), "x").unwrap();
        fs::write(dir.path().join(".hidden.gpx"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.gpx"), "x").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("c.gpx"), "x").unwrap();

        assert_eq!(collect_names(dir.path()), vec!["a.gpx", "b.gpx"]);
    }

    #[test]
    fn subdirectories_themselves_are_not_handed_over() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        assert!(collect_names(dir.path()).is_empty());
    }

    #[test]
    fn plain_file_target_is_processed_directly() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.gpx");
        fs::write(&file, "x").unwrap();

        assert_eq!(collect_names(&file), vec!["a.gpx"]);
    }

    #[test]
    fn nonexistent_target_yields_nothing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no-such-entry");

        assert!(collect_names(&missing).is_empty());
    }
}
