//! Replaces output directories as a whole, or not at all.
//!
//! The planned files are compared by sha256 with what is on disk. When anything
//! differs the new tree is written into a staging directory beside the target and
//! swapped in with two renames, so readers only ever see the old or the new set.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;

use super::images::hex_digest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirOutcome {
    /// Files that are new or whose content changed.
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Whether the directory was swapped.
    pub replaced: bool,
}

/// Current `name -> sha256` listing of the regular files directly inside `dir`.
pub fn digest_dir(dir: &Path) -> io::Result<BTreeMap<String, String>> {
    let mut digests = BTreeMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(digests),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        digests.insert(name, hex_digest(&fs::read(entry.path())?));
    }
    Ok(digests)
}

/// Make `target` contain exactly `files`.
pub fn replace_dir(target: &Path, files: &BTreeMap<String, Bytes>) -> io::Result<DirOutcome> {
    let current = digest_dir(target)?;
    let mut outcome = DirOutcome::default();
    for (name, bytes) in files {
        match current.get(name) {
            Some(digest) if *digest == hex_digest(bytes) => outcome.unchanged += 1,
            _ => outcome.written += 1,
        }
    }
    outcome.removed = current.keys().filter(|name| !files.contains_key(*name)).count();

    if outcome.written == 0 && outcome.removed == 0 {
        debug!(target = "folio::sync", dir = %target.display(), "directory already up to date");
        return Ok(outcome);
    }

    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".folio-staging-")
        .tempdir_in(&parent)?;
    for (name, bytes) in files {
        fs::write(staging.path().join(name), bytes)?;
    }

    let staged = staging.keep();
    if target.exists() {
        let retired = parent.join(format!(".folio-retired-{}", Uuid::new_v4().simple()));
        fs::rename(target, &retired)?;
        if let Err(err) = fs::rename(&staged, target) {
            fs::rename(&retired, target)?;
            return Err(err);
        }
        fs::remove_dir_all(&retired)?;
    } else {
        fs::rename(&staged, target)?;
    }

    outcome.replaced = true;
    info!(
        target = "folio::sync",
        dir = %target.display(),
        written = outcome.written,
        unchanged = outcome.unchanged,
        removed = outcome.removed,
        "directory replaced"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Bytes> {
        entries
            .iter()
            .map(|(name, body)| (name.to_string(), Bytes::from(body.to_string())))
            .collect()
    }

    #[test]
    fn creates_missing_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let target = root.path().join("posts");
        let outcome = replace_dir(&target, &files(&[("a.md", "A")])).expect("replace");
        assert!(outcome.replaced);
        assert_eq!(outcome.written, 1);
        assert_eq!(fs::read_to_string(target.join("a.md")).expect("read"), "A");
    }

    #[test]
    fn identical_plan_touches_nothing() {
        let root = tempfile::tempdir().expect("tempdir");
        let target = root.path().join("posts");
        let plan = files(&[("a.md", "A"), ("b.md", "B")]);
        replace_dir(&target, &plan).expect("first");
        let second = replace_dir(&target, &plan).expect("second");
        assert!(!second.replaced);
        assert_eq!((second.written, second.unchanged), (0, 2));
    }

    #[test]
    fn stale_files_are_removed_and_no_staging_is_left() {
        let root = tempfile::tempdir().expect("tempdir");
        let target = root.path().join("posts");
        replace_dir(&target, &files(&[("a.md", "A"), ("old.md", "O")])).expect("first");
        let outcome = replace_dir(&target, &files(&[("a.md", "A2")])).expect("second");
        assert_eq!((outcome.written, outcome.removed), (1, 1));
        assert!(!target.join("old.md").exists());

        let leftovers: Vec<_> = fs::read_dir(root.path())
            .expect("list")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".folio-"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
