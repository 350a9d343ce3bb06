//! Path utilities for owner storage namespaces and archive entry names.
//!
//! Every owner has an isolated directory below the upload root. File
//! references coming from clients are relative paths inside that directory
//! and are resolved here, rejecting anything that would escape it.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::ids::OwnerId;

/// Root directory holding one namespace directory per owner.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The namespace directory of one owner.
    pub fn owner_dir(&self, owner: &OwnerId) -> PathBuf {
        self.root.join(owner.as_str())
    }

    /// Resolve a client file reference inside the owner's namespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediabatch_common::paths::StorageRoot;
    /// use mediabatch_common::OwnerId;
    /// use std::path::Path;
    ///
    /// let storage = StorageRoot::new("/srv/uploads");
    /// let owner = OwnerId::new("alice").unwrap();
    ///
    /// let path = storage.resolve(&owner, "trip/day1.png").unwrap();
    /// assert_eq!(path, Path::new("/srv/uploads/alice/trip/day1.png"));
    ///
    /// assert!(storage.resolve(&owner, "../bob/secret.png").is_err());
    /// ```
    pub fn resolve(&self, owner: &OwnerId, reference: &str) -> Result<PathBuf> {
        let relative = sanitize_reference(reference)?;
        Ok(self.owner_dir(owner).join(relative))
    }
}

/// Turn a client-supplied reference into a relative path with only normal
/// components. `.` segments are dropped; `..`, roots and prefixes are errors.
pub fn sanitize_reference(reference: &str) -> Result<PathBuf> {
    if reference.contains('\0') {
        return Err(Error::validation("file reference contains a NUL byte"));
    }

    let normalized = reference.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::validation(format!(
                    "file reference escapes the storage namespace: {reference}"
                )));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(Error::validation("empty file reference"));
    }
    Ok(relative)
}

/// The path component after the last separator.
///
/// # Examples
///
/// ```
/// use mediabatch_common::paths::base_name;
///
/// assert_eq!(base_name("a/b/c.png"), "c.png");
/// assert_eq!(base_name("c.png"), "c.png");
/// assert_eq!(base_name("dir\\c.png"), "c.png");
/// ```
pub fn base_name(reference: &str) -> &str {
    reference.rsplit(['/', '\\']).next().unwrap_or(reference)
}

/// Replace (or add) the extension of an entry name.
///
/// A leading dot marks a hidden file, not an extension.
///
/// # Examples
///
/// ```
/// use mediabatch_common::paths::replace_extension;
///
/// assert_eq!(replace_extension("photo.png", "webp"), "photo.webp");
/// assert_eq!(replace_extension("archive.tar.gz", "png"), "archive.tar.png");
/// assert_eq!(replace_extension("README", "png"), "README.png");
/// assert_eq!(replace_extension(".hidden", "png"), ".hidden.png");
/// ```
pub fn replace_extension(name: &str, extension: &str) -> String {
    let (stem, _) = split_extension(name);
    format!("{stem}.{extension}")
}

/// Insert a numeric suffix before the extension: `a.png` → `a-2.png`.
pub fn with_suffix(name: &str, n: usize) -> String {
    match split_extension(name) {
        (stem, Some(ext)) => format!("{stem}-{n}.{ext}"),
        (stem, None) => format!("{stem}-{n}"),
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}
