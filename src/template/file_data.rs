//! Per-file data exposed to key templates

use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Metadata about the file a key is being rendered for.
///
/// Built fresh for every render and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct FileContext {
    path: PathBuf,
    file_name: String,
    now: DateTime<Local>,
}

impl FileContext {
    /// Create a context for `path` as given by the caller.
    ///
    /// `file_name` is the base name reported by the file system stat.
    pub fn new(path: impl Into<PathBuf>, file_name: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            path: path.into(),
            file_name: file_name.into(),
            now,
        }
    }

    /// Create a context from a path that has already been stat'd
    pub fn from_path(path: &Path, now: DateTime<Local>) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(path, file_name, now)
    }

    /// Absolute path of the file, resolved against the working directory
    /// when the given path was relative
    pub fn absolute_file_path(&self) -> io::Result<String> {
        if self.path.is_absolute() {
            return Ok(self.path.to_string_lossy().into_owned());
        }

        let cwd = std::env::current_dir()?;
        Ok(clean(&cwd.join(&self.path)).to_string_lossy().into_owned())
    }

    /// Current time rendered with a strftime layout
    pub fn date_with_format(&self, layout: &str) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        write!(out, "{}", self.now.format(layout))?;
        Ok(out)
    }

    /// Extension including the leading dot, e.g. `.txt`
    pub fn file_extension(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(idx) => &self.file_name[idx..],
            None => "",
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_name_without_extension(&self) -> &str {
        let ext = self.file_extension();
        &self.file_name[..self.file_name.len() - ext.len()]
    }

    /// The path exactly as it was handed to the templater
    pub fn file_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Lexically normalise a path: drop `.` segments and fold `..` into the
/// preceding segment.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
