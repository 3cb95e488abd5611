//! Key template module
//!
//! Derives the object key for each uploaded file from a user supplied
//! template. A template is compiled once at startup and then shared by every
//! worker in the pipeline.
//!
//! # Functions
//!
//! | Function | Output |
//! |----------|--------|
//! | `absoluteFilePath` | Absolute local path, resolved against the working directory |
//! | `dateWithFormat "<layout>"` | Current time formatted with a strftime layout |
//! | `fileExtension` | Extension including the dot, e.g. `.txt` |
//! | `fileName` | File name without preceding directories |
//! | `fileNameWithoutExtension` | File name with the extension removed |
//! | `filePath` | Path exactly as it was discovered |
//!
//! # Example
//!
//! ```no_run
//! use funnel::template::KeyTemplate;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let template = KeyTemplate::compile(r#"logs/{{ dateWithFormat "%Y/%m/%d" }}/{{ fileName }}"#)?;
//! let key = template.key_for_file(Path::new("/var/log/app.log")).await?;
//! println!("{key}");
//! # Ok(())
//! # }
//! ```

pub mod file_data;
pub mod parser;

pub use file_data::FileContext;
pub use parser::Func;

use chrono::Local;
use parking_lot::Mutex;
use parser::Node;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Template compilation errors
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("template syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("function {name:?} not defined")]
    UnknownFunction { name: String },

    #[error("wrong number of args for {name}: want {expected} got {got}")]
    WrongArity {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid date layout {layout:?}")]
    InvalidDateLayout { layout: String },
}

/// Key rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to stat file: {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse absolute path for file: {}: {source}", path.display())]
    AbsolutePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to format date for file: {}", path.display())]
    DateFormat { path: PathBuf },
}

/// A compiled key template.
///
/// Rendering installs the current file into a shared context slot under a
/// lock, evaluates the template against it and clears the slot again, so
/// concurrent callers never observe each other's file data. The file stat
/// happens before the lock is taken.
#[derive(Debug)]
pub struct KeyTemplate {
    source: String,
    nodes: Vec<Node>,
    context: Mutex<Option<FileContext>>,
}

impl KeyTemplate {
    /// Compile template text, failing on any syntax error
    pub fn compile(text: &str) -> Result<Self, CompileError> {
        let nodes = parser::parse(text).inspect_err(|e| {
            tracing::error!(template = %text, error = %e, "Failed to parse key template");
        })?;

        Ok(Self {
            source: text.to_string(),
            nodes,
            context: Mutex::new(None),
        })
    }

    /// The template text this instance was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the key for a file on disk.
    ///
    /// The file must exist: a failed stat is returned as
    /// [`RenderError::Stat`].
    pub async fn key_for_file(&self, path: &Path) -> Result<String, RenderError> {
        tokio::fs::metadata(path)
            .await
            .map_err(|source| RenderError::Stat {
                path: path.to_path_buf(),
                source,
            })?;

        self.render(FileContext::from_path(path, Local::now()))
    }

    /// Render the key for an already constructed file context
    pub fn render(&self, data: FileContext) -> Result<String, RenderError> {
        let mut slot = self.context.lock();
        let current = slot.insert(data);
        let result = evaluate(&self.nodes, current);
        *slot = None;
        result
    }
}

fn evaluate(nodes: &[Node], data: &FileContext) -> Result<String, RenderError> {
    let mut key = String::new();

    for node in nodes {
        match node {
            Node::Text(text) | Node::Literal(text) => key.push_str(text),
            Node::Call { func, args } => match func {
                Func::AbsoluteFilePath => {
                    let abs = data
                        .absolute_file_path()
                        .map_err(|source| RenderError::AbsolutePath {
                            path: data.file_path().into(),
                            source,
                        })?;
                    key.push_str(&abs);
                }
                Func::DateWithFormat => {
                    let date = data.date_with_format(&args[0]).map_err(|_| {
                        RenderError::DateFormat {
                            path: data.file_path().into(),
                        }
                    })?;
                    key.push_str(&date);
                }
                Func::FileExtension => key.push_str(data.file_extension()),
                Func::FileName => key.push_str(data.file_name()),
                Func::FileNameWithoutExtension => key.push_str(data.file_name_without_extension()),
                Func::FilePath => key.push_str(&data.file_path()),
            },
        }
    }

    Ok(key)
}
