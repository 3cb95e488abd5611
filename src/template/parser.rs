//! Key template parser
//!
//! Turns template text into a flat list of nodes. Literal text is copied
//! through; `{{ }}` actions call a function or emit a quoted string:
//!
//! ```text
//! uploads/{{ dateWithFormat "%Y/%m/%d" }}/{{ fileName }}
//! {{- /* trim markers and comments are allowed */ -}}
//! ```
//!
//! Only the functions in [`Func`] may be called, and every call must supply
//! exactly the number of string arguments the function takes.

use super::CompileError;
use chrono::format::{Item, StrftimeItems};

/// Functions a key template may call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    AbsoluteFilePath,
    DateWithFormat,
    FileExtension,
    FileName,
    FileNameWithoutExtension,
    FilePath,
}

impl Func {
    /// Every callable function, in the order they are documented
    pub const ALL: [Func; 6] = [
        Func::AbsoluteFilePath,
        Func::DateWithFormat,
        Func::FileExtension,
        Func::FileName,
        Func::FileNameWithoutExtension,
        Func::FilePath,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|func| func.name() == name)
    }

    /// Name used to call the function from template text
    pub fn name(self) -> &'static str {
        match self {
            Func::AbsoluteFilePath => "absoluteFilePath",
            Func::DateWithFormat => "dateWithFormat",
            Func::FileExtension => "fileExtension",
            Func::FileName => "fileName",
            Func::FileNameWithoutExtension => "fileNameWithoutExtension",
            Func::FilePath => "filePath",
        }
    }

    /// Number of string arguments the function takes
    pub fn arity(self) -> usize {
        match self {
            Func::DateWithFormat => 1,
            _ => 0,
        }
    }
}

/// A compiled piece of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text copied into the key
    Text(String),
    /// A quoted string written as an action, e.g. `{{ "raw" }}`
    Literal(String),
    /// A function call with its string arguments
    Call { func: Func, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Parse template text into nodes
pub fn parse(text: &str) -> Result<Vec<Node>, CompileError> {
    let mut nodes = Vec::new();
    let mut rest = text;
    let mut offset = 0;
    let mut trim_next_text = false;

    while let Some(start) = rest.find(OPEN) {
        let mut literal = &rest[..start];
        if trim_next_text {
            literal = literal.trim_start();
        }

        let action_start = start + OPEN.len();
        let (inner, consumed) = split_action(&rest[action_start..], offset + action_start)?;

        let (inner, trim_left) = match inner.strip_prefix("- ") {
            Some(stripped) => (stripped, true),
            None => (inner, false),
        };
        let (inner, trim_right) = match inner.strip_suffix(" -") {
            Some(stripped) => (stripped, true),
            None => (inner, false),
        };
        if trim_left {
            literal = literal.trim_end();
        }
        if !literal.is_empty() {
            nodes.push(Node::Text(literal.to_string()));
        }

        if let Some(node) = parse_action(inner, offset + start)? {
            nodes.push(node);
        }

        trim_next_text = trim_right;
        let advance = action_start + consumed;
        rest = &rest[advance..];
        offset += advance;
    }

    let tail = if trim_next_text {
        rest.trim_start()
    } else {
        rest
    };
    if !tail.is_empty() {
        nodes.push(Node::Text(tail.to_string()));
    }

    Ok(nodes)
}

/// Find the closing delimiter of an action, skipping over quoted strings.
///
/// Returns the action body and the number of bytes consumed including `}}`.
fn split_action(source: &str, offset: usize) -> Result<(&str, usize), CompileError> {
    let bytes = source.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if source[i..].starts_with(CLOSE) => {
                return Ok((&source[..i], i + CLOSE.len()));
            }
            None => {}
        }
        i += 1;
    }

    let message = match quote {
        Some(_) => "unterminated quoted string",
        None => "unclosed action",
    };
    Err(CompileError::Syntax {
        offset,
        message: message.to_string(),
    })
}

fn parse_action(inner: &str, offset: usize) -> Result<Option<Node>, CompileError> {
    let body = inner.trim();

    if let Some(comment) = body.strip_prefix("/*") {
        if comment.ends_with("*/") {
            return Ok(None);
        }
        return Err(CompileError::Syntax {
            offset,
            message: "unclosed comment".to_string(),
        });
    }

    let tokens = tokenize(body, offset)?;
    let mut tokens = tokens.into_iter();

    match tokens.next() {
        None => Err(CompileError::Syntax {
            offset,
            message: "missing value for command".to_string(),
        }),
        Some(Token::Str(value)) => {
            if tokens.next().is_some() {
                return Err(CompileError::Syntax {
                    offset,
                    message: format!("unexpected argument after string {value:?}"),
                });
            }
            Ok(Some(Node::Literal(value)))
        }
        Some(Token::Ident(name)) => {
            let func =
                Func::from_name(&name).ok_or(CompileError::UnknownFunction { name })?;

            let mut args = Vec::new();
            for token in tokens {
                match token {
                    Token::Str(value) => args.push(value),
                    Token::Ident(ident) => {
                        return Err(CompileError::Syntax {
                            offset,
                            message: format!(
                                "argument to {} must be a quoted string, found {ident}",
                                func.name()
                            ),
                        })
                    }
                }
            }

            if args.len() != func.arity() {
                return Err(CompileError::WrongArity {
                    name: func.name(),
                    expected: func.arity(),
                    got: args.len(),
                });
            }

            if func == Func::DateWithFormat {
                validate_date_layout(&args[0])?;
            }

            Ok(Some(Node::Call { func, args }))
        }
    }
}

fn tokenize(body: &str, offset: usize) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else if c == '"' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, '\\')) => value.push('\\'),
                        Some((_, '"')) => value.push('"'),
                        Some((_, other)) => {
                            return Err(CompileError::Syntax {
                                offset: offset + pos,
                                message: format!("unknown escape sequence \\{other}"),
                            })
                        }
                        None => break,
                    },
                    Some((_, c)) => value.push(c),
                    None => {
                        return Err(CompileError::Syntax {
                            offset: offset + pos,
                            message: "unterminated quoted string".to_string(),
                        })
                    }
                }
            }
            tokens.push(Token::Str(value));
        } else if c == '`' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some((_, '`')) => break,
                    Some((_, c)) => value.push(c),
                    None => {
                        return Err(CompileError::Syntax {
                            offset: offset + pos,
                            message: "unterminated raw string".to_string(),
                        })
                    }
                }
            }
            tokens.push(Token::Str(value));
        } else {
            return Err(CompileError::Syntax {
                offset: offset + pos,
                message: format!("unexpected {c:?} in action"),
            });
        }
    }

    Ok(tokens)
}

fn validate_date_layout(layout: &str) -> Result<(), CompileError> {
    if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
        return Err(CompileError::InvalidDateLayout {
            layout: layout.to_string(),
        });
    }
    Ok(())
}
