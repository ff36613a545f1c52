use std::fmt;
use thiserror::Error;

/// Broad failure class of a [`CompileError`]. Drivers map these onto process exit codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed class file: bad magic, truncated stream, circular or inconsistent constant pool.
    Decode,
    /// A bytecode, bootstrap factory or signature feature the compiler does not implement.
    Unsupported,
    /// An operand stack type mismatch the translator cannot reconcile.
    Type,
    /// A referenced class, method or field was not found in the inputs or library archives.
    Link,
    /// Internal invariant failure in an emitter. Always fatal.
    Emit,
    /// The cancellation flag was observed between method translations.
    Cancelled,
}

impl ErrorKind {
    /// Exit code reported when the error reaches the command line driver.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Decode => 1,
            ErrorKind::Unsupported => 2,
            ErrorKind::Link => 3,
            // Type and emit errors are compiler invariant failures, reported like decode errors
            ErrorKind::Type | ErrorKind::Emit => 1,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Decode => "decode error",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Type => "type error",
            ErrorKind::Link => "link error",
            ErrorKind::Emit => "emit error",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Single tagged error for all compilation failures, carrying a kind, a message and (when known)
/// the source line derived from the closest line number table entry.
///
/// Every error is fatal to the current compilation. There is no local retry.
#[derive(Debug, Error)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    /// Source line closest to the failure, from the method's line number table.
    pub line: Option<u32>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}: {} (line {})", self.kind, self.message, line),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn link(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Link, message)
    }

    pub fn emit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Emit, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "compilation cancelled")
    }

    /// Attaches a source line if one isn't recorded yet. Errors keep the line closest to where
    /// they were raised, so inner frames win.
    pub fn at_line(mut self, line: Option<u32>) -> Self {
        if self.line.is_none() {
            self.line = line;
        }
        self
    }
}

/// Finds the [`CompileError`] in an error chain, if any, for exit code mapping.
pub fn find_compile_error(error: &anyhow::Error) -> Option<&CompileError> {
    error.chain().find_map(|e| e.downcast_ref::<CompileError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_driver_contract() {
        assert_eq!(ErrorKind::Decode.exit_code(), 1);
        assert_eq!(ErrorKind::Unsupported.exit_code(), 2);
        assert_eq!(ErrorKind::Link.exit_code(), 3);
    }

    #[test]
    fn at_line_keeps_innermost_line() {
        let e = CompileError::type_error("i32 expected").at_line(Some(4));
        assert_eq!(e.line, Some(4));
        let e = e.at_line(Some(9));
        assert_eq!(e.line, Some(4));
    }

    #[test]
    fn find_compile_error_walks_context_chain() {
        let inner = CompileError::link("class Missing not found");
        let outer = anyhow::Error::new(inner).context("compiling Test.run()V");
        let found = find_compile_error(&outer).unwrap();
        assert_eq!(found.kind, ErrorKind::Link);
    }
}
