use string_interner::{DefaultBackend, StringInterner};
use thiserror::Error;

pub mod analyze;
pub mod ast;
pub mod generate;
pub mod ir;
pub mod lex;
pub mod parse;

#[cfg(test)]
mod test;

pub use string_interner::DefaultSymbol as Symbol;
pub type Interner = StringInterner<DefaultBackend>;

pub type Address = u16;

pub use self::analyze::{AnalysisError, AnalysisErrorKind};
pub use self::generate::{GenerationError, GenerationErrorKind, Rom};
pub use self::lex::{LexError, LexErrorKind};
pub use self::parse::{ParseError, ParseErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Address of the first emitted byte.
    pub origin: Address,
    /// One past the last address a program may occupy.
    pub memory_end: usize,
    pub max_expansion_depth: usize,
    /// Constants declared before the first line of the source.
    pub defines: Vec<(String, i64)>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            origin: 0x200,
            memory_end: 0x1000,
            max_expansion_depth: 64,
            defines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl Error {
    pub fn line(&self) -> u32 {
        match self {
            Error::Lex(e) => e.line,
            Error::Parse(e) => e.line,
            Error::Analysis(e) => e.line,
            Error::Generation(e) => e.line,
        }
    }
}

/// Runs the whole pipeline over one source file.
pub fn compile(src: &str, options: &Options) -> Result<Rom, Error> {
    let mut si = Interner::default();
    let tokens = lex::lex(src, &mut si)?;
    tracing::debug!(tokens = tokens.len(), "lexed");
    let statements = parse::parse(&tokens, &si)?;
    tracing::debug!(statements = statements.len(), "parsed");
    let resolved = analyze::analyze(&statements, &mut si, options)?;
    tracing::debug!(statements = resolved.len(), "analyzed");
    let rom = generate::generate(&resolved, &si, options)?;
    tracing::debug!(bytes = rom.bytes.len(), labels = rom.labels.len(), "generated");
    Ok(rom)
}
