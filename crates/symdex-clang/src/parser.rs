//! The seam between the indexing pipeline and the C/C++ front end. The
//! pipeline only ever talks to these traits; the `libclang` feature provides
//! the production backend and [`crate::scripted`] a programmable double.

use std::path::Path;
use symdex_core::{CursorKind, Location, Result};

/// One entry from the preprocessor's inclusion record: the included file and
/// the stack of files that led to its inclusion, innermost first. All paths
/// are canonical absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub file: String,
    pub stack: Vec<String>,
}

/// Parses one translation unit per call. Implementations are shared across
/// worker threads, so parsing must not require exclusive access.
pub trait SourceParser: Send + Sync {
    /// Parse `input` in incomplete mode with the given argument vector.
    /// A front end that produces no translation unit reports `Err`.
    fn parse(&self, input: &str, args: &[String]) -> Result<Box<dyn ParsedUnit + '_>>;
}

/// A successfully parsed translation unit.
pub trait ParsedUnit: Send {
    /// Every file the preprocessor pulled in, with its include stack.
    fn inclusions(&self) -> Vec<Inclusion>;

    /// Pre-order walk over every cursor below the translation-unit root.
    fn visit<'u>(&'u self, visitor: &mut dyn FnMut(&dyn Cursor<'u>));

    /// Serialize the unit as a precompiled-header artifact.
    fn save(&self, path: &Path) -> Result<()>;
}

/// A point in the AST. Graph edges (`referenced`, `definition`,
/// `semantic_parent`) return cursors bound to the unit's lifetime, not to the
/// cursor they were reached from, so chains of lookups can be walked freely.
pub trait Cursor<'u> {
    fn kind(&self) -> CursorKind;
    fn spelling(&self) -> String;
    fn display_name(&self) -> String;
    fn location(&self) -> Option<Location>;
    fn referenced(&self) -> Option<Box<dyn Cursor<'u> + 'u>>;
    fn definition(&self) -> Option<Box<dyn Cursor<'u> + 'u>>;
    fn semantic_parent(&self) -> Option<Box<dyn Cursor<'u> + 'u>>;
    fn is_definition(&self) -> bool;

    /// Identity within one translation unit; two handles to the same AST
    /// node report the same id.
    fn raw_id(&self) -> u64;
}

pub fn same_cursor<'u>(a: &dyn Cursor<'u>, b: &dyn Cursor<'u>) -> bool {
    a.raw_id() == b.raw_id()
}
