use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Cursor kinds surfaced by the parser seam. Raw values follow libclang's
/// `CXCursorKind` so the FFI backend can map without a table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum CursorKind {
    UnexposedDecl,
    StructDecl,
    UnionDecl,
    ClassDecl,
    EnumDecl,
    FieldDecl,
    EnumConstantDecl,
    FunctionDecl,
    VarDecl,
    ParmDecl,
    TypedefDecl,
    CxxMethod,
    Namespace,
    Constructor,
    Destructor,
    ConversionFunction,
    CxxAccessSpecifier,
    TypeRef,
    CxxBaseSpecifier,
    TemplateRef,
    NamespaceRef,
    MemberRef,
    LabelRef,
    OverloadedDeclRef,
    VariableRef,
    InvalidFile,
    NoDeclFound,
    NotImplemented,
    InvalidCode,
    UnexposedExpr,
    DeclRefExpr,
    MemberRefExpr,
    CallExpr,
    MacroDefinition,
    MacroExpansion,
    InclusionDirective,
    TranslationUnit,
    Other(u32),
}

impl Default for CursorKind {
    fn default() -> Self {
        CursorKind::InvalidFile
    }
}

impl CursorKind {
    pub fn from_raw(raw: u32) -> Self {
        use CursorKind::*;
        match raw {
            1 => UnexposedDecl,
            2 => StructDecl,
            3 => UnionDecl,
            4 => ClassDecl,
            5 => EnumDecl,
            6 => FieldDecl,
            7 => EnumConstantDecl,
            8 => FunctionDecl,
            9 => VarDecl,
            10 => ParmDecl,
            20 => TypedefDecl,
            21 => CxxMethod,
            22 => Namespace,
            24 => Constructor,
            25 => Destructor,
            26 => ConversionFunction,
            39 => CxxAccessSpecifier,
            43 => TypeRef,
            44 => CxxBaseSpecifier,
            45 => TemplateRef,
            46 => NamespaceRef,
            47 => MemberRef,
            48 => LabelRef,
            49 => OverloadedDeclRef,
            50 => VariableRef,
            70 => InvalidFile,
            71 => NoDeclFound,
            72 => NotImplemented,
            73 => InvalidCode,
            100 => UnexposedExpr,
            101 => DeclRefExpr,
            102 => MemberRefExpr,
            103 => CallExpr,
            350 => TranslationUnit,
            501 => MacroDefinition,
            502 => MacroExpansion,
            503 => InclusionDirective,
            other => Other(other),
        }
    }

    pub fn raw(&self) -> u32 {
        use CursorKind::*;
        match self {
            UnexposedDecl => 1,
            StructDecl => 2,
            UnionDecl => 3,
            ClassDecl => 4,
            EnumDecl => 5,
            FieldDecl => 6,
            EnumConstantDecl => 7,
            FunctionDecl => 8,
            VarDecl => 9,
            ParmDecl => 10,
            TypedefDecl => 20,
            CxxMethod => 21,
            Namespace => 22,
            Constructor => 24,
            Destructor => 25,
            ConversionFunction => 26,
            CxxAccessSpecifier => 39,
            TypeRef => 43,
            CxxBaseSpecifier => 44,
            TemplateRef => 45,
            NamespaceRef => 46,
            MemberRef => 47,
            LabelRef => 48,
            OverloadedDeclRef => 49,
            VariableRef => 50,
            InvalidFile => 70,
            NoDeclFound => 71,
            NotImplemented => 72,
            InvalidCode => 73,
            UnexposedExpr => 100,
            DeclRefExpr => 101,
            MemberRefExpr => 102,
            CallExpr => 103,
            TranslationUnit => 350,
            MacroDefinition => 501,
            MacroExpansion => 502,
            InclusionDirective => 503,
            Other(raw) => *raw,
        }
    }

    /// True for the `*Ref` cursor family, mirroring `clang_isReference`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            CursorKind::TypeRef
                | CursorKind::CxxBaseSpecifier
                | CursorKind::TemplateRef
                | CursorKind::NamespaceRef
                | CursorKind::MemberRef
                | CursorKind::LabelRef
                | CursorKind::OverloadedDeclRef
                | CursorKind::VariableRef
        )
    }

    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            CursorKind::InvalidFile
                | CursorKind::NoDeclFound
                | CursorKind::NotImplemented
                | CursorKind::InvalidCode
        )
    }

    /// Constructors, destructors and methods participate in the member
    /// function cross-linking performed during reference resolution.
    pub fn is_member_function(&self) -> bool {
        matches!(
            self,
            CursorKind::Constructor | CursorKind::Destructor | CursorKind::CxxMethod
        )
    }
}

/// Width of the zero-padded offset in a symbol key. Padding keeps the
/// lexicographic iteration order of the Symbol table equal to the numeric
/// offset order within one file.
pub const KEY_OFFSET_WIDTH: usize = 9;

/// A point in the indexed codebase: canonical absolute path plus byte offset
/// from the start of the file.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Location {
    pub path: String,
    pub offset: u32,
}

impl Location {
    pub fn new(path: impl Into<String>, offset: u32) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// Serialized key form, `<path>,<offset zero-padded to 9>`. Used as the
    /// Symbol table key and as the canonical ordering of locations.
    pub fn stable_key(&self) -> String {
        format!(
            "{},{:0width$}",
            self.path,
            self.offset,
            width = KEY_OFFSET_WIDTH
        )
    }

    /// Inverse of [`stable_key`](Self::stable_key). The path itself may
    /// contain commas, so the offset is taken after the last one.
    pub fn from_stable_key(key: &str) -> Option<Self> {
        let comma = key.rfind(',')?;
        let offset = key[comma + 1..].parse().ok()?;
        Some(Self {
            path: key[..comma].to_string(),
            offset,
        })
    }

    /// The path portion of a symbol key, without decoding the offset.
    pub fn path_of_key(key: &str) -> Option<&str> {
        key.rfind(',').map(|comma| &key[..comma])
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.path, self.offset)
    }
}

/// Per-location symbol record: cursor kind, symbol spelling length, optional
/// definition target and the set of inbound reference locations.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct CursorInfo {
    pub kind: CursorKind,
    pub symbol_length: u32,
    pub target: Option<Location>,
    pub references: BTreeSet<Location>,
}

impl CursorInfo {
    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.references.is_empty()
    }

    /// Merge `other` into `self`. `kind` and `symbol_length` are
    /// first-writer-wins (the side that already has a non-zero length keeps
    /// them), `target` fills in only when empty, `references` unions.
    /// Returns true iff any field changed.
    pub fn unite(&mut self, other: &CursorInfo) -> bool {
        let mut changed = false;
        if self.symbol_length == 0 && other.symbol_length != 0 {
            self.kind = other.kind;
            self.symbol_length = other.symbol_length;
            changed = true;
        }
        if self.target.is_none() && other.target.is_some() {
            self.target = other.target.clone();
            changed = true;
        }
        let before = self.references.len();
        self.references.extend(other.references.iter().cloned());
        if self.references.len() != before {
            changed = true;
        }
        changed
    }

    /// Drop every reference into `dirty` paths and clear the target if its
    /// path is dirty. Returns true iff anything was removed.
    pub fn dirty(&mut self, dirty: &HashSet<String>) -> bool {
        let mut changed = false;
        if let Some(target) = &self.target {
            if dirty.contains(&target.path) {
                self.target = None;
                changed = true;
            }
        }
        let before = self.references.len();
        self.references.retain(|loc| !dirty.contains(&loc.path));
        if self.references.len() != before {
            changed = true;
        }
        changed
    }
}

pub type SymbolMap = HashMap<Location, CursorInfo>;
pub type SymbolNameMap = HashMap<String, BTreeSet<Location>>;
pub type DependencyMap = HashMap<String, BTreeSet<String>>;
pub type FileInformationMap = HashMap<String, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(path: &str, offset: u32) -> Location {
        Location::new(path, offset)
    }

    #[test]
    fn stable_key_round_trip() {
        let l = loc("/home/u/a.cpp", 42);
        assert_eq!(l.stable_key(), "/home/u/a.cpp,000000042");
        assert_eq!(Location::from_stable_key(&l.stable_key()), Some(l));
    }

    #[test]
    fn stable_key_path_with_comma() {
        let l = loc("/tmp/odd,name.cpp", 7);
        let key = l.stable_key();
        assert_eq!(Location::path_of_key(&key), Some("/tmp/odd,name.cpp"));
        assert_eq!(Location::from_stable_key(&key), Some(l));
    }

    #[test]
    fn key_order_matches_offset_order() {
        let a = loc("/a.cpp", 2);
        let b = loc("/a.cpp", 10);
        assert!(a.stable_key() < b.stable_key());
        assert!(a < b);
    }

    #[test]
    fn unite_fills_empty_fields_once() {
        let mut base = CursorInfo::default();
        let incoming = CursorInfo {
            kind: CursorKind::FunctionDecl,
            symbol_length: 3,
            target: Some(loc("/a.cpp", 1)),
            references: BTreeSet::from([loc("/b.cpp", 5)]),
        };
        assert!(base.unite(&incoming));
        assert_eq!(base.kind, CursorKind::FunctionDecl);
        assert_eq!(base.symbol_length, 3);

        // First writer keeps kind/length and target.
        let second = CursorInfo {
            kind: CursorKind::VarDecl,
            symbol_length: 9,
            target: Some(loc("/c.cpp", 2)),
            references: BTreeSet::new(),
        };
        assert!(!base.unite(&second));
        assert_eq!(base.kind, CursorKind::FunctionDecl);
        assert_eq!(base.symbol_length, 3);
        assert_eq!(base.target, Some(loc("/a.cpp", 1)));
    }

    #[test]
    fn unite_is_commutative_on_references() {
        let a = CursorInfo {
            kind: CursorKind::FunctionDecl,
            symbol_length: 3,
            target: None,
            references: BTreeSet::from([loc("/a.cpp", 1), loc("/a.cpp", 2)]),
        };
        let b = CursorInfo {
            kind: CursorKind::FunctionDecl,
            symbol_length: 3,
            target: None,
            references: BTreeSet::from([loc("/a.cpp", 2), loc("/b.cpp", 9)]),
        };
        let mut ab = a.clone();
        ab.unite(&b);
        let mut ba = b.clone();
        ba.unite(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn unite_is_associative() {
        let a = CursorInfo {
            kind: CursorKind::FunctionDecl,
            symbol_length: 3,
            target: Some(loc("/d.cpp", 11)),
            references: BTreeSet::from([loc("/a.cpp", 1)]),
        };
        let b = CursorInfo {
            kind: CursorKind::CallExpr,
            symbol_length: 0,
            target: None,
            references: BTreeSet::from([loc("/b.cpp", 2)]),
        };
        let c = CursorInfo {
            kind: CursorKind::VarDecl,
            symbol_length: 7,
            target: Some(loc("/e.cpp", 5)),
            references: BTreeSet::from([loc("/c.cpp", 3)]),
        };

        // (a ∪ b) ∪ c
        let mut left = a.clone();
        left.unite(&b);
        left.unite(&c);
        // a ∪ (b ∪ c)
        let mut bc = b.clone();
        bc.unite(&c);
        let mut right = a.clone();
        right.unite(&bc);
        assert_eq!(left, right);
    }

    #[test]
    fn dirty_strips_references_and_target() {
        let mut info = CursorInfo {
            kind: CursorKind::CallExpr,
            symbol_length: 3,
            target: Some(loc("/gone.h", 12)),
            references: BTreeSet::from([loc("/gone.h", 1), loc("/kept.cpp", 3)]),
        };
        let dirty: HashSet<String> = ["/gone.h".to_string()].into();
        assert!(info.dirty(&dirty));
        assert!(info.target.is_none());
        assert_eq!(info.references, BTreeSet::from([loc("/kept.cpp", 3)]));
        assert!(!info.dirty(&dirty));
    }
}
