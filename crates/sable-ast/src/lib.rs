//! Names, source locations, and AST definitions for Sable.
//!
//! This crate defines the name-resolved abstract syntax tree consumed by the
//! dependency resolver and the type checker. Name resolution has already
//! happened upstream: every identifier carries a process-unique [`Id`], so
//! two names are the same binding exactly when their `(text, Id)` pairs
//! match. Source locations ride along for diagnostics but never participate
//! in equality.

use std::fmt;

pub mod decl;
pub mod ty;

pub use decl::{
    Binding, Constructor, Decl, DeclKind, Expr, ExprKind, Fixity, FixityRelation, MatchArm, Op,
    Pattern, PatternKind, binding_referenced_names, pattern_names, referenced_names,
};
pub use ty::{Row, RowKind, Skolem, Type, UniVarId, alpha_equivalent, type_names};

// ---------------------------------------------------------------------------
// Source locations
// ---------------------------------------------------------------------------

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loc {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Loc {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Create a location that covers both `self` and `other`.
    pub fn merge(self, other: Loc) -> Loc {
        debug_assert_eq!(
            self.file, other.file,
            "cannot merge locations from different files"
        );
        Loc {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// A synthetic location for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub node: T,
    pub loc: Loc,
}

impl<T> Located<T> {
    pub fn new(node: T, loc: Loc) -> Self {
        Self { node, loc }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Located<U> {
        Located {
            node: f(self.node),
            loc: self.loc,
        }
    }
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// A process-unique identifier attached to every resolved name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub u32);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of a name, separate from its source location.
///
/// Built-in names are distinguished variants so the checker can refer to
/// them without reserving ids in the user namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NameKind {
    /// A user identifier with its resolver-assigned id.
    Ident(String, Id),
    /// A wildcard binder, numbered positionally within its declaration.
    Wildcard(u32, Id),
    Bool,
    List,
    Int,
    Nat,
    Text,
    Char,
    Lens,
    Type,
    True,
    Cons,
    Nil,
}

/// A resolved name with its source location.
///
/// Equality, ordering, and hashing ignore the location: two occurrences of
/// the same binding compare equal wherever they appear.
#[derive(Debug, Clone)]
pub struct Name {
    pub kind: NameKind,
    pub loc: Loc,
}

impl Name {
    pub fn new(kind: NameKind, loc: Loc) -> Self {
        Self { kind, loc }
    }

    /// The builtin names, each with a synthetic location.
    pub fn builtin(kind: NameKind) -> Self {
        debug_assert!(!matches!(kind, NameKind::Ident(..) | NameKind::Wildcard(..)));
        Self {
            kind,
            loc: Loc::synthetic(),
        }
    }

    /// The display text of the name. Wildcards render as `_`.
    pub fn text(&self) -> &str {
        match &self.kind {
            NameKind::Ident(text, _) => text,
            NameKind::Wildcard(..) => "_",
            NameKind::Bool => "Bool",
            NameKind::List => "List",
            NameKind::Int => "Int",
            NameKind::Nat => "Nat",
            NameKind::Text => "Text",
            NameKind::Char => "Char",
            NameKind::Lens => "Lens",
            NameKind::Type => "Type",
            NameKind::True => "True",
            NameKind::Cons => "Cons",
            NameKind::Nil => "Nil",
        }
    }

    /// The resolver-assigned id, if this is not a builtin.
    pub fn id(&self) -> Option<Id> {
        match self.kind {
            NameKind::Ident(_, id) | NameKind::Wildcard(_, id) => Some(id),
            _ => None,
        }
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.kind.cmp(&other.kind)
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NameKind::Wildcard(index, _) => write!(f, "_{index}"),
            _ => write!(f, "{}", self.text()),
        }
    }
}

/// A record field or variant tag label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Label {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Fresh name generation
// ---------------------------------------------------------------------------

/// A monotonic source of fresh [`Id`]s.
///
/// The driver seeds one generator before name resolution and threads it
/// through the whole pipeline, so ids never collide across stages.
#[derive(Debug, Clone)]
pub struct NameGen {
    next: u32,
}

impl NameGen {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Resume from a previously flushed generator state.
    pub fn seeded(next: u32) -> Self {
        Self { next }
    }

    pub fn fresh_id(&mut self) -> Id {
        let id = Id(self.next);
        self.next += 1;
        id
    }

    pub fn fresh(&mut self, text: impl Into<String>, loc: Loc) -> Name {
        let id = self.fresh_id();
        Name::new(NameKind::Ident(text.into(), id), loc)
    }

    pub fn fresh_wildcard(&mut self, index: u32, loc: Loc) -> Name {
        let id = self.fresh_id();
        Name::new(NameKind::Wildcard(index, id), loc)
    }

    /// The state to persist when flushing the generator.
    pub fn next_id(&self) -> u32 {
        self.next
    }
}

impl Default for NameGen {
    fn default() -> Self {
        Self::new()
    }
}
