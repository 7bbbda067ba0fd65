//! Expressions, patterns, bindings, and top-level declarations.
//!
//! Everything here is post-name-resolution: operator applications have been
//! rewritten by the fixity resolver, wildcard sugar is gone, and every
//! binder carries a unique id.

use std::collections::BTreeSet;

use crate::ty::{Type, type_names};
use crate::{Label, Located, Name};

pub type Expr = Located<ExprKind>;
pub type Pattern = Located<PatternKind>;
pub type Decl = Located<DeclKind>;

/// An operator position: a named operator, or `None` for function
/// application, which is implicitly the highest-priority operator.
pub type Op = Option<Name>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A reference to a binding or constructor.
    Name(Name),
    /// A variant constructor `'Tag`, used as a function from payload to
    /// variant.
    Variant(Label),
    Application(Box<Expr>, Box<Expr>),
    Lambda(Pattern, Box<Expr>),
    Let(Box<Binding>, Box<Expr>),
    Annotation(Box<Expr>, Type),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `case scrutinee of pattern -> body | ...`
    Case(Box<Expr>, Vec<(Pattern, Expr)>),
    /// `match` over implicit arguments; every arm must have the same arity.
    Match(Vec<MatchArm>),
    List(Vec<Expr>),
    Record(Vec<(Label, Expr)>),
    /// A lens literal `.field1.field2`, focusing a nested record path.
    RecordLens(Vec<Label>),
    IntLiteral(i64),
    TextLiteral(String),
    CharLiteral(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub patterns: Vec<Pattern>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Var(Name),
    /// A wildcard binder; the name's kind is `NameKind::Wildcard`.
    Wildcard(Name),
    Constructor(Name, Vec<Pattern>),
    /// `'Tag payload`; a missing payload stands for the empty record.
    Variant(Label, Option<Box<Pattern>>),
    Record(Vec<(Label, Pattern)>),
    IntLiteral(i64),
    TextLiteral(String),
    CharLiteral(char),
}

/// A value binding: either a pattern bound to an expression or a function
/// head with parameter patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Value(Pattern, Expr),
    Function(Name, Vec<Pattern>, Expr),
}

impl Binding {
    /// Every name this binding defines.
    pub fn defined_names(&self) -> Vec<Name> {
        match self {
            Binding::Value(pattern, _) => {
                let mut out = Vec::new();
                pattern_names(pattern, &mut out);
                out
            }
            Binding::Function(name, _, _) => vec![name.clone()],
        }
    }
}

/// A constructor of a user type declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Constructor {
    pub name: Name,
    pub args: Vec<Type>,
}

/// Operator associativity, recorded for the fixity resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixity {
    Left,
    Right,
    None,
}

/// A user-stated priority relation between an operator and another operator
/// (or application, when the target is `None`).
#[derive(Debug, Clone, PartialEq)]
pub enum FixityRelation {
    Above(Op),
    Below(Op),
    Equals(Op),
}

impl FixityRelation {
    pub fn target(&self) -> &Op {
        match self {
            FixityRelation::Above(op) | FixityRelation::Below(op) | FixityRelation::Equals(op) => {
                op
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    /// A value binding with its local declarations.
    Value {
        binding: Binding,
        locals: Vec<Decl>,
    },
    /// A type declaration with its constructors.
    Type {
        name: Name,
        vars: Vec<Name>,
        constructors: Vec<Constructor>,
    },
    /// A standalone type signature.
    Signature { name: Name, ty: Type },
    /// A fixity declaration for an infix operator.
    Fixity {
        fixity: Fixity,
        op: Name,
        relations: Vec<FixityRelation>,
    },
}

// ---------------------------------------------------------------------------
// Name traversals
// ---------------------------------------------------------------------------

/// Collect every name bound by a pattern, in source order.
pub fn pattern_names(pattern: &Pattern, out: &mut Vec<Name>) {
    match &pattern.node {
        PatternKind::Var(name) => out.push(name.clone()),
        PatternKind::Wildcard(_) => {}
        PatternKind::Constructor(_, args) => {
            for arg in args {
                pattern_names(arg, out);
            }
        }
        PatternKind::Variant(_, payload) => {
            if let Some(payload) = payload {
                pattern_names(payload, out);
            }
        }
        PatternKind::Record(fields) => {
            for (_, field) in fields {
                pattern_names(field, out);
            }
        }
        PatternKind::IntLiteral(_) | PatternKind::TextLiteral(_) | PatternKind::CharLiteral(_) => {}
    }
}

/// Collect every name an expression refers to, including constructor
/// references inside annotations.
///
/// Names are globally unique after resolution, so local binders can be
/// collected alongside outer references; the dependency resolver keeps only
/// the names that map back to a top-level declaration.
pub fn referenced_names(expr: &Expr, out: &mut BTreeSet<Name>) {
    match &expr.node {
        ExprKind::Name(name) => {
            out.insert(name.clone());
        }
        ExprKind::Variant(_)
        | ExprKind::RecordLens(_)
        | ExprKind::IntLiteral(_)
        | ExprKind::TextLiteral(_)
        | ExprKind::CharLiteral(_) => {}
        ExprKind::Application(func, arg) => {
            referenced_names(func, out);
            referenced_names(arg, out);
        }
        ExprKind::Lambda(pattern, body) => {
            pattern_referenced_names(pattern, out);
            referenced_names(body, out);
        }
        ExprKind::Let(binding, body) => {
            binding_referenced_names(binding, out);
            referenced_names(body, out);
        }
        ExprKind::Annotation(inner, ty) => {
            referenced_names(inner, out);
            type_names(ty, out);
        }
        ExprKind::If(cond, then, otherwise) => {
            referenced_names(cond, out);
            referenced_names(then, out);
            referenced_names(otherwise, out);
        }
        ExprKind::Case(scrutinee, arms) => {
            referenced_names(scrutinee, out);
            for (pattern, body) in arms {
                pattern_referenced_names(pattern, out);
                referenced_names(body, out);
            }
        }
        ExprKind::Match(arms) => {
            for arm in arms {
                for pattern in &arm.patterns {
                    pattern_referenced_names(pattern, out);
                }
                referenced_names(&arm.body, out);
            }
        }
        ExprKind::List(items) => {
            for item in items {
                referenced_names(item, out);
            }
        }
        ExprKind::Record(fields) => {
            for (_, field) in fields {
                referenced_names(field, out);
            }
        }
    }
}

/// Constructor names a pattern refers to (not the names it binds).
fn pattern_referenced_names(pattern: &Pattern, out: &mut BTreeSet<Name>) {
    match &pattern.node {
        PatternKind::Var(_)
        | PatternKind::Wildcard(_)
        | PatternKind::IntLiteral(_)
        | PatternKind::TextLiteral(_)
        | PatternKind::CharLiteral(_) => {}
        PatternKind::Constructor(name, args) => {
            out.insert(name.clone());
            for arg in args {
                pattern_referenced_names(arg, out);
            }
        }
        PatternKind::Variant(_, payload) => {
            if let Some(payload) = payload {
                pattern_referenced_names(payload, out);
            }
        }
        PatternKind::Record(fields) => {
            for (_, field) in fields {
                pattern_referenced_names(field, out);
            }
        }
    }
}

/// Names referenced by a binding's right-hand side.
pub fn binding_referenced_names(binding: &Binding, out: &mut BTreeSet<Name>) {
    match binding {
        Binding::Value(_, expr) => referenced_names(expr, out),
        Binding::Function(_, params, body) => {
            for param in params {
                pattern_referenced_names(param, out);
            }
            referenced_names(body, out);
        }
    }
}
