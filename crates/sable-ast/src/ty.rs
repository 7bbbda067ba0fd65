//! Semantic types: quantifiers, arrows, applications, and row types.
//!
//! These are the types the checker manipulates, distinct from any surface
//! syntax. Quantifiers are concrete binders over globally-unique names, so
//! substitution never captures. `UniVar` and `Skolem` only appear while
//! inference is in flight; normalised top-level types contain neither.

use std::collections::BTreeMap;
use std::fmt;

use crate::{Label, Name};

/// Identifies a unification variable in the checker's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniVarId(pub u32);

impl fmt::Display for UniVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// A rigid type constant introduced by instantiating a quantifier at rigid
/// variance. Carries the freshened name of the variable it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Skolem(pub Name);

impl fmt::Display for Skolem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a row is the spine of a record or of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Record,
    Variant,
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKind::Record => write!(f, "record"),
            RowKind::Variant => write!(f, "variant"),
        }
    }
}

/// An unordered label-to-type mapping with an optional extension.
///
/// The extension, when present, is a further type (typically a `UniVar` or a
/// bound `Var`) standing for the fields or tags not yet known. A row without
/// an extension is closed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub fields: BTreeMap<Label, Type>,
    pub ext: Option<Box<Type>>,
}

impl Row {
    pub fn closed(fields: impl IntoIterator<Item = (Label, Type)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            ext: None,
        }
    }

    pub fn open(fields: impl IntoIterator<Item = (Label, Type)>, ext: Type) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            ext: Some(Box::new(ext)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ext.is_none()
    }
}

/// A semantic type in Sable.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// A named type constructor.
    Name(Name),
    /// A bound type variable; only valid under a quantifier binding it.
    Var(Name),
    /// A rigid skolem constant.
    Skolem(Skolem),
    /// A unification variable owned by the checker's store.
    UniVar(UniVarId),
    Forall(Name, Box<Type>),
    Exists(Name, Box<Type>),
    Function(Box<Type>, Box<Type>),
    Application(Box<Type>, Box<Type>),
    Record(Row),
    Variant(Row),
}

impl Type {
    pub fn function(from: Type, to: Type) -> Type {
        Type::Function(Box::new(from), Box::new(to))
    }

    pub fn app(head: Type, arg: Type) -> Type {
        Type::Application(Box::new(head), Box::new(arg))
    }

    pub fn forall(var: Name, body: Type) -> Type {
        Type::Forall(var, Box::new(body))
    }

    pub fn exists(var: Name, body: Type) -> Type {
        Type::Exists(var, Box::new(body))
    }

    /// Build a `Record` or `Variant` from a row, per `kind`.
    pub fn row(kind: RowKind, row: Row) -> Type {
        match kind {
            RowKind::Record => Type::Record(row),
            RowKind::Variant => Type::Variant(row),
        }
    }

    /// Whether any `UniVar` occurs anywhere in the type.
    pub fn mentions_uni_var(&self) -> bool {
        match self {
            Type::UniVar(_) => true,
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) => false,
            Type::Forall(_, body) | Type::Exists(_, body) => body.mentions_uni_var(),
            Type::Function(a, b) | Type::Application(a, b) => {
                a.mentions_uni_var() || b.mentions_uni_var()
            }
            Type::Record(row) | Type::Variant(row) => {
                row.fields.values().any(Type::mentions_uni_var)
                    || row.ext.as_deref().is_some_and(Type::mentions_uni_var)
            }
        }
    }

    /// Whether any `Skolem` occurs anywhere in the type.
    pub fn mentions_skolem(&self) -> bool {
        match self {
            Type::Skolem(_) => true,
            Type::Name(_) | Type::Var(_) | Type::UniVar(_) => false,
            Type::Forall(_, body) | Type::Exists(_, body) => body.mentions_skolem(),
            Type::Function(a, b) | Type::Application(a, b) => {
                a.mentions_skolem() || b.mentions_skolem()
            }
            Type::Record(row) | Type::Variant(row) => {
                row.fields.values().any(Type::mentions_skolem)
                    || row.ext.as_deref().is_some_and(Type::mentions_skolem)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Referenced constructor names
// ---------------------------------------------------------------------------

/// Collect every named type constructor referenced by `ty` into `out`.
///
/// Bound variables, skolems, and unification variables are not names.
pub fn type_names(ty: &Type, out: &mut std::collections::BTreeSet<Name>) {
    match ty {
        Type::Name(name) => {
            out.insert(name.clone());
        }
        Type::Var(_) | Type::Skolem(_) | Type::UniVar(_) => {}
        Type::Forall(_, body) | Type::Exists(_, body) => type_names(body, out),
        Type::Function(a, b) | Type::Application(a, b) => {
            type_names(a, out);
            type_names(b, out);
        }
        Type::Record(row) | Type::Variant(row) => {
            for field in row.fields.values() {
                type_names(field, out);
            }
            if let Some(ext) = &row.ext {
                type_names(ext, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Alpha equivalence
// ---------------------------------------------------------------------------

/// Structural equality up to renaming of bound variables.
///
/// Binders are matched positionally: the n-th binder on the left corresponds
/// to the n-th binder on the right, so `∀a. ∀b. a → b` and `∀x. ∀y. x → y`
/// are equivalent while `∀a. ∀b. b → a` is not.
pub fn alpha_equivalent(a: &Type, b: &Type) -> bool {
    fn go(
        a: &Type,
        b: &Type,
        left: &mut BTreeMap<Name, u32>,
        right: &mut BTreeMap<Name, u32>,
        depth: u32,
    ) -> bool {
        match (a, b) {
            (Type::Name(x), Type::Name(y)) => x == y,
            (Type::Skolem(x), Type::Skolem(y)) => x == y,
            (Type::UniVar(x), Type::UniVar(y)) => x == y,
            (Type::Var(x), Type::Var(y)) => match (left.get(x), right.get(y)) {
                (Some(lx), Some(ly)) => lx == ly,
                (None, None) => x == y,
                _ => false,
            },
            (Type::Forall(vx, bx), Type::Forall(vy, by))
            | (Type::Exists(vx, bx), Type::Exists(vy, by)) => {
                let saved_left = left.insert(vx.clone(), depth);
                let saved_right = right.insert(vy.clone(), depth);
                let result = go(bx, by, left, right, depth + 1);
                match saved_left {
                    Some(level) => left.insert(vx.clone(), level),
                    None => left.remove(vx),
                };
                match saved_right {
                    Some(level) => right.insert(vy.clone(), level),
                    None => right.remove(vy),
                };
                result
            }
            (Type::Function(ax, bx), Type::Function(ay, by))
            | (Type::Application(ax, bx), Type::Application(ay, by)) => {
                go(ax, ay, left, right, depth) && go(bx, by, left, right, depth)
            }
            (Type::Record(rx), Type::Record(ry)) | (Type::Variant(rx), Type::Variant(ry)) => {
                if rx.fields.len() != ry.fields.len() {
                    return false;
                }
                for ((lx, tx), (ly, ty)) in rx.fields.iter().zip(ry.fields.iter()) {
                    if lx != ly || !go(tx, ty, left, right, depth) {
                        return false;
                    }
                }
                match (&rx.ext, &ry.ext) {
                    (None, None) => true,
                    (Some(ex), Some(ey)) => go(ex, ey, left, right, depth),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    go(a, b, &mut BTreeMap::new(), &mut BTreeMap::new(), 0)
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Precedence levels for rendering: quantifiers < arrows < applications.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
enum Prec {
    Top,
    Arrow,
    App,
    Atom,
}

fn fmt_type(ty: &Type, prec: Prec, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match ty {
        Type::Name(name) => write!(f, "{name}"),
        Type::Var(name) => write!(f, "{name}"),
        Type::Skolem(skolem) => write!(f, "{skolem}"),
        Type::UniVar(uni) => write!(f, "{uni}"),
        Type::Forall(var, body) => {
            let parens = prec > Prec::Top;
            if parens {
                write!(f, "(")?;
            }
            write!(f, "forall {var}. ")?;
            fmt_type(body, Prec::Top, f)?;
            if parens {
                write!(f, ")")?;
            }
            Ok(())
        }
        Type::Exists(var, body) => {
            let parens = prec > Prec::Top;
            if parens {
                write!(f, "(")?;
            }
            write!(f, "exists {var}. ")?;
            fmt_type(body, Prec::Top, f)?;
            if parens {
                write!(f, ")")?;
            }
            Ok(())
        }
        Type::Function(from, to) => {
            let parens = prec > Prec::Arrow;
            if parens {
                write!(f, "(")?;
            }
            fmt_type(from, Prec::App, f)?;
            write!(f, " -> ")?;
            fmt_type(to, Prec::Arrow, f)?;
            if parens {
                write!(f, ")")?;
            }
            Ok(())
        }
        Type::Application(head, arg) => {
            let parens = prec > Prec::App;
            if parens {
                write!(f, "(")?;
            }
            fmt_type(head, Prec::App, f)?;
            write!(f, " ")?;
            fmt_type(arg, Prec::Atom, f)?;
            if parens {
                write!(f, ")")?;
            }
            Ok(())
        }
        Type::Record(row) => {
            if row.fields.is_empty() && row.ext.is_none() {
                return write!(f, "{{}}");
            }
            write!(f, "{{ ")?;
            fmt_row(row, RowKind::Record, f)?;
            write!(f, " }}")
        }
        Type::Variant(row) => {
            write!(f, "[")?;
            fmt_row(row, RowKind::Variant, f)?;
            write!(f, "]")
        }
    }
}

fn fmt_row(row: &Row, kind: RowKind, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for (label, field) in &row.fields {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        match kind {
            RowKind::Record => write!(f, "{label} : ")?,
            RowKind::Variant => write!(f, "'{label} : ")?,
        }
        fmt_type(field, Prec::Top, f)?;
    }
    if let Some(ext) = &row.ext {
        if first {
            fmt_type(ext, Prec::Top, f)?;
        } else {
            write!(f, " | ")?;
            fmt_type(ext, Prec::Top, f)?;
        }
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_type(self, Prec::Top, f)
    }
}
