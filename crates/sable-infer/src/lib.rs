//! Bidirectional type inference for Sable.
//!
//! This crate implements:
//! - A unification-variable store with scope-based generalization
//! - Polytype instantiation (`mono`) driven by variance
//! - Subtype-directed bidirectional checking with row-polymorphic records
//!   and variants (see `typeck`)
//!
//! The checker is single-threaded and runs to completion on the call stack.
//! All mutable inference state lives in one [`Checker`]; fatal errors
//! propagate as [`TypeError`] up to the declaration-group boundary, where
//! the driver reports them and moves on to the next group.

use std::collections::{BTreeMap, BTreeSet};

use sable_ast::{Label, Loc, Name, NameKind, NameGen, Row, Skolem, Type, UniVarId};
use sable_diag::{Category, Diagnostic, SourceLocation};

pub mod trace;
pub mod typeck;

pub use trace::{UnifyAction, UnifyStep};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The names the checker needs to know about, passed in at initialization.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub bool_ty: Name,
    pub list_ty: Name,
    pub int_ty: Name,
    pub nat_ty: Name,
    pub text_ty: Name,
    pub char_ty: Name,
    pub lens_ty: Name,
    /// Direct subtype edges between named types; not transitively closed.
    pub subtype_relations: Vec<(Name, Name)>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self {
            bool_ty: Name::builtin(NameKind::Bool),
            list_ty: Name::builtin(NameKind::List),
            int_ty: Name::builtin(NameKind::Int),
            nat_ty: Name::builtin(NameKind::Nat),
            text_ty: Name::builtin(NameKind::Text),
            char_ty: Name::builtin(NameKind::Char),
            lens_ty: Name::builtin(NameKind::Lens),
            subtype_relations: vec![(
                Name::builtin(NameKind::Nat),
                Name::builtin(NameKind::Int),
            )],
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A fatal type error. Unwinds to the current declaration group.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    NotASubtype { lhs: Type, rhs: Type },
    CannotUnify { lhs: Type, rhs: Type },
    NotAFunction { ty: Type, loc: Option<Loc> },
    UnboundTypeVariable { name: Name },
    SelfReferential { ty: Type },
    ArityMismatch { expected: usize, found: usize, loc: Option<Loc> },
    MissingField { label: Label, ty: Type },
    MissingVariant { label: Label, ty: Type },
    DanglingUniVar { ty: Type },
    SkolemEscape { ty: Type },
    /// A checker invariant was violated; this is a bug, not a user error.
    Internal { message: String },
}

impl TypeError {
    pub fn category(&self) -> Category {
        match self {
            TypeError::NotASubtype { .. } => Category::NotASubtype,
            TypeError::CannotUnify { .. } => Category::CannotUnify,
            TypeError::NotAFunction { .. } => Category::NotAFunction,
            TypeError::UnboundTypeVariable { .. } => Category::UnboundTypeVariable,
            TypeError::SelfReferential { .. } => Category::SelfReferentialType,
            TypeError::ArityMismatch { .. } => Category::ArityMismatch,
            TypeError::MissingField { .. } => Category::MissingField,
            TypeError::MissingVariant { .. } => Category::MissingVariant,
            TypeError::DanglingUniVar { .. } => Category::DanglingUniVar,
            TypeError::SkolemEscape { .. } => Category::SkolemEscape,
            TypeError::Internal { .. } => Category::Internal,
        }
    }

    pub fn message(&self) -> String {
        match self {
            TypeError::NotASubtype { lhs, rhs } => {
                format!("`{lhs}` is not a subtype of `{rhs}`")
            }
            TypeError::CannotUnify { lhs, rhs } => {
                format!("cannot unify `{lhs}` and `{rhs}`")
            }
            TypeError::NotAFunction { ty, .. } => format!("`{ty}` is not a function type"),
            TypeError::UnboundTypeVariable { name } => {
                format!("unbound type variable `{name}`")
            }
            TypeError::SelfReferential { ty } => {
                format!("self-referential type `{ty}`")
            }
            TypeError::ArityMismatch {
                expected, found, ..
            } => {
                format!("expected {expected} arguments, found {found}")
            }
            TypeError::MissingField { label, .. } => {
                format!("record does not contain field `{label}`")
            }
            TypeError::MissingVariant { label, ty } => {
                format!("variant `{ty}` does not accept the tag `'{label}`")
            }
            TypeError::DanglingUniVar { ty } => {
                format!("type `{ty}` was not fully inferred")
            }
            TypeError::SkolemEscape { ty } => {
                format!("rigid type escaped into `{ty}`")
            }
            TypeError::Internal { message } => format!("internal checker error: {message}"),
        }
    }

    pub fn loc(&self) -> Option<Loc> {
        match self {
            TypeError::NotAFunction { loc, .. } | TypeError::ArityMismatch { loc, .. } => *loc,
            TypeError::UnboundTypeVariable { name } => Some(name.loc),
            _ => None,
        }
    }

    pub fn into_diagnostic(self, fallback: Loc) -> Diagnostic {
        let loc = self.loc().unwrap_or(fallback);
        Diagnostic::error(self.category(), self.message()).at(source_location(loc))
    }
}

pub(crate) fn source_location(loc: Loc) -> SourceLocation {
    SourceLocation {
        file_id: loc.file.0,
        start: loc.start,
        end: loc.end,
    }
}

// ---------------------------------------------------------------------------
// Unification variable store
// ---------------------------------------------------------------------------

/// Generalization depth. Incremented on entering a `forall_scope` region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scope(pub u32);

#[derive(Debug, Clone)]
enum UniVarEntry {
    Unsolved { scope: Scope },
    Solved { ty: Type },
}

/// Variance context for polytype instantiation.
///
/// `In` is the producing side of a judgement: a `Forall` there becomes a
/// fresh univar for the consumer to solve. `Out` is the consuming side:
/// a `Forall` there is rigid and becomes a skolem. `Inv` always
/// skolemizes. Recursing under an `Exists` flips the variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    In,
    Out,
    Inv,
}

impl Variance {
    pub fn flip(self) -> Self {
        match self {
            Variance::In => Variance::Out,
            Variance::Out => Variance::In,
            Variance::Inv => Variance::Inv,
        }
    }
}

/// The monomorphic outer layer of a type: every variant is a constructor
/// without quantifiers. Produced by [`Checker::mono`].
#[derive(Debug, Clone, PartialEq)]
pub enum MonoLayer {
    Name(Name),
    Skolem(Skolem),
    UniVar(UniVarId),
    Function(Box<Type>, Box<Type>),
    Application(Box<Type>, Box<Type>),
    Record(Row),
    Variant(Row),
}

impl MonoLayer {
    pub fn into_type(self) -> Type {
        match self {
            MonoLayer::Name(name) => Type::Name(name),
            MonoLayer::Skolem(skolem) => Type::Skolem(skolem),
            MonoLayer::UniVar(uni) => Type::UniVar(uni),
            MonoLayer::Function(from, to) => Type::Function(from, to),
            MonoLayer::Application(head, arg) => Type::Application(head, arg),
            MonoLayer::Record(row) => Type::Record(row),
            MonoLayer::Variant(row) => Type::Variant(row),
        }
    }
}

impl From<MonoLayer> for Type {
    fn from(layer: MonoLayer) -> Type {
        layer.into_type()
    }
}

// ---------------------------------------------------------------------------
// Checker state
// ---------------------------------------------------------------------------

/// All mutable state of one inference run.
///
/// `sigs` holds the currently-known type of every binding and constructor;
/// scoped regions snapshot and restore it. The univar store is never rolled
/// back: solutions are global facts.
pub struct Checker<'a> {
    pub(crate) sigs: BTreeMap<Name, Type>,
    /// Names whose entry in `sigs` is a user-supplied signature rather than
    /// an inference artifact.
    pub(crate) declared: BTreeSet<Name>,
    vars: Vec<UniVarEntry>,
    scope: Scope,
    pub(crate) builtins: Builtins,
    names: &'a mut NameGen,
    /// Counter feeding fresh type-variable names (a, b, ..., a1, b1, ...).
    next_var_text: u32,
    tracing: bool,
    steps: Vec<UnifyStep>,
}

impl<'a> Checker<'a> {
    pub fn new(builtins: Builtins, names: &'a mut NameGen) -> Self {
        let mut checker = Self {
            sigs: BTreeMap::new(),
            declared: BTreeSet::new(),
            vars: Vec::new(),
            scope: Scope(0),
            builtins,
            names,
            next_var_text: 0,
            tracing: false,
            steps: Vec::new(),
        };
        checker.install_builtin_constructors();
        checker
    }

    /// `True : Bool`, `Nil : forall a. List a`,
    /// `Cons : forall a. a -> List a -> List a`.
    ///
    /// Only the types: the values behind them belong to the interpreter.
    fn install_builtin_constructors(&mut self) {
        let bool_ty = Type::Name(self.builtins.bool_ty.clone());
        self.install_signature(Name::builtin(NameKind::True), bool_ty);

        let elem = self.fresh_type_var_name();
        let list = Type::app(
            Type::Name(self.builtins.list_ty.clone()),
            Type::Var(elem.clone()),
        );
        self.install_signature(
            Name::builtin(NameKind::Nil),
            Type::forall(elem.clone(), list.clone()),
        );

        let elem2 = self.fresh_type_var_name();
        let list2 = Type::app(
            Type::Name(self.builtins.list_ty.clone()),
            Type::Var(elem2.clone()),
        );
        self.install_signature(
            Name::builtin(NameKind::Cons),
            Type::forall(
                elem2.clone(),
                Type::function(
                    Type::Var(elem2),
                    Type::function(list2.clone(), list2),
                ),
            ),
        );
    }

    /// Record a user-supplied signature for a name.
    pub fn install_signature(&mut self, name: Name, ty: Type) {
        self.declared.insert(name.clone());
        self.sigs.insert(name, ty);
    }

    /// The known type of a name. Missing names get a fresh univar: name
    /// resolution already guaranteed the name is reachable, so an absent
    /// entry just means its group-mate has not been inferred yet.
    pub fn lookup_sig(&mut self, name: &Name) -> Type {
        if let Some(ty) = self.sigs.get(name) {
            return ty.clone();
        }
        let uni = self.fresh_uni_var();
        self.sigs.insert(name.clone(), uni.clone());
        uni
    }

    pub fn current_scope(&self) -> Scope {
        self.scope
    }

    // -- fresh things -------------------------------------------------------

    pub fn fresh_uni_var_id(&mut self) -> UniVarId {
        let id = UniVarId(self.vars.len() as u32);
        self.vars.push(UniVarEntry::Unsolved { scope: self.scope });
        id
    }

    pub fn fresh_uni_var(&mut self) -> Type {
        Type::UniVar(self.fresh_uni_var_id())
    }

    /// A fresh type-variable name: a, b, ..., z, a1, b1, ...
    fn fresh_type_var_name(&mut self) -> Name {
        let n = self.next_var_text;
        self.next_var_text += 1;
        let letter = (b'a' + (n % 26) as u8) as char;
        let text = if n < 26 {
            letter.to_string()
        } else {
            format!("{letter}{}", n / 26)
        };
        self.names.fresh(text, Loc::synthetic())
    }

    fn fresh_skolem(&mut self, base: &Name) -> Skolem {
        Skolem(self.names.fresh(base.text().to_string(), base.loc))
    }

    // -- store access -------------------------------------------------------

    pub fn solution(&self, uni: UniVarId) -> Option<&Type> {
        match &self.vars[uni.0 as usize] {
            UniVarEntry::Solved { ty } => Some(ty),
            UniVarEntry::Unsolved { .. } => None,
        }
    }

    /// The scope a univar was created at, while it is unsolved.
    pub fn uni_var_scope(&self, uni: UniVarId) -> Option<Scope> {
        match &self.vars[uni.0 as usize] {
            UniVarEntry::Unsolved { scope } => Some(*scope),
            UniVarEntry::Solved { .. } => None,
        }
    }

    /// Solve an unsolved univar. Solving twice without override is an
    /// internal error.
    pub fn solve_uni_var(&mut self, uni: UniVarId, ty: Type) -> Result<(), TypeError> {
        self.solve_impl(uni, ty, false)
    }

    /// Re-solve a univar that may already have a solution. Used by
    /// substitution passes that rewrite through solved entries.
    pub(crate) fn override_uni_var(&mut self, uni: UniVarId, ty: Type) {
        self.solve_impl(uni, ty, true)
            .expect("override cannot fail");
    }

    fn solve_impl(&mut self, uni: UniVarId, ty: Type, override_existing: bool) -> Result<(), TypeError> {
        let scope = match &self.vars[uni.0 as usize] {
            UniVarEntry::Solved { .. } if !override_existing => {
                return Err(TypeError::Internal {
                    message: format!("univar {uni} is already solved"),
                });
            }
            UniVarEntry::Solved { .. } => None,
            UniVarEntry::Unsolved { scope } => Some(*scope),
        };
        if let Some(scope) = scope {
            self.lower_scopes(&ty, scope);
        }
        self.trace_step(UnifyAction::Solve, &Type::UniVar(uni), &ty, "");
        self.vars[uni.0 as usize] = UniVarEntry::Solved { ty };
        if !override_existing {
            self.check_solution_cycles(uni)?;
        }
        Ok(())
    }

    /// Every unsolved univar mentioned by `ty` must not outlive `bound`:
    /// lower each one's scope to `min(scope, bound)` so a variable created
    /// in an outer scope cannot escape through an inner solution.
    fn lower_scopes(&mut self, ty: &Type, bound: Scope) {
        match ty {
            Type::UniVar(uni) => {
                if let Some(scope) = self.uni_var_scope(*uni) {
                    if scope > bound {
                        self.vars[uni.0 as usize] = UniVarEntry::Unsolved { scope: bound };
                    }
                } else if let Some(solution) = self.solution(*uni).cloned() {
                    self.lower_scopes(&solution, bound);
                }
            }
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) => {}
            Type::Forall(_, body) | Type::Exists(_, body) => self.lower_scopes(body, bound),
            Type::Function(a, b) | Type::Application(a, b) => {
                self.lower_scopes(a, bound);
                self.lower_scopes(b, bound);
            }
            Type::Record(row) | Type::Variant(row) => {
                for field in row.fields.values() {
                    self.lower_scopes(field, bound);
                }
                if let Some(ext) = &row.ext {
                    self.lower_scopes(ext, bound);
                }
            }
        }
    }

    /// Walk the freshly-installed solution looking for cycles. A chain of
    /// bare univar links back to a visited variable is collapsed to a
    /// skolem; a cycle through a type constructor is a genuinely infinite
    /// type and fatal.
    fn check_solution_cycles(&mut self, root: UniVarId) -> Result<(), TypeError> {
        let Some(solution) = self.solution(root).cloned() else {
            return Ok(());
        };
        let mut path = vec![root];
        self.cycle_walk(&solution, &mut path, false)
    }

    fn cycle_walk(
        &mut self,
        ty: &Type,
        path: &mut Vec<UniVarId>,
        guarded: bool,
    ) -> Result<(), TypeError> {
        match ty {
            Type::UniVar(uni) => {
                if path.contains(uni) {
                    if guarded {
                        // The store must stay acyclic even though we abort:
                        // break the loop before reporting.
                        let root = path[0];
                        let culprit = *uni;
                        let shown = self
                            .solution(root)
                            .cloned()
                            .unwrap_or(Type::UniVar(root));
                        let name = self.fresh_type_var_name();
                        self.override_uni_var(culprit, Type::Skolem(Skolem(name)));
                        return Err(TypeError::SelfReferential { ty: shown });
                    }
                    let name = self.fresh_type_var_name();
                    self.override_uni_var(*uni, Type::Skolem(Skolem(name)));
                    return Ok(());
                }
                let Some(solution) = self.solution(*uni).cloned() else {
                    return Ok(());
                };
                path.push(*uni);
                let result = self.cycle_walk(&solution, path, guarded);
                path.pop();
                result
            }
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) => Ok(()),
            Type::Forall(_, body) | Type::Exists(_, body) => self.cycle_walk(body, path, true),
            Type::Function(a, b) | Type::Application(a, b) => {
                self.cycle_walk(a, path, true)?;
                self.cycle_walk(b, path, true)
            }
            Type::Record(row) | Type::Variant(row) => {
                for field in row.fields.values() {
                    self.cycle_walk(field, path, true)?;
                }
                if let Some(ext) = &row.ext {
                    self.cycle_walk(ext, path, true)?;
                }
                Ok(())
            }
        }
    }

    /// Replace every solved univar in `ty` by its (recursively resolved)
    /// solution.
    pub fn zonk(&self, ty: &Type) -> Type {
        match ty {
            Type::UniVar(uni) => match self.solution(*uni) {
                Some(solution) => {
                    let solution = solution.clone();
                    self.zonk(&solution)
                }
                None => ty.clone(),
            },
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) => ty.clone(),
            Type::Forall(var, body) => Type::forall(var.clone(), self.zonk(body)),
            Type::Exists(var, body) => Type::exists(var.clone(), self.zonk(body)),
            Type::Function(a, b) => Type::function(self.zonk(a), self.zonk(b)),
            Type::Application(a, b) => Type::app(self.zonk(a), self.zonk(b)),
            Type::Record(row) => Type::Record(self.zonk_row(row)),
            Type::Variant(row) => Type::Variant(self.zonk_row(row)),
        }
    }

    fn zonk_row(&self, row: &Row) -> Row {
        Row {
            fields: row
                .fields
                .iter()
                .map(|(label, field)| (label.clone(), self.zonk(field)))
                .collect(),
            ext: row.ext.as_ref().map(|ext| Box::new(self.zonk(ext))),
        }
    }

    /// Whether `uni` occurs in `ty`, looking through solved univars.
    fn occurs(&self, uni: UniVarId, ty: &Type) -> bool {
        match ty {
            Type::UniVar(other) => {
                *other == uni
                    || self
                        .solution(*other)
                        .is_some_and(|solution| self.occurs(uni, solution))
            }
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) => false,
            Type::Forall(_, body) | Type::Exists(_, body) => self.occurs(uni, body),
            Type::Function(a, b) | Type::Application(a, b) => {
                self.occurs(uni, a) || self.occurs(uni, b)
            }
            Type::Record(row) | Type::Variant(row) => {
                row.fields.values().any(|field| self.occurs(uni, field))
                    || row.ext.as_deref().is_some_and(|ext| self.occurs(uni, ext))
            }
        }
    }

    // -- scoped regions -----------------------------------------------------

    /// Run `action` with a snapshot of `sigs`; restore it on every exit
    /// path. The structural analogue of a nested environment.
    pub fn scoped<T>(
        &mut self,
        action: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        let saved_sigs = self.sigs.clone();
        let saved_declared = self.declared.clone();
        let result = action(self);
        self.sigs = saved_sigs;
        self.declared = saved_declared;
        result
    }

    /// Run `action` one generalization level deeper, then close over the
    /// univars the region allocated: solved ones are substituted into the
    /// result, unsolved ones that stayed inside the region and occur in the
    /// result are bound by fresh `Forall`s. Unsolved univars whose scope
    /// was lowered to the enclosing level leaked out by reference and are
    /// left alone.
    pub fn forall_scope(
        &mut self,
        action: impl FnOnce(&mut Self) -> Result<Type, TypeError>,
    ) -> Result<Type, TypeError> {
        let start = self.vars.len();
        self.scope.0 += 1;
        let result = action(self);
        self.scope.0 -= 1;
        let mut out = result?;
        let end = self.vars.len();

        for index in start..end {
            let uni = UniVarId(index as u32);
            if let Some(solution) = self.solution(uni).cloned() {
                out = self.substitute_ty(&Type::UniVar(uni), &solution, &out);
            }
        }

        // Newest first, so the earliest-allocated univar binds outermost.
        for index in (start..end).rev() {
            let uni = UniVarId(index as u32);
            let unsolved_at = self.uni_var_scope(uni);
            if let Some(scope) = unsolved_at
                && scope > self.scope
                && self.occurs(uni, &out)
            {
                let var = self.fresh_type_var_name();
                self.trace_step(
                    UnifyAction::Generalize,
                    &Type::UniVar(uni),
                    &Type::Var(var.clone()),
                    "",
                );
                self.solve_uni_var(uni, Type::Var(var.clone()))?;
                out = self.substitute_ty(&Type::UniVar(uni), &Type::Var(var.clone()), &out);
                out = Type::forall(var, out);
            }
        }
        Ok(out)
    }

    // -- substitution -------------------------------------------------------

    /// Eliminate the bound variable `var` from `body`, replacing it with a
    /// fresh univar or skolem per the variance table. Binders shadowing
    /// `var` are respected.
    pub fn substitute(&mut self, variance: Variance, var: &Name, body: &Type) -> Type {
        let replacement = match variance {
            Variance::In => self.fresh_uni_var(),
            Variance::Out | Variance::Inv => Type::Skolem(self.fresh_skolem(var)),
        };
        self.trace_step(UnifyAction::Instantiate, &Type::Var(var.clone()), &replacement, "");
        replace_var(var, &replacement, body)
    }

    /// Structural whole-type replacement of `from` by `to`. Unsound for
    /// `Var` under recursive binders, so callers only pass non-`Var` types.
    /// Rewrites through already-solved univars via override.
    pub(crate) fn substitute_ty(&mut self, from: &Type, to: &Type, ty: &Type) -> Type {
        if ty == from {
            return to.clone();
        }
        match ty {
            Type::UniVar(uni) => {
                if let Some(solution) = self.solution(*uni).cloned() {
                    let rewritten = self.substitute_ty(from, to, &solution);
                    if rewritten != solution {
                        self.override_uni_var(*uni, rewritten);
                    }
                }
                ty.clone()
            }
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) => ty.clone(),
            Type::Forall(var, body) => {
                Type::forall(var.clone(), self.substitute_ty(from, to, body))
            }
            Type::Exists(var, body) => {
                Type::exists(var.clone(), self.substitute_ty(from, to, body))
            }
            Type::Function(a, b) => Type::function(
                self.substitute_ty(from, to, a),
                self.substitute_ty(from, to, b),
            ),
            Type::Application(a, b) => Type::app(
                self.substitute_ty(from, to, a),
                self.substitute_ty(from, to, b),
            ),
            Type::Record(row) => Type::Record(self.substitute_ty_row(from, to, row)),
            Type::Variant(row) => Type::Variant(self.substitute_ty_row(from, to, row)),
        }
    }

    fn substitute_ty_row(&mut self, from: &Type, to: &Type, row: &Row) -> Row {
        Row {
            fields: row
                .fields
                .iter()
                .map(|(label, field)| (label.clone(), self.substitute_ty(from, to, field)))
                .collect(),
            ext: row
                .ext
                .as_ref()
                .map(|ext| Box::new(self.substitute_ty(from, to, ext))),
        }
    }

    // -- instantiation ------------------------------------------------------

    /// Unwrap outer quantifiers into a monomorphic layer, instantiating
    /// each bound variable per the variance table. A free `Var` reaching
    /// this point is unbound and fatal.
    pub fn mono(&mut self, variance: Variance, ty: Type) -> Result<MonoLayer, TypeError> {
        match ty {
            Type::Var(name) => Err(TypeError::UnboundTypeVariable { name }),
            Type::Name(name) => Ok(MonoLayer::Name(name)),
            Type::Skolem(skolem) => Ok(MonoLayer::Skolem(skolem)),
            Type::UniVar(uni) => match self.solution(uni).cloned() {
                Some(solution) => self.mono(variance, solution),
                None => Ok(MonoLayer::UniVar(uni)),
            },
            Type::Forall(var, body) => {
                let body = self.substitute(variance, &var, &body);
                self.mono(variance, body)
            }
            Type::Exists(var, body) => {
                let body = self.substitute(variance.flip(), &var, &body);
                self.mono(variance.flip(), body)
            }
            Type::Function(from, to) => Ok(MonoLayer::Function(from, to)),
            Type::Application(head, arg) => Ok(MonoLayer::Application(head, arg)),
            Type::Record(row) => Ok(MonoLayer::Record(row)),
            Type::Variant(row) => Ok(MonoLayer::Variant(row)),
        }
    }

    // -- tracing ------------------------------------------------------------

    /// Enable step recording for observability tools.
    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    /// Take and clear the recorded steps.
    pub fn take_trace(&mut self) -> Vec<UnifyStep> {
        std::mem::take(&mut self.steps)
    }

    pub(crate) fn trace_step(&mut self, action: UnifyAction, left: &Type, right: &Type, detail: &str) {
        if !self.tracing {
            return;
        }
        self.steps.push(UnifyStep {
            step: self.steps.len(),
            action,
            left: left.to_string(),
            right: right.to_string(),
            detail: detail.to_string(),
        });
    }
}

/// Replace `Var(var)` with `replacement`, respecting shadowing binders.
fn replace_var(var: &Name, replacement: &Type, ty: &Type) -> Type {
    match ty {
        Type::Var(v) if v == var => replacement.clone(),
        Type::Name(_) | Type::Var(_) | Type::Skolem(_) | Type::UniVar(_) => ty.clone(),
        Type::Forall(v, _) | Type::Exists(v, _) if v == var => ty.clone(),
        Type::Forall(v, body) => Type::forall(v.clone(), replace_var(var, replacement, body)),
        Type::Exists(v, body) => Type::exists(v.clone(), replace_var(var, replacement, body)),
        Type::Function(a, b) => Type::function(
            replace_var(var, replacement, a),
            replace_var(var, replacement, b),
        ),
        Type::Application(a, b) => Type::app(
            replace_var(var, replacement, a),
            replace_var(var, replacement, b),
        ),
        Type::Record(row) => Type::Record(replace_var_row(var, replacement, row)),
        Type::Variant(row) => Type::Variant(replace_var_row(var, replacement, row)),
    }
}

fn replace_var_row(var: &Name, replacement: &Type, row: &Row) -> Row {
    Row {
        fields: row
            .fields
            .iter()
            .map(|(label, field)| (label.clone(), replace_var(var, replacement, field)))
            .collect(),
        ext: row
            .ext
            .as_ref()
            .map(|ext| Box::new(replace_var(var, replacement, ext))),
    }
}



// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checker<T>(f: impl FnOnce(&mut Checker<'_>) -> T) -> T {
        let mut names = NameGen::new();
        let mut checker = Checker::new(Builtins::default(), &mut names);
        f(&mut checker)
    }

    #[test]
    fn solving_twice_is_an_internal_error() {
        with_checker(|checker| {
            let uni = checker.fresh_uni_var_id();
            let int = Type::Name(Name::builtin(NameKind::Int));
            checker.solve_uni_var(uni, int.clone()).unwrap();
            let err = checker.solve_uni_var(uni, int).unwrap_err();
            assert!(matches!(err, TypeError::Internal { .. }));
        });
    }

    #[test]
    fn solving_lowers_scopes_of_mentioned_univars() {
        with_checker(|checker| {
            let outer = checker.fresh_uni_var_id();
            let inner = checker
                .forall_scope(|this| {
                    let inner = this.fresh_uni_var_id();
                    assert_eq!(this.uni_var_scope(inner), Some(Scope(1)));
                    // Solving the outer variable to mention the inner one
                    // drags the inner variable down to the outer scope.
                    this.solve_uni_var(
                        outer,
                        Type::function(
                            Type::UniVar(inner),
                            Type::Name(Name::builtin(NameKind::Int)),
                        ),
                    )?;
                    assert_eq!(this.uni_var_scope(inner), Some(Scope(0)));
                    // The leaked variable must not be generalized.
                    Ok(Type::UniVar(inner))
                })
                .unwrap();
            assert_eq!(checker.zonk(&inner), inner);
        });
    }

    #[test]
    fn direct_cycle_collapses_to_skolem() {
        with_checker(|checker| {
            let a = checker.fresh_uni_var_id();
            let b = checker.fresh_uni_var_id();
            checker.solve_uni_var(a, Type::UniVar(b)).unwrap();
            checker.solve_uni_var(b, Type::UniVar(a)).unwrap();
            assert!(matches!(
                checker.zonk(&Type::UniVar(a)),
                Type::Skolem(_)
            ));
        });
    }

    #[test]
    fn indirect_cycle_is_self_referential() {
        with_checker(|checker| {
            let a = checker.fresh_uni_var_id();
            let err = checker
                .solve_uni_var(
                    a,
                    Type::function(
                        Type::UniVar(a),
                        Type::Name(Name::builtin(NameKind::Int)),
                    ),
                )
                .unwrap_err();
            assert!(matches!(err, TypeError::SelfReferential { .. }));
            // The store stays acyclic so later zonks terminate.
            let _ = checker.zonk(&Type::UniVar(a));
        });
    }

    #[test]
    fn forall_scope_generalizes_deep_unsolved_vars() {
        with_checker(|checker| {
            let ty = checker
                .forall_scope(|this| {
                    let arg = this.fresh_uni_var();
                    Ok(Type::function(arg.clone(), arg))
                })
                .unwrap();
            match &ty {
                Type::Forall(var, body) => {
                    let expected =
                        Type::function(Type::Var(var.clone()), Type::Var(var.clone()));
                    assert_eq!(**body, expected);
                }
                other => panic!("expected a forall, got {other}"),
            }
        });
    }

    #[test]
    fn forall_scope_skips_vars_missing_from_the_body() {
        with_checker(|checker| {
            let ty = checker
                .forall_scope(|this| {
                    let _unused = this.fresh_uni_var();
                    Ok(Type::Name(Name::builtin(NameKind::Int)))
                })
                .unwrap();
            assert_eq!(ty, Type::Name(Name::builtin(NameKind::Int)));
        });
    }

    #[test]
    fn earliest_univar_binds_outermost() {
        with_checker(|checker| {
            // \x y -> x, inferred by hand: a -> b -> a.
            let ty = checker
                .forall_scope(|this| {
                    let x = this.fresh_uni_var();
                    let y = this.fresh_uni_var();
                    Ok(Type::function(x.clone(), Type::function(y, x)))
                })
                .unwrap();
            let Type::Forall(a, body) = &ty else {
                panic!("expected forall, got {ty}");
            };
            let Type::Forall(b, body) = &**body else {
                panic!("expected nested forall, got {body}");
            };
            assert_eq!(
                **body,
                Type::function(
                    Type::Var(a.clone()),
                    Type::function(Type::Var(b.clone()), Type::Var(a.clone()))
                )
            );
        });
    }

    #[test]
    fn mono_instantiates_forall_flexibly_on_the_producing_side() {
        with_checker(|checker| {
            let var = checker.fresh_type_var_name();
            let ty = Type::forall(
                var.clone(),
                Type::function(Type::Var(var.clone()), Type::Var(var)),
            );

            match checker.mono(Variance::In, ty.clone()).unwrap() {
                MonoLayer::Function(from, _) => {
                    assert!(matches!(*from, Type::UniVar(_)));
                }
                other => panic!("expected a function layer, got {other:?}"),
            }

            match checker.mono(Variance::Out, ty).unwrap() {
                MonoLayer::Function(from, _) => {
                    assert!(matches!(*from, Type::Skolem(_)));
                }
                other => panic!("expected a function layer, got {other:?}"),
            }
        });
    }

    #[test]
    fn mono_flips_variance_under_exists() {
        with_checker(|checker| {
            let var = checker.fresh_type_var_name();
            let ty = Type::exists(var.clone(), Type::Var(var));
            // On the producing side an existential is rigid.
            assert!(matches!(
                checker.mono(Variance::In, ty.clone()).unwrap(),
                MonoLayer::Skolem(_)
            ));
            // On the consuming side the consumer gets to pick.
            assert!(matches!(
                checker.mono(Variance::Out, ty).unwrap(),
                MonoLayer::UniVar(_)
            ));
        });
    }

    #[test]
    fn mono_rejects_free_vars() {
        with_checker(|checker| {
            let var = checker.fresh_type_var_name();
            let err = checker.mono(Variance::In, Type::Var(var)).unwrap_err();
            assert!(matches!(err, TypeError::UnboundTypeVariable { .. }));
        });
    }

    #[test]
    fn substitute_respects_shadowing() {
        with_checker(|checker| {
            let var = checker.fresh_type_var_name();
            // forall v. v, with the same v free outside: only the free
            // occurrence is replaced.
            let body = Type::function(
                Type::Var(var.clone()),
                Type::forall(var.clone(), Type::Var(var.clone())),
            );
            let out = checker.substitute(Variance::In, &var, &body);
            let Type::Function(from, to) = out else {
                panic!("expected a function");
            };
            assert!(matches!(*from, Type::UniVar(_)));
            assert_eq!(*to, Type::forall(var.clone(), Type::Var(var)));
        });
    }

    #[test]
    fn scoped_restores_sigs() {
        with_checker(|checker| {
            let mut name_gen = NameGen::seeded(1000);
            let name = name_gen.fresh("x", Loc::synthetic());
            checker
                .scoped(|this| {
                    let uni = this.fresh_uni_var();
                    this.sigs.insert(name.clone(), uni);
                    assert!(this.sigs.contains_key(&name));
                    Ok(())
                })
                .unwrap();
            assert!(!checker.sigs.contains_key(&name));
        });
    }

    #[test]
    fn tracing_records_solve_steps() {
        with_checker(|checker| {
            checker.enable_tracing();
            let uni = checker.fresh_uni_var_id();
            checker
                .solve_uni_var(uni, Type::Name(Name::builtin(NameKind::Text)))
                .unwrap();
            let steps = checker.take_trace();
            assert!(
                steps
                    .iter()
                    .any(|s| matches!(s.action, UnifyAction::Solve) && s.right == "Text")
            );
        });
    }
}
