//! The bidirectional checker: subtyping, joins, rows, inference, and
//! normalisation.
//!
//! `infer` synthesises a type for an expression; `check` pushes an expected
//! type into it. Both lean on `subtype`, which solves unification variables
//! as a side effect, and on `supertype`, the join used wherever two branches
//! must agree. Declaration groups arrive in dependency order from the
//! resolver; each group is inferred as a unit and its exports normalised.

use std::collections::BTreeMap;

use sable_ast::{
    Binding, Constructor, Decl, DeclKind, Expr, ExprKind, Label, Loc, Name, Pattern, PatternKind,
    Row, RowKind, Skolem, Type, UniVarId, pattern_names,
};

use crate::{Checker, MonoLayer, TypeError, UnifyAction, Variance};

impl Checker<'_> {
    // -----------------------------------------------------------------------
    // Subtyping
    // -----------------------------------------------------------------------

    /// Assert `lhs ≤ rhs`: a value of type `lhs` is usable where `rhs` is
    /// expected. Solves univars as a side effect.
    pub fn subtype(&mut self, lhs: Type, rhs: Type) -> Result<(), TypeError> {
        if lhs == rhs {
            self.trace_step(UnifyAction::Identity, &lhs, &rhs, "");
            return Ok(());
        }
        let left = self.mono(Variance::In, lhs)?;
        let right = self.mono(Variance::Out, rhs)?;
        self.trace_step(
            UnifyAction::Decompose,
            &left.clone().into_type(),
            &right.clone().into_type(),
            "subtype",
        );
        match (left, right) {
            (MonoLayer::UniVar(u), MonoLayer::UniVar(v)) if u == v => Ok(()),
            (MonoLayer::UniVar(u), right) => self.solve_uni_var(u, right.into_type()),
            (left, MonoLayer::UniVar(v)) => self.solve_uni_var(v, left.into_type()),
            (MonoLayer::Name(a), MonoLayer::Name(b)) => {
                if a == b || self.subtype_relation(&a, &b) {
                    Ok(())
                } else {
                    Err(TypeError::NotASubtype {
                        lhs: Type::Name(a),
                        rhs: Type::Name(b),
                    })
                }
            }
            (MonoLayer::Skolem(a), MonoLayer::Skolem(b)) if a == b => Ok(()),
            (MonoLayer::Function(in_l, out_l), MonoLayer::Function(in_r, out_r)) => {
                // Contravariant argument, covariant result.
                self.subtype(*in_r, *in_l)?;
                self.subtype(*out_l, *out_r)
            }
            (MonoLayer::Application(head_l, arg_l), MonoLayer::Application(head_r, arg_r)) => {
                // Invariant in both positions: no kind variance analysis.
                self.invariant(*head_l, *head_r)?;
                self.invariant(*arg_l, *arg_r)
            }
            (MonoLayer::Record(lhs), MonoLayer::Record(rhs)) => {
                self.subtype_row(RowKind::Record, lhs, rhs)
            }
            (MonoLayer::Variant(lhs), MonoLayer::Variant(rhs)) => {
                self.subtype_row(RowKind::Variant, lhs, rhs)
            }
            (left, right) => Err(TypeError::NotASubtype {
                lhs: left.into_type(),
                rhs: right.into_type(),
            }),
        }
    }

    fn subtype_relation(&self, from: &Name, to: &Name) -> bool {
        self.builtins
            .subtype_relations
            .iter()
            .any(|(lhs, rhs)| lhs == from && rhs == to)
    }

    fn invariant(&mut self, a: Type, b: Type) -> Result<(), TypeError> {
        self.subtype(a.clone(), b.clone())?;
        self.subtype(b, a)
    }

    /// Every label on the left must be accepted on the right; the left
    /// extension, if any, covers whatever the right has beyond those labels.
    fn subtype_row(&mut self, kind: RowKind, lhs: Row, rhs: Row) -> Result<(), TypeError> {
        let rhs_ty = Type::row(kind, rhs.clone());
        for (label, lhs_field) in &lhs.fields {
            match self.deep_lookup(kind, label, rhs_ty.clone())? {
                Some(rhs_field) => self.subtype(lhs_field.clone(), rhs_field)?,
                None => {
                    return Err(match kind {
                        RowKind::Record => TypeError::MissingField {
                            label: label.clone(),
                            ty: rhs_ty,
                        },
                        RowKind::Variant => TypeError::MissingVariant {
                            label: label.clone(),
                            ty: rhs_ty,
                        },
                    });
                }
            }
        }
        if let Some(ext) = lhs.ext {
            let rest = self.diff(kind, rhs, &lhs.fields)?;
            self.subtype(*ext, Type::row(kind, rest))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Row operations
    // -----------------------------------------------------------------------

    /// Find `label` in a row-shaped type, walking the extension chain. An
    /// unsolved univar extension is solved to a fresh singleton row so the
    /// lookup succeeds and the row grows.
    pub fn deep_lookup(
        &mut self,
        kind: RowKind,
        label: &Label,
        ty: Type,
    ) -> Result<Option<Type>, TypeError> {
        match self.mono(Variance::Inv, ty)? {
            MonoLayer::Record(row) if kind == RowKind::Record => self.row_lookup(kind, label, row),
            MonoLayer::Variant(row) if kind == RowKind::Variant => {
                self.row_lookup(kind, label, row)
            }
            MonoLayer::UniVar(uni) => {
                let field = self.fresh_uni_var();
                let ext = self.fresh_uni_var();
                let grown = Type::row(kind, Row::open([(label.clone(), field.clone())], ext));
                self.trace_step(UnifyAction::RowSolve, &Type::UniVar(uni), &grown, "");
                self.solve_uni_var(uni, grown)?;
                Ok(Some(field))
            }
            _ => Ok(None),
        }
    }

    fn row_lookup(
        &mut self,
        kind: RowKind,
        label: &Label,
        row: Row,
    ) -> Result<Option<Type>, TypeError> {
        if let Some(field) = row.fields.get(label) {
            return Ok(Some(field.clone()));
        }
        match row.ext {
            Some(ext) => self.deep_lookup(kind, label, *ext),
            None => Ok(None),
        }
    }

    /// Merge the extension chain into a single row. Stops at a kind
    /// mismatch, a bound variable, a skolem, an unsolved univar, or a
    /// concrete non-row type.
    pub fn compress(&mut self, kind: RowKind, row: Row) -> Result<Row, TypeError> {
        let mut fields = row.fields;
        let mut ext = row.ext.map(|ext| *ext);
        loop {
            let Some(current) = ext else { break };
            if matches!(current, Type::Var(_)) {
                ext = Some(current);
                break;
            }
            match self.mono(Variance::Inv, current)? {
                MonoLayer::Record(inner) if kind == RowKind::Record => {
                    for (label, field) in inner.fields {
                        fields.entry(label).or_insert(field);
                    }
                    ext = inner.ext.map(|ext| *ext);
                }
                MonoLayer::Variant(inner) if kind == RowKind::Variant => {
                    for (label, field) in inner.fields {
                        fields.entry(label).or_insert(field);
                    }
                    ext = inner.ext.map(|ext| *ext);
                }
                layer => {
                    ext = Some(layer.into_type());
                    break;
                }
            }
        }
        Ok(Row {
            fields,
            ext: ext.map(Box::new),
        })
    }

    /// `compress(kind, row)` minus the labels present in `removed`,
    /// preserving the extension.
    pub fn diff(
        &mut self,
        kind: RowKind,
        row: Row,
        removed: &BTreeMap<Label, Type>,
    ) -> Result<Row, TypeError> {
        let mut compressed = self.compress(kind, row)?;
        compressed
            .fields
            .retain(|label, _| !removed.contains_key(label));
        Ok(compressed)
    }

    // -----------------------------------------------------------------------
    // Supertype
    // -----------------------------------------------------------------------

    /// The least common supertype of two types: the join used for `if`,
    /// `case`, `match`, and list items. Fresh univars introduced while
    /// matching are generalized away by the surrounding scope.
    pub fn supertype(&mut self, a: Type, b: Type) -> Result<Type, TypeError> {
        self.forall_scope(|this| this.join(a, b))
    }

    fn join(&mut self, a: Type, b: Type) -> Result<Type, TypeError> {
        if a == b {
            return Ok(a);
        }
        let left = self.mono(Variance::In, a)?;
        let right = self.mono(Variance::In, b)?;
        match (left, right) {
            (MonoLayer::UniVar(u), MonoLayer::UniVar(v)) if u == v => Ok(Type::UniVar(u)),
            (MonoLayer::UniVar(u), right) => {
                let ty = right.into_type();
                self.solve_uni_var(u, ty.clone())?;
                Ok(ty)
            }
            (left, MonoLayer::UniVar(v)) => {
                let ty = left.into_type();
                self.solve_uni_var(v, ty.clone())?;
                Ok(ty)
            }
            (MonoLayer::Name(x), MonoLayer::Name(y)) => self.join_names(x, y),
            (MonoLayer::Skolem(x), MonoLayer::Skolem(y)) if x == y => Ok(Type::Skolem(x)),
            (MonoLayer::Function(in_l, out_l), MonoLayer::Function(in_r, out_r)) => {
                // Best-effort join, not a proof: arrows join covariantly in
                // both positions.
                Ok(Type::function(
                    self.join(*in_l, *in_r)?,
                    self.join(*out_l, *out_r)?,
                ))
            }
            (MonoLayer::Application(head_l, arg_l), MonoLayer::Application(head_r, arg_r)) => {
                Ok(Type::app(
                    self.join(*head_l, *head_r)?,
                    self.join(*arg_l, *arg_r)?,
                ))
            }
            (MonoLayer::Record(lhs), MonoLayer::Record(rhs)) => {
                self.join_rows(RowKind::Record, lhs, rhs)
            }
            (MonoLayer::Variant(lhs), MonoLayer::Variant(rhs)) => {
                self.join_rows(RowKind::Variant, lhs, rhs)
            }
            (left, right) => Err(TypeError::CannotUnify {
                lhs: left.into_type(),
                rhs: right.into_type(),
            }),
        }
    }

    /// A direct common upper bound in the configured subtype relations.
    fn join_names(&mut self, x: Name, y: Name) -> Result<Type, TypeError> {
        if x == y {
            return Ok(Type::Name(x));
        }
        if self.subtype_relation(&x, &y) {
            return Ok(Type::Name(y));
        }
        if self.subtype_relation(&y, &x) {
            return Ok(Type::Name(x));
        }
        let uppers: Vec<&Name> = self
            .builtins
            .subtype_relations
            .iter()
            .filter(|(from, _)| *from == x)
            .map(|(_, to)| to)
            .filter(|upper| self.subtype_relation(&y, upper))
            .collect();
        match uppers.as_slice() {
            [upper] => Ok(Type::Name((*upper).clone())),
            _ => Err(TypeError::CannotUnify {
                lhs: Type::Name(x),
                rhs: Type::Name(y),
            }),
        }
    }

    /// Union of labels with per-label joins; extensions join pairwise.
    fn join_rows(&mut self, kind: RowKind, lhs: Row, rhs: Row) -> Result<Type, TypeError> {
        let lhs = self.compress(kind, lhs)?;
        let mut rhs = self.compress(kind, rhs)?;

        let mut fields = BTreeMap::new();
        for (label, lhs_field) in lhs.fields {
            match rhs.fields.remove(&label) {
                Some(rhs_field) => {
                    fields.insert(label, self.join(lhs_field, rhs_field)?);
                }
                None => {
                    fields.insert(label, lhs_field);
                }
            }
        }
        fields.extend(rhs.fields);

        let ext = match (lhs.ext, rhs.ext) {
            (Some(lhs_ext), Some(rhs_ext)) => Some(self.join(*lhs_ext, *rhs_ext)?),
            (Some(ext), None) | (None, Some(ext)) => Some(*ext),
            (None, None) => None,
        };
        Ok(Type::row(
            kind,
            Row {
                fields,
                ext: ext.map(Box::new),
            },
        ))
    }

    // -----------------------------------------------------------------------
    // Inference
    // -----------------------------------------------------------------------

    /// Synthesise a type for an expression.
    pub fn infer(&mut self, expr: &Expr) -> Result<Type, TypeError> {
        match &expr.node {
            ExprKind::Name(name) => Ok(self.lookup_sig(name)),
            ExprKind::Variant(label) => {
                let payload = self.fresh_uni_var();
                let ext = self.fresh_uni_var();
                Ok(Type::function(
                    payload.clone(),
                    Type::Variant(Row::open([(label.clone(), payload)], ext)),
                ))
            }
            ExprKind::Application(func, arg) => {
                let func_ty = self.infer(func)?;
                self.infer_app(func_ty, arg, expr.loc)
            }
            ExprKind::Lambda(param, body) => self.scoped(|this| {
                let param_ty = this.infer_pattern(param)?;
                let body_ty = this.infer(body)?;
                Ok(Type::function(param_ty, body_ty))
            }),
            ExprKind::Let(binding, body) => self.scoped(|this| {
                this.infer_binding(binding)?;
                this.infer(body)
            }),
            ExprKind::Annotation(inner, ty) => {
                self.check(inner, ty.clone())?;
                Ok(ty.clone())
            }
            ExprKind::If(cond, then, otherwise) => {
                self.check(cond, Type::Name(self.builtins.bool_ty.clone()))?;
                let then_ty = self.infer(then)?;
                let else_ty = self.infer(otherwise)?;
                self.supertype(then_ty, else_ty)
            }
            ExprKind::Case(scrutinee, arms) => {
                let scrutinee_ty = self.infer(scrutinee)?;
                let mut result: Option<Type> = None;
                for (pattern, body) in arms {
                    let body_ty = self.scoped(|this| {
                        this.check_pattern(pattern, &scrutinee_ty)?;
                        this.infer(body)
                    })?;
                    result = Some(match result {
                        None => body_ty,
                        Some(previous) => self.supertype(previous, body_ty)?,
                    });
                }
                Ok(result.unwrap_or_else(|| self.fresh_uni_var()))
            }
            ExprKind::Match(arms) => {
                let arity = arms.first().map_or(0, |arm| arm.patterns.len());
                let mut result: Option<Type> = None;
                for arm in arms {
                    if arm.patterns.len() != arity {
                        return Err(TypeError::ArityMismatch {
                            expected: arity,
                            found: arm.patterns.len(),
                            loc: Some(arm.body.loc),
                        });
                    }
                    let arm_ty = self.scoped(|this| {
                        let mut param_tys = Vec::with_capacity(arm.patterns.len());
                        for pattern in &arm.patterns {
                            param_tys.push(this.infer_pattern(pattern)?);
                        }
                        let body_ty = this.infer(&arm.body)?;
                        Ok(param_tys
                            .into_iter()
                            .rev()
                            .fold(body_ty, |acc, param| Type::function(param, acc)))
                    })?;
                    result = Some(match result {
                        None => arm_ty,
                        Some(previous) => self.supertype(previous, arm_ty)?,
                    });
                }
                Ok(result.unwrap_or_else(|| self.fresh_uni_var()))
            }
            ExprKind::List(items) => {
                let mut elem = self.fresh_uni_var();
                for item in items {
                    let item_ty = self.infer(item)?;
                    elem = self.supertype(elem, item_ty)?;
                }
                Ok(Type::app(Type::Name(self.builtins.list_ty.clone()), elem))
            }
            ExprKind::Record(fields) => {
                let mut row = BTreeMap::new();
                for (label, field) in fields {
                    let field_ty = self.infer(field)?;
                    row.insert(label.clone(), field_ty);
                }
                Ok(Type::Record(Row {
                    fields: row,
                    ext: None,
                }))
            }
            ExprKind::RecordLens(path) => Ok(self.infer_lens(path)),
            ExprKind::IntLiteral(value) => Ok(self.int_literal_type(*value)),
            ExprKind::TextLiteral(_) => Ok(Type::Name(self.builtins.text_ty.clone())),
            ExprKind::CharLiteral(_) => Ok(Type::Name(self.builtins.char_ty.clone())),
        }
    }

    fn int_literal_type(&self, value: i64) -> Type {
        if value >= 0 {
            Type::Name(self.builtins.nat_ty.clone())
        } else {
            Type::Name(self.builtins.int_ty.clone())
        }
    }

    /// `Lens s t a b` for a focus path, with the source and target records
    /// sharing their extension variables so only the focused field differs.
    fn infer_lens(&mut self, path: &[Label]) -> Type {
        let source_elem = self.fresh_uni_var();
        let target_elem = self.fresh_uni_var();
        let mut source = source_elem.clone();
        let mut target = target_elem.clone();
        for label in path.iter().rev() {
            let rest = self.fresh_uni_var();
            source = Type::Record(Row::open([(label.clone(), source)], rest.clone()));
            target = Type::Record(Row::open([(label.clone(), target)], rest));
        }
        let lens = Type::Name(self.builtins.lens_ty.clone());
        Type::app(
            Type::app(Type::app(Type::app(lens, source), target), source_elem),
            target_elem,
        )
    }

    /// Apply an already-inferred function type to an argument expression.
    fn infer_app(&mut self, func_ty: Type, arg: &Expr, loc: Loc) -> Result<Type, TypeError> {
        match self.mono(Variance::In, func_ty)? {
            MonoLayer::Function(from, to) => {
                self.check(arg, *from)?;
                Ok(*to)
            }
            MonoLayer::UniVar(uni) => {
                let from = self.infer(arg)?;
                let to = self.fresh_uni_var();
                self.solve_uni_var(uni, Type::function(from, to.clone()))?;
                Ok(to)
            }
            layer => Err(TypeError::NotAFunction {
                ty: layer.into_type(),
                loc: Some(loc),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Checking
    // -----------------------------------------------------------------------

    /// Verify an expression against an expected type, letting the
    /// expectation drive inference where it can.
    pub fn check(&mut self, expr: &Expr, expected: Type) -> Result<(), TypeError> {
        if let ExprKind::Annotation(inner, annot) = &expr.node {
            self.subtype(annot.clone(), expected)?;
            return self.check(inner, annot.clone());
        }

        // An unsolved univar expectation: inference may solve it while
        // working through the expression, so look again afterwards.
        if let Type::UniVar(uni) = &expected
            && self.solution(*uni).is_none()
        {
            let uni = *uni;
            let inferred = self.infer(expr)?;
            return if self.solution(uni).is_none() {
                self.solve_uni_var(uni, inferred)
            } else {
                self.subtype(inferred, Type::UniVar(uni))
            };
        }

        let layer = self.mono(Variance::Out, expected)?;
        match (&expr.node, layer) {
            (ExprKind::Lambda(param, body), MonoLayer::Function(from, to)) => {
                self.scoped(|this| {
                    this.check_pattern(param, &from)?;
                    this.check(body, *to)
                })
            }
            (ExprKind::List(items), MonoLayer::Application(head, elem))
                if self.zonk(&head) == Type::Name(self.builtins.list_ty.clone()) =>
            {
                for item in items {
                    self.check(item, (*elem).clone())?;
                }
                Ok(())
            }
            (ExprKind::Record(fields), MonoLayer::Record(row)) => {
                self.check_record(fields, row)
            }
            (_, layer) => {
                let inferred = self.infer(expr)?;
                self.subtype(inferred, layer.into_type())
            }
        }
    }

    /// Check a record literal against an expected row: every expected label
    /// must be present, and extra fields must fit the row's extension.
    fn check_record(
        &mut self,
        fields: &[(Label, Expr)],
        expected: Row,
    ) -> Result<(), TypeError> {
        let expected = self.compress(RowKind::Record, expected)?;
        let mut literal: BTreeMap<&Label, &Expr> =
            fields.iter().map(|(label, field)| (label, field)).collect();

        for (label, expected_field) in &expected.fields {
            match literal.remove(label) {
                Some(field) => self.check(field, expected_field.clone())?,
                None => {
                    return Err(TypeError::MissingField {
                        label: label.clone(),
                        ty: Type::Record(expected.clone()),
                    });
                }
            }
        }

        if literal.is_empty() {
            return Ok(());
        }
        match &expected.ext {
            Some(ext) => {
                let mut extra = BTreeMap::new();
                for (label, field) in literal {
                    let field_ty = self.infer(field)?;
                    extra.insert(label.clone(), field_ty);
                }
                self.subtype(
                    Type::Record(Row {
                        fields: extra,
                        ext: None,
                    }),
                    (**ext).clone(),
                )
            }
            None => {
                let (label, _) = literal.pop_first().expect("checked non-empty");
                Err(TypeError::MissingField {
                    label: label.clone(),
                    ty: Type::Record(expected),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    /// A pattern's type must be usable at the scrutinee or parameter type.
    pub fn check_pattern(&mut self, pattern: &Pattern, expected: &Type) -> Result<(), TypeError> {
        let pattern_ty = self.infer_pattern(pattern)?;
        self.subtype(pattern_ty, expected.clone())
    }

    /// Synthesise a pattern's type, binding its variables into `sigs`.
    pub fn infer_pattern(&mut self, pattern: &Pattern) -> Result<Type, TypeError> {
        match &pattern.node {
            PatternKind::Var(name) => {
                let uni = self.fresh_uni_var();
                self.sigs.insert(name.clone(), uni.clone());
                Ok(uni)
            }
            PatternKind::Wildcard(_) => Ok(self.fresh_uni_var()),
            PatternKind::Constructor(name, args) => self.infer_constructor_pattern(
                name,
                args,
                pattern.loc,
            ),
            PatternKind::Variant(label, payload) => {
                let payload_ty = match payload {
                    Some(payload) => self.infer_pattern(payload)?,
                    None => Type::Record(Row::default()),
                };
                let ext = self.fresh_uni_var();
                Ok(Type::Variant(Row::open(
                    [(label.clone(), payload_ty)],
                    ext,
                )))
            }
            PatternKind::Record(fields) => {
                let mut row = BTreeMap::new();
                for (label, field) in fields {
                    let field_ty = self.infer_pattern(field)?;
                    row.insert(label.clone(), field_ty);
                }
                let ext = self.fresh_uni_var();
                Ok(Type::Record(Row {
                    fields: row,
                    ext: Some(Box::new(ext)),
                }))
            }
            PatternKind::IntLiteral(value) => Ok(self.int_literal_type(*value)),
            PatternKind::TextLiteral(_) => Ok(Type::Name(self.builtins.text_ty.clone())),
            PatternKind::CharLiteral(_) => Ok(Type::Name(self.builtins.char_ty.clone())),
        }
    }

    /// Walk argument patterns off the constructor's arrows; anything other
    /// than an exact match is an arity error.
    fn infer_constructor_pattern(
        &mut self,
        name: &Name,
        args: &[Pattern],
        loc: Loc,
    ) -> Result<Type, TypeError> {
        let mut ty = self.lookup_sig(name);
        for (consumed, arg) in args.iter().enumerate() {
            match self.mono(Variance::In, ty)? {
                MonoLayer::Function(from, to) => {
                    self.check_pattern(arg, &from)?;
                    ty = *to;
                }
                _ => {
                    return Err(TypeError::ArityMismatch {
                        expected: consumed,
                        found: args.len(),
                        loc: Some(loc),
                    });
                }
            }
        }
        let resolved = self.zonk(&ty);
        let remaining = peel_quantifiers(&resolved);
        if matches!(remaining, Type::Function(..)) {
            let expected = args.len() + arrow_count(remaining);
            return Err(TypeError::ArityMismatch {
                expected,
                found: args.len(),
                loc: Some(loc),
            });
        }
        Ok(ty)
    }

    // -----------------------------------------------------------------------
    // Bindings and declaration groups
    // -----------------------------------------------------------------------

    /// Infer or check one binding, updating `sigs` with the result.
    pub fn infer_binding(&mut self, binding: &Binding) -> Result<(), TypeError> {
        match binding {
            Binding::Function(name, params, body) => {
                if self.declared.contains(name) {
                    let sig = self
                        .sigs
                        .get(name)
                        .cloned()
                        .expect("declared names carry signatures");
                    return self.check_function(params, body, sig);
                }
                let previous = self.sigs.get(name).cloned();
                let ty = self.forall_scope(|this| {
                    this.scoped(|this| {
                        let mut param_tys = Vec::with_capacity(params.len());
                        for param in params {
                            param_tys.push(this.infer_pattern(param)?);
                        }
                        let body_ty = this.infer(body)?;
                        Ok(param_tys
                            .into_iter()
                            .rev()
                            .fold(body_ty, |acc, param| Type::function(param, acc)))
                    })
                })?;
                // Tie recursive uses (the pre-registered placeholder) to the
                // final type.
                if let Some(previous) = previous {
                    self.subtype(ty.clone(), previous)?;
                }
                self.sigs.insert(name.clone(), ty);
                Ok(())
            }
            Binding::Value(pattern, expr) => {
                if let PatternKind::Var(name) = &pattern.node {
                    if self.declared.contains(name) {
                        let sig = self
                            .sigs
                            .get(name)
                            .cloned()
                            .expect("declared names carry signatures");
                        return self.check(expr, sig);
                    }
                    // A simple binding keeps its full polytype.
                    let previous = self.sigs.get(name).cloned();
                    let ty = self.forall_scope(|this| this.infer(expr))?;
                    if let Some(previous) = previous {
                        self.subtype(ty.clone(), previous)?;
                    }
                    self.sigs.insert(name.clone(), ty);
                    return Ok(());
                }

                let mut names = Vec::new();
                pattern_names(pattern, &mut names);
                let previous: Vec<(Name, Option<Type>)> = names
                    .iter()
                    .map(|name| (name.clone(), self.sigs.get(name).cloned()))
                    .collect();

                // Destructuring instantiates: the bound value flows into the
                // pattern, and the components come out monomorphic.
                let ty = self.forall_scope(|this| this.infer(expr))?;
                let pattern_ty = self.infer_pattern(pattern)?;
                self.subtype(ty, pattern_ty)?;

                for (name, placeholder) in previous {
                    let Some(placeholder) = placeholder else { continue };
                    let bound = self
                        .sigs
                        .get(&name)
                        .cloned()
                        .expect("pattern bound the name");
                    if self.declared.contains(&name) {
                        // The user signature stays authoritative.
                        self.subtype(bound, placeholder.clone())?;
                        self.sigs.insert(name, placeholder);
                    } else {
                        self.subtype(bound, placeholder)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Check a function binding against its declared signature, walking the
    /// parameters off the signature's arrows.
    fn check_function(
        &mut self,
        params: &[Pattern],
        body: &Expr,
        sig: Type,
    ) -> Result<(), TypeError> {
        self.scoped(|this| {
            let mut expected = sig;
            for param in params {
                match this.mono(Variance::Out, expected)? {
                    MonoLayer::Function(from, to) => {
                        this.check_pattern(param, &from)?;
                        expected = *to;
                    }
                    layer => {
                        return Err(TypeError::NotAFunction {
                            ty: layer.into_type(),
                            loc: Some(param.loc),
                        });
                    }
                }
            }
            this.check(body, expected)
        })
    }

    /// Infer one mutually-recursive declaration group. Signatures and
    /// constructors are registered before any body is inferred, so order
    /// inside the group does not matter. Returns the normalised types of
    /// every name the group defines.
    pub fn infer_decls(&mut self, group: &[Decl]) -> Result<BTreeMap<Name, Type>, TypeError> {
        let mut exported = Vec::new();

        for decl in group {
            if let DeclKind::Type {
                name,
                vars,
                constructors,
            } = &decl.node
            {
                self.register_type_decl(name, vars, constructors, &mut exported);
            }
        }

        // Placeholder univars let group-mates reference a binding before its
        // body has been inferred.
        for decl in group {
            if let DeclKind::Value { binding, .. } = &decl.node {
                for name in binding.defined_names() {
                    if !self.sigs.contains_key(&name) {
                        let uni = self.fresh_uni_var();
                        self.sigs.insert(name.clone(), uni);
                    }
                    exported.push(name);
                }
            }
        }

        for decl in group {
            if let DeclKind::Value { binding, locals } = &decl.node {
                self.infer_value_decl(binding, locals)?;
            }
        }

        let mut env = BTreeMap::new();
        for name in exported {
            let ty = self
                .sigs
                .get(&name)
                .cloned()
                .expect("every exported name was registered");
            let ty = if self.declared.contains(&name) {
                ty
            } else {
                self.normalise(ty)?
            };
            self.sigs.insert(name.clone(), ty.clone());
            env.insert(name, ty);
        }
        Ok(env)
    }

    fn infer_value_decl(&mut self, binding: &Binding, locals: &[Decl]) -> Result<(), TypeError> {
        if locals.is_empty() {
            return self.infer_binding(binding);
        }
        let names = binding.defined_names();
        let kept = self.scoped(|this| {
            for local in locals {
                this.infer_local_decl(local)?;
            }
            this.infer_binding(binding)?;
            Ok(names
                .iter()
                .map(|name| (name.clone(), this.sigs.get(name).cloned()))
                .collect::<Vec<_>>())
        })?;
        // Only the binding's own names survive the local scope.
        for (name, ty) in kept {
            if let Some(ty) = ty {
                self.sigs.insert(name, ty);
            }
        }
        Ok(())
    }

    fn infer_local_decl(&mut self, decl: &Decl) -> Result<(), TypeError> {
        match &decl.node {
            DeclKind::Value { binding, locals } => self.infer_value_decl(binding, locals),
            DeclKind::Signature { name, ty } => {
                self.install_signature(name.clone(), ty.clone());
                Ok(())
            }
            DeclKind::Type {
                name,
                vars,
                constructors,
            } => {
                let mut registered = Vec::new();
                self.register_type_decl(name, vars, constructors, &mut registered);
                Ok(())
            }
            DeclKind::Fixity { .. } => Ok(()),
        }
    }

    /// Turn each constructor into a closed ∀-type over the declaration's
    /// variables and install it as a signature.
    fn register_type_decl(
        &mut self,
        name: &Name,
        vars: &[Name],
        constructors: &[Constructor],
        exported: &mut Vec<Name>,
    ) {
        for constructor in constructors {
            let result = vars.iter().fold(Type::Name(name.clone()), |acc, var| {
                Type::app(acc, Type::Var(var.clone()))
            });
            let ty = constructor
                .args
                .iter()
                .rev()
                .fold(result, |acc, arg| Type::function(arg.clone(), acc));
            let ty = vars
                .iter()
                .rev()
                .fold(ty, |acc, var| Type::forall(var.clone(), acc));
            self.install_signature(constructor.name.clone(), ty);
            exported.push(constructor.name.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Normalisation
    // -----------------------------------------------------------------------

    /// Close an inferred type for export: compress its rows, bind residual
    /// univars universally and residual skolems existentially, and verify
    /// nothing internal is left.
    pub fn normalise(&mut self, ty: Type) -> Result<Type, TypeError> {
        let ty = self.zonk(&ty);
        let ty = self.compress_type(ty)?;
        let ty = self.uni_vars_to_forall(ty);
        let ty = self.skolems_to_exists(ty);
        self.ensure_normalised(ty)
    }

    /// Normalise every row's extension chain in the type.
    fn compress_type(&mut self, ty: Type) -> Result<Type, TypeError> {
        Ok(match ty {
            Type::Name(_) | Type::Var(_) | Type::Skolem(_) | Type::UniVar(_) => ty,
            Type::Forall(var, body) => Type::forall(var, self.compress_type(*body)?),
            Type::Exists(var, body) => Type::exists(var, self.compress_type(*body)?),
            Type::Function(a, b) => {
                Type::function(self.compress_type(*a)?, self.compress_type(*b)?)
            }
            Type::Application(a, b) => {
                Type::app(self.compress_type(*a)?, self.compress_type(*b)?)
            }
            Type::Record(row) => {
                let row = self.compress(RowKind::Record, row)?;
                Type::Record(self.compress_row_fields(row)?)
            }
            Type::Variant(row) => {
                let row = self.compress(RowKind::Variant, row)?;
                Type::Variant(self.compress_row_fields(row)?)
            }
        })
    }

    fn compress_row_fields(&mut self, row: Row) -> Result<Row, TypeError> {
        let mut fields = BTreeMap::new();
        for (label, field) in row.fields {
            fields.insert(label, self.compress_type(field)?);
        }
        let ext = match row.ext {
            Some(ext) => Some(Box::new(self.compress_type(*ext)?)),
            None => None,
        };
        Ok(Row { fields, ext })
    }

    /// Bind every still-unsolved univar in the type with a fresh `Forall`.
    ///
    /// Purely textual, unlike `forall_scope`: the store entries stay
    /// unsolved, so group-mates sharing a residual univar each export a
    /// self-contained type.
    pub fn uni_vars_to_forall(&mut self, ty: Type) -> Type {
        let mut body = self.zonk(&ty);
        let mut unsolved = Vec::new();
        collect_uni_vars(&body, &mut unsolved);
        for uni in unsolved.into_iter().rev() {
            let var = self.fresh_type_var_name();
            body = self.substitute_ty(&Type::UniVar(uni), &Type::Var(var.clone()), &body);
            body = Type::forall(var, body);
        }
        body
    }

    /// Bind every skolem in the type with a fresh `Exists`.
    ///
    /// Only sound at the module top level; a scope scheme for skolems
    /// mirroring univars would be needed before using this anywhere nested.
    pub fn skolems_to_exists(&mut self, ty: Type) -> Type {
        self.skolems_to_quantifier(ty, false)
    }

    /// Universal counterpart of `skolems_to_exists`, for contexts where the
    /// residual skolems really were arbitrary.
    pub fn skolems_to_forall(&mut self, ty: Type) -> Type {
        self.skolems_to_quantifier(ty, true)
    }

    fn skolems_to_quantifier(&mut self, ty: Type, universal: bool) -> Type {
        let mut body = self.zonk(&ty);
        let mut skolems = Vec::new();
        collect_skolems(&body, &mut skolems);
        for skolem in skolems.into_iter().rev() {
            // Same text, new id: the display form stays readable.
            let var = self.names.fresh(skolem.0.text().to_string(), skolem.0.loc);
            body = self.substitute_ty(&Type::Skolem(skolem), &Type::Var(var.clone()), &body);
            body = if universal {
                Type::forall(var, body)
            } else {
                Type::exists(var, body)
            };
        }
        body
    }

    /// Final walk: everything internal must be gone by now.
    fn ensure_normalised(&mut self, ty: Type) -> Result<Type, TypeError> {
        let ty = self.zonk(&ty);
        if ty.mentions_uni_var() {
            return Err(TypeError::DanglingUniVar { ty });
        }
        if ty.mentions_skolem() {
            return Err(TypeError::SkolemEscape { ty });
        }
        Ok(ty)
    }
}

fn arrow_count(ty: &Type) -> usize {
    match ty {
        Type::Function(_, to) => 1 + arrow_count(to),
        _ => 0,
    }
}

fn peel_quantifiers(ty: &Type) -> &Type {
    match ty {
        Type::Forall(_, body) | Type::Exists(_, body) => peel_quantifiers(body),
        _ => ty,
    }
}

/// Unsolved univars in first-occurrence order, deduplicated.
fn collect_uni_vars(ty: &Type, out: &mut Vec<UniVarId>) {
    match ty {
        Type::UniVar(uni) => {
            if !out.contains(uni) {
                out.push(*uni);
            }
        }
        Type::Name(_) | Type::Var(_) | Type::Skolem(_) => {}
        Type::Forall(_, body) | Type::Exists(_, body) => collect_uni_vars(body, out),
        Type::Function(a, b) | Type::Application(a, b) => {
            collect_uni_vars(a, out);
            collect_uni_vars(b, out);
        }
        Type::Record(row) | Type::Variant(row) => {
            for field in row.fields.values() {
                collect_uni_vars(field, out);
            }
            if let Some(ext) = &row.ext {
                collect_uni_vars(ext, out);
            }
        }
    }
}

/// Skolems in first-occurrence order, deduplicated.
fn collect_skolems(ty: &Type, out: &mut Vec<Skolem>) {
    match ty {
        Type::Skolem(skolem) => {
            if !out.contains(skolem) {
                out.push(skolem.clone());
            }
        }
        Type::Name(_) | Type::Var(_) | Type::UniVar(_) => {}
        Type::Forall(_, body) | Type::Exists(_, body) => collect_skolems(body, out),
        Type::Function(a, b) | Type::Application(a, b) => {
            collect_skolems(a, out);
            collect_skolems(b, out);
        }
        Type::Record(row) | Type::Variant(row) => {
            for field in row.fields.values() {
                collect_skolems(field, out);
            }
            if let Some(ext) = &row.ext {
                collect_skolems(ext, out);
            }
        }
    }
}
