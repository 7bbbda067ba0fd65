//! End-to-end scenarios: resolver and checker run together over a module.

use std::collections::BTreeMap;

use sable_ast::{
    Binding, Constructor, Decl, DeclKind, Expr, ExprKind, FileId, Fixity, FixityRelation, Label,
    Loc, Located, Name, NameGen, NameKind, Op, Pattern, PatternKind, Row, Type, alpha_equivalent,
};
use sable_diag::{Category, Severity};
use sable_infer::Builtins;

use crate::check_module;

fn l() -> Loc {
    Loc::new(FileId(0), 0, 1)
}

fn e(kind: ExprKind) -> Expr {
    Located::new(kind, l())
}

fn var(name: &Name) -> Expr {
    e(ExprKind::Name(name.clone()))
}

fn app(func: Expr, arg: Expr) -> Expr {
    e(ExprKind::Application(Box::new(func), Box::new(arg)))
}

fn pvar(name: &Name) -> Pattern {
    Located::new(PatternKind::Var(name.clone()), l())
}

fn fn_decl(name: &Name, params: Vec<Pattern>, body: Expr) -> Decl {
    Located::new(
        DeclKind::Value {
            binding: Binding::Function(name.clone(), params, body),
            locals: Vec::new(),
        },
        l(),
    )
}

fn val_decl(name: &Name, body: Expr) -> Decl {
    Located::new(
        DeclKind::Value {
            binding: Binding::Value(pvar(name), body),
            locals: Vec::new(),
        },
        l(),
    )
}

fn run(decls: Vec<Decl>, names: &mut NameGen) -> (BTreeMap<Name, Type>, Vec<sable_diag::Diagnostic>) {
    let (_, env, diags) = check_module(decls, Builtins::default(), names);
    (env, diags)
}

#[track_caller]
fn assert_alpha_eq(actual: &Type, expected: &Type) {
    assert!(
        alpha_equivalent(actual, expected),
        "expected `{expected}`, inferred `{actual}`"
    );
}

#[test]
fn classic_combinators_end_to_end() {
    let mut names = NameGen::new();
    let id = names.fresh("id", l());
    let konst = names.fresh("const", l());
    let apply = names.fresh("apply", l());
    let x = names.fresh("x", l());
    let y = names.fresh("y", l());
    let f = names.fresh("f", l());
    let z = names.fresh("z", l());

    let decls = vec![
        fn_decl(&id, vec![pvar(&x)], var(&x)),
        fn_decl(&konst, vec![pvar(&y), pvar(&z)], var(&y)),
        fn_decl(&apply, vec![pvar(&f), pvar(&x)], app(var(&f), var(&x))),
    ];
    let (env, diags) = run(decls, &mut names);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");

    let a = names.fresh("a", l());
    let b = names.fresh("b", l());
    assert_alpha_eq(
        env.get(&id).unwrap(),
        &Type::forall(a.clone(), Type::function(Type::Var(a.clone()), Type::Var(a.clone()))),
    );
    assert_alpha_eq(
        env.get(&konst).unwrap(),
        &Type::forall(
            a.clone(),
            Type::forall(
                b.clone(),
                Type::function(
                    Type::Var(a.clone()),
                    Type::function(Type::Var(b.clone()), Type::Var(a.clone())),
                ),
            ),
        ),
    );
    assert_alpha_eq(
        env.get(&apply).unwrap(),
        &Type::forall(
            a.clone(),
            Type::forall(
                b.clone(),
                Type::function(
                    Type::function(Type::Var(a.clone()), Type::Var(b.clone())),
                    Type::function(Type::Var(a), Type::Var(b)),
                ),
            ),
        ),
    );
}

#[test]
fn declarations_resolve_out_of_source_order() {
    let mut names = NameGen::new();
    let double = names.fresh("double", l());
    let add = names.fresh("add", l());
    let x = names.fresh("x", l());

    // double references add but is declared first.
    let decls = vec![
        fn_decl(&double, vec![pvar(&x)], app(app(var(&add), var(&x)), var(&x))),
        Located::new(
            DeclKind::Signature {
                name: add.clone(),
                ty: Type::function(
                    Type::Name(Name::builtin(NameKind::Int)),
                    Type::function(
                        Type::Name(Name::builtin(NameKind::Int)),
                        Type::Name(Name::builtin(NameKind::Int)),
                    ),
                ),
            },
            l(),
        ),
        fn_decl(&add, vec![pvar(&x)], e(ExprKind::Match(Vec::new()))),
    ];

    let (env, diags) = run(decls, &mut names);
    assert!(
        diags.iter().all(|d| d.severity != Severity::Error),
        "unexpected errors: {diags:?}"
    );
    assert_alpha_eq(
        env.get(&double).unwrap(),
        &Type::function(
            Type::Name(Name::builtin(NameKind::Int)),
            Type::Name(Name::builtin(NameKind::Int)),
        ),
    );
}

#[test]
fn user_types_feed_constructor_signatures() {
    let mut names = NameGen::new();
    let option = names.fresh("Option", l());
    let some = names.fresh("Some", l());
    let none = names.fresh("None", l());
    let a = names.fresh("a", l());
    let wrap = names.fresh("wrap", l());
    let x = names.fresh("x", l());

    let option_decl = Located::new(
        DeclKind::Type {
            name: option.clone(),
            vars: vec![a.clone()],
            constructors: vec![
                Constructor {
                    name: some.clone(),
                    args: vec![Type::Var(a.clone())],
                },
                Constructor {
                    name: none.clone(),
                    args: Vec::new(),
                },
            ],
        },
        l(),
    );
    let wrap_decl = fn_decl(&wrap, vec![pvar(&x)], app(var(&some), var(&x)));

    let (env, diags) = run(vec![wrap_decl, option_decl], &mut names);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");

    let b = names.fresh("b", l());
    let expected_some = Type::forall(
        b.clone(),
        Type::function(
            Type::Var(b.clone()),
            Type::app(Type::Name(option.clone()), Type::Var(b.clone())),
        ),
    );
    assert_alpha_eq(env.get(&some).unwrap(), &expected_some);
    assert_alpha_eq(env.get(&wrap).unwrap(), &expected_some);
    assert_alpha_eq(
        env.get(&none).unwrap(),
        &Type::forall(b.clone(), Type::app(Type::Name(option), Type::Var(b))),
    );
}

#[test]
fn operator_priorities_order_as_declared() {
    let mut names = NameGen::new();
    let plus = names.fresh("+", l());
    let star = names.fresh("*", l());

    // infix left (+) above application; infix left (*) above (+)
    let decls = vec![
        Located::new(
            DeclKind::Fixity {
                fixity: Fixity::Left,
                op: plus.clone(),
                relations: vec![FixityRelation::Above(None)],
            },
            l(),
        ),
        Located::new(
            DeclKind::Fixity {
                fixity: Fixity::Left,
                op: star.clone(),
                relations: vec![FixityRelation::Above(Some(plus.clone()))],
            },
            l(),
        ),
    ];

    let mut name_gen = names;
    let (mut output, _, diags) = check_module(decls, Builtins::default(), &mut name_gen);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");

    // `1 + 2 * 3` must resolve as `1 + (2 * 3)`: (*) outranks (+), which in
    // turn outranks plain application.
    let order = output.operator_priorities.ordered();
    let pos = |op: &Op| order.iter().position(|class| class.contains(op)).unwrap();
    assert!(pos(&None) < pos(&Some(plus.clone())));
    assert!(pos(&Some(plus)) < pos(&Some(star)));
    assert_eq!(output.fixity_map.len(), 2);
}

#[test]
fn fixity_self_reference_is_fatal_but_isolated() {
    let mut names = NameGen::new();
    let plus = names.fresh("+", l());
    let n = names.fresh("n", l());

    let decls = vec![
        Located::new(
            DeclKind::Fixity {
                fixity: Fixity::Left,
                op: plus.clone(),
                relations: vec![FixityRelation::Above(Some(plus.clone()))],
            },
            l(),
        ),
        val_decl(&n, e(ExprKind::IntLiteral(1))),
    ];

    let (env, diags) = run(decls, &mut names);
    assert!(
        diags
            .iter()
            .any(|d| d.category == Category::OperatorSelfReference
                && d.severity == Severity::Error)
    );
    // The value binding is unaffected.
    assert!(env.contains_key(&n));
}

#[test]
fn dangling_signature_warns_and_checking_continues() {
    let mut names = NameGen::new();
    let ghost = names.fresh("ghost", l());
    let n = names.fresh("n", l());

    let decls = vec![
        Located::new(
            DeclKind::Signature {
                name: ghost.clone(),
                ty: Type::Name(Name::builtin(NameKind::Int)),
            },
            l(),
        ),
        val_decl(&n, e(ExprKind::IntLiteral(2))),
    ];

    let (env, diags) = run(decls, &mut names);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].category, Category::DanglingSignature);
    assert_eq!(diags[0].severity, Severity::Warning);
    assert!(env.contains_key(&n));
}

#[test]
fn a_failing_group_does_not_hide_later_groups() {
    let mut names = NameGen::new();
    let omega = names.fresh("omega", l());
    let fine = names.fresh("fine", l());
    let x = names.fresh("x", l());

    let decls = vec![
        // \x -> x x: fatally self-referential.
        fn_decl(&omega, vec![pvar(&x)], app(var(&x), var(&x))),
        val_decl(&fine, e(ExprKind::TextLiteral("still here".into()))),
    ];

    let (env, diags) = run(decls, &mut names);
    assert!(
        diags
            .iter()
            .any(|d| d.category == Category::SelfReferentialType)
    );
    assert!(!env.contains_key(&omega));
    assert_alpha_eq(
        env.get(&fine).unwrap(),
        &Type::Name(Name::builtin(NameKind::Text)),
    );
}

#[test]
fn exports_contain_no_inference_state() {
    let mut names = NameGen::new();
    let pair = names.fresh("pair", l());
    let x = names.fresh("x", l());
    let y = names.fresh("y", l());

    let body = e(ExprKind::Record(vec![
        (Label::new("fst"), var(&x)),
        (Label::new("snd"), var(&y)),
    ]));
    let decls = vec![fn_decl(&pair, vec![pvar(&x), pvar(&y)], body)];

    let (env, diags) = run(decls, &mut names);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let ty = env.get(&pair).unwrap();
    assert!(!ty.mentions_uni_var(), "export mentions a univar: {ty}");
    assert!(!ty.mentions_skolem(), "export mentions a skolem: {ty}");

    let a = names.fresh("a", l());
    let b = names.fresh("b", l());
    let expected = Type::forall(
        a.clone(),
        Type::forall(
            b.clone(),
            Type::function(
                Type::Var(a.clone()),
                Type::function(
                    Type::Var(b.clone()),
                    Type::Record(Row::closed([
                        (Label::new("fst"), Type::Var(a)),
                        (Label::new("snd"), Type::Var(b)),
                    ])),
                ),
            ),
        ),
    );
    assert_alpha_eq(ty, &expected);
}
