//! Declaration-level dependency resolution for Sable.
//!
//! This crate takes the name-resolved declaration list and produces
//! everything the later pipeline stages need: the fixity table and operator
//! priority poset for the fixity resolver, collected type signatures, and
//! the declarations grouped into mutually-recursive components in dependency
//! order for the type checker.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use sable_ast::{
    Decl, DeclKind, Fixity, Loc, Name, Op, Type, binding_referenced_names, type_names,
};
use sable_diag::{Category, Diagnostic, Diagnostics, SourceLocation};

pub mod poset;

pub use poset::{ClassId, Poset, PosetCycle};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A synthetic key identifying one post-resolution declaration. A
/// declaration may define several names (a pattern binding, or a type with
/// its constructors); all of them share one `DeclId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

/// Everything the dependency resolver learned about a module.
#[derive(Debug)]
pub struct Output {
    /// Declared associativity per operator.
    pub fixity_map: BTreeMap<Op, Fixity>,
    /// Relative operator priorities; `None` is function application.
    pub operator_priorities: Poset<Op>,
    /// Strongly connected declaration groups, dependencies first.
    pub ordered_declarations: Vec<Vec<Decl>>,
    /// Every graph declaration by its id.
    pub declarations: BTreeMap<DeclId, Decl>,
    /// The declaration that defines each name.
    pub name_origins: BTreeMap<Name, DeclId>,
    /// User-supplied type signatures.
    pub signatures: BTreeMap<Name, Type>,
}

fn source_location(loc: Loc) -> SourceLocation {
    SourceLocation {
        file_id: loc.file.0,
        start: loc.start,
        end: loc.end,
    }
}

fn op_text(op: &Op) -> String {
    match op {
        Some(name) => name.to_string(),
        None => "application".to_string(),
    }
}

fn class_text(class: &[Op]) -> String {
    class
        .iter()
        .map(op_text)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Group declarations into dependency-ordered SCCs and extract the fixity
/// and signature tables.
pub fn resolve(decls: Vec<Decl>, diags: &mut Diagnostics) -> Output {
    let mut fixity_map = BTreeMap::new();
    let mut priorities: Poset<Op> = Poset::new();
    let mut signatures = BTreeMap::new();
    let mut signature_locs: Vec<(Name, Loc)> = Vec::new();
    let mut name_origins: BTreeMap<Name, DeclId> = BTreeMap::new();
    let mut value_names: BTreeSet<Name> = BTreeSet::new();

    // Declarations that participate in the dependency graph, in source
    // order; the index into this list is the DeclId.
    let mut nodes: Vec<Decl> = Vec::new();

    for decl in decls {
        match &decl.node {
            DeclKind::Value { binding, .. } => {
                let id = DeclId(nodes.len() as u32);
                for name in binding.defined_names() {
                    value_names.insert(name.clone());
                    name_origins.insert(name, id);
                }
                nodes.push(decl);
            }
            DeclKind::Type {
                name, constructors, ..
            } => {
                let id = DeclId(nodes.len() as u32);
                name_origins.insert(name.clone(), id);
                for constructor in constructors {
                    name_origins.insert(constructor.name.clone(), id);
                }
                nodes.push(decl);
            }
            DeclKind::Signature { name, ty } => {
                signature_locs.push((name.clone(), decl.loc));
                signatures.insert(name.clone(), ty.clone());
            }
            DeclKind::Fixity {
                fixity,
                op,
                relations,
            } => {
                resolve_fixity(
                    *fixity,
                    op,
                    relations,
                    decl.loc,
                    &mut fixity_map,
                    &mut priorities,
                    diags,
                );
            }
        }
    }

    // A signature whose name is never bound is suspicious but not fatal.
    for (name, loc) in signature_locs {
        if !value_names.contains(&name) {
            diags.non_fatal(
                Diagnostic::warning(
                    Category::DanglingSignature,
                    format!("signature for `{name}` has no matching binding"),
                )
                .at(source_location(loc)),
            );
        }
    }

    // Second pass: a reference edge for every referenced name that maps back
    // to a declaration. Names bound locally are simply absent from
    // `name_origins`, so they drop out here.
    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    for (index, decl) in nodes.iter().enumerate() {
        let mut refs = BTreeSet::new();
        decl_referenced_names(decl, &mut refs);
        for name in refs {
            if let Some(origin) = name_origins.get(&name) {
                edges[index].insert(origin.0 as usize);
            }
        }
    }

    let sccs = strongly_connected_components(nodes.len(), &edges);
    let ordered_declarations = sccs
        .into_iter()
        .map(|mut component| {
            component.sort_unstable();
            component.into_iter().map(|i| nodes[i].clone()).collect()
        })
        .collect();

    let declarations = nodes
        .into_iter()
        .enumerate()
        .map(|(i, decl)| (DeclId(i as u32), decl))
        .collect();

    Output {
        fixity_map,
        operator_priorities: priorities,
        ordered_declarations,
        declarations,
        name_origins,
        signatures,
    }
}

fn resolve_fixity(
    fixity: Fixity,
    op: &Name,
    relations: &[sable_ast::FixityRelation],
    loc: Loc,
    fixity_map: &mut BTreeMap<Op, Fixity>,
    priorities: &mut Poset<Op>,
    diags: &mut Diagnostics,
) {
    use sable_ast::FixityRelation;

    // Relating an operator to itself is a fatal resolver error; the whole
    // declaration is discarded.
    if relations
        .iter()
        .any(|relation| relation.target().as_ref() == Some(op))
    {
        diags.fatal(vec![
            Diagnostic::error(
                Category::OperatorSelfReference,
                format!("fixity declaration relates `{op}` to itself"),
            )
            .at(source_location(loc)),
        ]);
        return;
    }

    let this: Op = Some(op.clone());
    fixity_map.insert(this.clone(), fixity);

    let mut relates_application = false;
    for relation in relations {
        if relation.target().is_none() {
            relates_application = true;
        }
        let (target, ord) = match relation {
            FixityRelation::Above(target) => (target, Ordering::Greater),
            FixityRelation::Below(target) => (target, Ordering::Less),
            FixityRelation::Equals(target) => (target, Ordering::Equal),
        };
        report_cycle(priorities.add_relation(&this, target, ord), loc, diags);
    }

    // Operators sit below function application unless the user says
    // otherwise.
    if !relates_application {
        report_cycle(priorities.add_relation(&this, &None, Ordering::Less), loc, diags);
    }
}

fn report_cycle(result: Result<(), PosetCycle<Op>>, loc: Loc, diags: &mut Diagnostics) {
    if let Err(cycle) = result {
        diags.non_fatal(
            Diagnostic::warning(
                Category::PrecedenceCycle,
                format!(
                    "priority relation between {{{}}} and {{{}}} contradicts the existing order; ignored",
                    class_text(&cycle.left),
                    class_text(&cycle.right),
                ),
            )
            .at(source_location(loc)),
        );
    }
}

/// Every name a declaration refers to, including through local declarations
/// and constructor argument types.
fn decl_referenced_names(decl: &Decl, out: &mut BTreeSet<Name>) {
    match &decl.node {
        DeclKind::Value { binding, locals } => {
            binding_referenced_names(binding, out);
            for local in locals {
                decl_referenced_names(local, out);
            }
        }
        DeclKind::Type { constructors, .. } => {
            for constructor in constructors {
                for arg in &constructor.args {
                    type_names(arg, out);
                }
            }
        }
        DeclKind::Signature { ty, .. } => type_names(ty, out),
        DeclKind::Fixity { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Strongly connected components
// ---------------------------------------------------------------------------

/// Tarjan's algorithm. Components come out with dependencies first: a
/// component is emitted only once everything it references has been.
fn strongly_connected_components(
    node_count: usize,
    edges: &[BTreeSet<usize>],
) -> Vec<Vec<usize>> {
    struct State<'a> {
        edges: &'a [BTreeSet<usize>],
        index: Vec<Option<u32>>,
        lowlink: Vec<u32>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: u32,
        components: Vec<Vec<usize>>,
    }

    fn connect(v: usize, st: &mut State<'_>) {
        st.index[v] = Some(st.next_index);
        st.lowlink[v] = st.next_index;
        st.next_index += 1;
        st.stack.push(v);
        st.on_stack[v] = true;

        for &w in st.edges[v].iter() {
            match st.index[w] {
                None => {
                    connect(w, st);
                    st.lowlink[v] = st.lowlink[v].min(st.lowlink[w]);
                }
                Some(w_index) if st.on_stack[w] => {
                    st.lowlink[v] = st.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if Some(st.lowlink[v]) == st.index[v] {
            let mut component = Vec::new();
            loop {
                let w = st.stack.pop().expect("stack holds the component");
                st.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            st.components.push(component);
        }
    }

    let mut st = State {
        edges,
        index: vec![None; node_count],
        lowlink: vec![0; node_count],
        on_stack: vec![false; node_count],
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for v in 0..node_count {
        if st.index[v].is_none() {
            connect(v, &mut st);
        }
    }
    st.components
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::{
        Binding, Constructor, ExprKind, FileId, FixityRelation, Label, Located, NameGen, Pattern,
        PatternKind,
    };

    fn loc() -> Loc {
        Loc::new(FileId(0), 0, 1)
    }

    fn name_expr(name: &Name) -> sable_ast::Expr {
        Located::new(ExprKind::Name(name.clone()), loc())
    }

    fn var_pattern(name: &Name) -> Pattern {
        Located::new(PatternKind::Var(name.clone()), loc())
    }

    fn value_decl(name: &Name, body: sable_ast::Expr) -> Decl {
        Located::new(
            DeclKind::Value {
                binding: Binding::Value(var_pattern(name), body),
                locals: Vec::new(),
            },
            loc(),
        )
    }

    fn binding_name(decl: &Decl) -> Name {
        match &decl.node {
            DeclKind::Value { binding, .. } => binding.defined_names()[0].clone(),
            DeclKind::Type { name, .. } => name.clone(),
            _ => panic!("not a graph declaration"),
        }
    }

    #[test]
    fn references_order_declarations_dependencies_first() {
        let mut names = NameGen::new();
        let f = names.fresh("f", loc());
        let g = names.fresh("g", loc());
        let h = names.fresh("h", loc());

        // f = g, g = h, h = 1: source order is deliberately reversed.
        let decls = vec![
            value_decl(&f, name_expr(&g)),
            value_decl(&g, name_expr(&h)),
            value_decl(&h, Located::new(ExprKind::IntLiteral(1), loc())),
        ];

        let mut diags = Diagnostics::new();
        let output = resolve(decls, &mut diags);
        assert!(!diags.has_errors());

        let order: Vec<Name> = output
            .ordered_declarations
            .iter()
            .map(|group| binding_name(&group[0]))
            .collect();
        assert_eq!(order, vec![h, g.clone(), f.clone()]);

        // Ids are dense and every name maps back to its declaration.
        assert_eq!(output.declarations.len(), 3);
        let g_id = output.name_origins.get(&g).copied().unwrap();
        assert_eq!(binding_name(output.declarations.get(&g_id).unwrap()), g);
        assert_ne!(output.name_origins.get(&f), Some(&g_id));
    }

    #[test]
    fn mutual_recursion_lands_in_one_group() {
        let mut names = NameGen::new();
        let even = names.fresh("even", loc());
        let odd = names.fresh("odd", loc());
        let base = names.fresh("base", loc());

        let decls = vec![
            value_decl(&base, Located::new(ExprKind::IntLiteral(0), loc())),
            value_decl(&even, name_expr(&odd)),
            value_decl(&odd, name_expr(&even)),
        ];

        let mut diags = Diagnostics::new();
        let output = resolve(decls, &mut diags);

        assert_eq!(output.ordered_declarations.len(), 2);
        assert_eq!(output.ordered_declarations[0].len(), 1);
        let group: BTreeSet<Name> = output.ordered_declarations[1]
            .iter()
            .map(binding_name)
            .collect();
        assert_eq!(group, BTreeSet::from([even, odd]));
    }

    #[test]
    fn edges_never_point_at_later_groups() {
        let mut names = NameGen::new();
        let a = names.fresh("a", loc());
        let b = names.fresh("b", loc());
        let c = names.fresh("c", loc());
        let d = names.fresh("d", loc());

        let decls = vec![
            value_decl(&a, name_expr(&b)),
            value_decl(&b, name_expr(&c)),
            value_decl(&c, name_expr(&a)),
            value_decl(&d, name_expr(&b)),
        ];

        let mut diags = Diagnostics::new();
        let output = resolve(decls, &mut diags);

        let group_of = |name: &Name| {
            output
                .ordered_declarations
                .iter()
                .position(|group| group.iter().any(|d| binding_name(d) == *name))
                .unwrap()
        };
        // a, b, c are one cycle; d references into it and must come later.
        assert_eq!(group_of(&a), group_of(&b));
        assert_eq!(group_of(&b), group_of(&c));
        assert!(group_of(&d) > group_of(&a));
    }

    #[test]
    fn type_declarations_join_the_graph_through_constructors() {
        let mut names = NameGen::new();
        let pair = names.fresh("Pair", loc());
        let mk_pair = names.fresh("MkPair", loc());
        let point = names.fresh("Point", loc());
        let mk_point = names.fresh("MkPoint", loc());

        // Point's constructor mentions Pair, so Pair resolves first.
        let pair_decl = Located::new(
            DeclKind::Type {
                name: pair.clone(),
                vars: Vec::new(),
                constructors: vec![Constructor {
                    name: mk_pair.clone(),
                    args: Vec::new(),
                }],
            },
            loc(),
        );
        let point_decl = Located::new(
            DeclKind::Type {
                name: point.clone(),
                vars: Vec::new(),
                constructors: vec![Constructor {
                    name: mk_point.clone(),
                    args: vec![Type::Name(pair.clone())],
                }],
            },
            loc(),
        );

        let mut diags = Diagnostics::new();
        let output = resolve(vec![point_decl, pair_decl], &mut diags);

        let order: Vec<Name> = output
            .ordered_declarations
            .iter()
            .map(|group| binding_name(&group[0]))
            .collect();
        assert_eq!(order, vec![pair.clone(), point]);
        assert_eq!(
            output.name_origins.get(&mk_pair),
            output.name_origins.get(&pair)
        );
    }

    #[test]
    fn dangling_signature_warns_without_error() {
        let mut names = NameGen::new();
        let f = names.fresh("f", loc());

        let sig = Located::new(
            DeclKind::Signature {
                name: f.clone(),
                ty: Type::Name(Name::builtin(sable_ast::NameKind::Int)),
            },
            loc(),
        );

        let mut diags = Diagnostics::new();
        let output = resolve(vec![sig], &mut diags);

        assert!(!diags.has_errors());
        assert_eq!(diags.reports().len(), 1);
        assert_eq!(diags.reports()[0].category, Category::DanglingSignature);
        assert!(output.signatures.contains_key(&f));
    }

    #[test]
    fn fixity_self_reference_is_fatal() {
        let mut names = NameGen::new();
        let plus = names.fresh("+", loc());

        let decl = Located::new(
            DeclKind::Fixity {
                fixity: Fixity::Left,
                op: plus.clone(),
                relations: vec![FixityRelation::Above(Some(plus.clone()))],
            },
            loc(),
        );

        let mut diags = Diagnostics::new();
        let output = resolve(vec![decl], &mut diags);

        assert!(diags.has_errors());
        assert_eq!(diags.reports()[0].category, Category::OperatorSelfReference);
        assert!(!output.fixity_map.contains_key(&Some(plus)));
    }

    #[test]
    fn operators_default_below_application() {
        let mut names = NameGen::new();
        let plus = names.fresh("+", loc());
        let star = names.fresh("*", loc());

        let decls = vec![
            Located::new(
                DeclKind::Fixity {
                    fixity: Fixity::Left,
                    op: plus.clone(),
                    relations: Vec::new(),
                },
                loc(),
            ),
            Located::new(
                DeclKind::Fixity {
                    fixity: Fixity::Left,
                    op: star.clone(),
                    relations: vec![FixityRelation::Above(Some(plus.clone()))],
                },
                loc(),
            ),
        ];

        let mut diags = Diagnostics::new();
        let mut output = resolve(decls, &mut diags);
        assert!(!diags.has_errors());
        assert_eq!(output.fixity_map.len(), 2);

        let order = output.operator_priorities.ordered();
        let pos = |op: &Op| order.iter().position(|c| c.contains(op)).unwrap();
        let plus_op: Op = Some(plus);
        let star_op: Op = Some(star);
        assert!(pos(&plus_op) < pos(&star_op));
        assert!(pos(&star_op) < pos(&None));
    }

    #[test]
    fn local_declarations_contribute_reference_edges() {
        let mut names = NameGen::new();
        let helper = names.fresh("helper", loc());
        let main = names.fresh("main", loc());
        let aux = names.fresh("aux", loc());

        // main = aux  where aux = helper
        let local = Located::new(
            DeclKind::Value {
                binding: Binding::Value(var_pattern(&aux), name_expr(&helper)),
                locals: Vec::new(),
            },
            loc(),
        );
        let main_decl = Located::new(
            DeclKind::Value {
                binding: Binding::Value(var_pattern(&main), name_expr(&aux)),
                locals: vec![local],
            },
            loc(),
        );
        let helper_decl = value_decl(
            &helper,
            Located::new(
                ExprKind::Record(vec![(
                    Label::new("unit"),
                    Located::new(ExprKind::Record(Vec::new()), loc()),
                )]),
                loc(),
            ),
        );

        let mut diags = Diagnostics::new();
        let output = resolve(vec![main_decl, helper_decl], &mut diags);

        let order: Vec<Name> = output
            .ordered_declarations
            .iter()
            .map(|group| binding_name(&group[0]))
            .collect();
        assert_eq!(order, vec![helper, main]);
        // Local binders never become top-level origins.
        assert!(!output.name_origins.contains_key(&aux));
    }
}
