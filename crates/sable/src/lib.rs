//! The Sable front-end pipeline.
//!
//! Wires the stages together: name-resolved declarations go through the
//! dependency resolver, then each strongly-connected group is type checked
//! in order and its exports normalised. Lexing, parsing, fixity rewriting,
//! and evaluation are collaborators that live elsewhere; this crate owns
//! the hand-off between resolution and checking.

use std::collections::BTreeMap;

use sable_ast::{Decl, Loc, Name, NameGen, Type};
use sable_diag::{Diagnostic, Diagnostics};
use sable_infer::{Builtins, Checker};
use sable_resolve::{Output, resolve};

/// Run the resolver and the checker over a module.
///
/// Returns the resolver output (fixities, priorities, ordering), the typed
/// environment, and every diagnostic in emission order. A fatal error in
/// one declaration group aborts that group only; checking continues with
/// the next group so a single mistake does not hide downstream problems.
pub fn check_module(
    decls: Vec<Decl>,
    builtins: Builtins,
    names: &mut NameGen,
) -> (Output, BTreeMap<Name, Type>, Vec<Diagnostic>) {
    let mut diags = Diagnostics::new();
    let output = resolve(decls, &mut diags);

    let mut checker = Checker::new(builtins, names);
    for (name, ty) in &output.signatures {
        checker.install_signature(name.clone(), ty.clone());
    }

    let mut env = BTreeMap::new();
    for group in &output.ordered_declarations {
        match checker.infer_decls(group) {
            Ok(bound) => env.extend(bound),
            Err(error) => {
                let loc = group.first().map_or(Loc::synthetic(), |decl| decl.loc);
                diags.fatal(vec![error.into_diagnostic(loc)]);
            }
        }
    }

    (output, env, diags.into_reports())
}

#[cfg(test)]
mod pipeline_tests;
