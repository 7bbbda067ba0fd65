//! Error reporting and diagnostics for Sable.
//!
//! This crate provides structured diagnostics with source location tracking.
//! Key invariant: no unification variables or skolems in user-facing output;
//! the checker normalises types before they reach a message.
//!
//! Diagnostics are created by the resolver and the checker and rendered here
//! for display.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// One type is not usable where another is expected.
    NotASubtype,
    /// Two branch types have no common supertype.
    CannotUnify,
    /// A non-function type was applied to an argument.
    NotAFunction,
    /// A type variable occurs outside any quantifier binding it.
    UnboundTypeVariable,
    /// A unification variable occurs in its own solution through a
    /// constructor.
    SelfReferentialType,
    /// A constructor pattern or match arm has the wrong number of arguments.
    ArityMismatch,
    /// A required record field is missing.
    MissingField,
    /// A variant tag is not accepted by the expected variant type.
    MissingVariant,
    /// A unification variable survived normalisation.
    DanglingUniVar,
    /// A skolem survived normalisation.
    SkolemEscape,
    /// A fixity declaration relates an operator to itself.
    OperatorSelfReference,
    /// Two operator classes are related in both directions.
    PrecedenceCycle,
    /// A signature has no matching binding.
    DanglingSignature,
    /// An internal invariant was violated; this is a checker bug.
    Internal,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::NotASubtype,
        Category::CannotUnify,
        Category::NotAFunction,
        Category::UnboundTypeVariable,
        Category::SelfReferentialType,
        Category::ArityMismatch,
        Category::MissingField,
        Category::MissingVariant,
        Category::DanglingUniVar,
        Category::SkolemEscape,
        Category::OperatorSelfReference,
        Category::PrecedenceCycle,
        Category::DanglingSignature,
        Category::Internal,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::NotASubtype => "not_a_subtype",
            Category::CannotUnify => "cannot_unify",
            Category::NotAFunction => "not_a_function",
            Category::UnboundTypeVariable => "unbound_type_variable",
            Category::SelfReferentialType => "self_referential_type",
            Category::ArityMismatch => "arity_mismatch",
            Category::MissingField => "missing_field",
            Category::MissingVariant => "missing_variant",
            Category::DanglingUniVar => "dangling_uni_var",
            Category::SkolemEscape => "skolem_escape",
            Category::OperatorSelfReference => "operator_self_reference",
            Category::PrecedenceCycle => "precedence_cycle",
            Category::DanglingSignature => "dangling_signature",
            Category::Internal => "internal",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::NotASubtype => "E0001",
            Category::CannotUnify => "E0002",
            Category::NotAFunction => "E0003",
            Category::UnboundTypeVariable => "E0004",
            Category::SelfReferentialType => "E0005",
            Category::ArityMismatch => "E0006",
            Category::MissingField => "E0007",
            Category::MissingVariant => "E0008",
            Category::DanglingUniVar => "E0009",
            Category::SkolemEscape => "E0010",
            Category::OperatorSelfReference => "E0011",
            Category::PrecedenceCycle => "W0001",
            Category::DanglingSignature => "W0002",
            Category::Internal => "E0999",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::NotASubtype => "A value's type is not usable at the expected type.",
            Category::CannotUnify => "Branches of a conditional have incompatible types.",
            Category::NotAFunction => "A non-function value was applied to an argument.",
            Category::UnboundTypeVariable => "A type variable is not bound by any quantifier.",
            Category::SelfReferentialType => "A type would have to contain itself.",
            Category::ArityMismatch => {
                "A constructor pattern or match arm has the wrong number of arguments."
            }
            Category::MissingField => "A required record field is missing.",
            Category::MissingVariant => "A variant tag is not part of the expected variant type.",
            Category::DanglingUniVar => "Inference finished with an unsolved type.",
            Category::SkolemEscape => "A rigid type escaped the scope that introduced it.",
            Category::OperatorSelfReference => {
                "A fixity declaration relates an operator to itself."
            }
            Category::PrecedenceCycle => "Operator priorities form a cycle; the edge was dropped.",
            Category::DanglingSignature => "A type signature has no matching binding.",
            Category::Internal => "The checker violated one of its own invariants.",
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of sable-ast's Loc)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `sable-ast` locations to this
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0001).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Warning,
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Diagnostic sink
// ---------------------------------------------------------------------------

/// Collects diagnostics in emission order.
///
/// The resolver and the checker driver report through the two entry points:
/// `non_fatal` for warnings that leave the pipeline running, `fatal` for
/// errors that abort the current unit of work.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reports: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a warning; processing continues.
    pub fn non_fatal(&mut self, report: Diagnostic) {
        debug_assert_eq!(report.severity, Severity::Warning);
        self.reports.push(report);
    }

    /// Report one or more errors from an aborted unit of work.
    pub fn fatal(&mut self, reports: Vec<Diagnostic>) {
        debug_assert!(reports.iter().all(|r| r.severity == Severity::Error));
        self.reports.extend(reports);
    }

    pub fn has_errors(&self) -> bool {
        self.reports.iter().any(|r| r.severity == Severity::Error)
    }

    pub fn reports(&self) -> &[Diagnostic] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<Diagnostic> {
        self.reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_builder() {
        let loc = SourceLocation {
            file_id: 0,
            start: 10,
            end: 20,
        };
        let diag = Diagnostic::error(Category::MissingField, "record does not contain field b")
            .at(loc)
            .with_help("add the missing field or widen the expected row");

        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("E0007"));
        assert_eq!(diag.location, Some(loc));
        assert!(diag.help.unwrap().contains("missing field"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::NotAFunction, "Int is not a function type");
        let s = format!("{diag}");
        assert!(s.starts_with("error[E0003]: Int is not a function type"));
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }

    #[test]
    fn diagnostic_error_wraps_and_displays_the_first_report() {
        let err = DiagnosticError::multiple(vec![
            Diagnostic::error(Category::NotASubtype, "`Int` is not a subtype of `Text`"),
            Diagnostic::error(Category::DanglingUniVar, "type was not fully inferred"),
        ]);
        assert_eq!(err.diagnostics().len(), 2);
        assert!(err.to_string().starts_with("error[E0001]"));

        let single = DiagnosticError::single(Diagnostic::error(
            Category::SkolemEscape,
            "rigid type escaped",
        ));
        assert_eq!(single.diagnostics().len(), 1);
    }

    #[test]
    fn sink_orders_and_classifies_reports() {
        let mut sink = Diagnostics::new();
        sink.non_fatal(Diagnostic::warning(
            Category::DanglingSignature,
            "signature for f has no binding",
        ));
        assert!(!sink.has_errors());

        sink.fatal(vec![Diagnostic::error(
            Category::SelfReferentialType,
            "self-referential type",
        )]);
        assert!(sink.has_errors());
        assert_eq!(sink.reports().len(), 2);
        assert_eq!(sink.reports()[0].category, Category::DanglingSignature);
    }
}
