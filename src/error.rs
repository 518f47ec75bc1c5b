//! Rich diagnostic error types for the khnum engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Configuration problems
//! are fatal and surface before a run starts; everything recoverable at run time
//! is a logged warning, not an error (see the enforcer's warning report).

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the khnum engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum KhnumError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sim(#[from] SimError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("entity not found: {entity_id}")]
    #[diagnostic(
        code(khnum::graph::entity_not_found),
        help(
            "The entity id does not exist in the graph store. \
             It may never have been created, or the id belongs to a different run."
        )
    )]
    EntityNotFound { entity_id: u64 },

    #[error("relationship not found: {relationship_id}")]
    #[diagnostic(
        code(khnum::graph::relationship_not_found),
        help("The relationship id does not exist in the graph store.")
    )]
    RelationshipNotFound { relationship_id: u64 },

    #[error("relationship kind '{kind}' forbids ({src_kind} -> {dst_kind})")]
    #[diagnostic(
        code(khnum::graph::constraint_violation),
        help(
            "The relationship-kind registry declares which entity kinds may appear \
             as source and destination. Fix the rule document that creates this \
             relationship, or widen the registry entry in the schema."
        )
    )]
    ConstraintViolation {
        kind: String,
        src_kind: String,
        dst_kind: String,
    },

    #[error("status '{status}' is not registered for entity kind '{kind}'")]
    #[diagnostic(
        code(khnum::graph::invalid_status),
        help("Every status an entity can take must be listed in its kind's schema entry.")
    )]
    InvalidStatus { kind: String, status: String },

    #[error("tags '{a}' and '{b}' are declared mutually exclusive")]
    #[diagnostic(
        code(khnum::graph::tag_conflict),
        help(
            "The tag registry declares these tags as conflicting. Remove one of them \
             from the mutation, or drop the conflict declaration from the schema."
        )
    )]
    TagConflict { a: String, b: String },

    #[error("entity id space exhausted")]
    #[diagnostic(
        code(khnum::graph::ids_exhausted),
        help(
            "The id allocator ran out of ids. This requires 2^64 allocations and \
             should never happen in practice — check for an allocation loop."
        )
    )]
    IdsExhausted,
}

// ---------------------------------------------------------------------------
// Schema / configuration errors (fatal, pre-run)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("unknown entity kind '{kind}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_entity_kind),
        help("Declare the kind in the schema's entity-kind list, or fix the reference.")
    )]
    UnknownEntityKind { kind: String, referrer: String },

    #[error("unknown subtype '{subtype}' of kind '{kind}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_subtype),
        help(
            "Subtypes are scoped to their entity kind. Add the subtype to the \
             kind's schema entry."
        )
    )]
    UnknownSubtype {
        kind: String,
        subtype: String,
        referrer: String,
    },

    #[error("unknown status '{status}' for kind '{kind}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_status),
        help(
            "Statuses are scoped to their entity kind. Add the status to the \
             kind's schema entry."
        )
    )]
    UnknownStatus {
        kind: String,
        status: String,
        referrer: String,
    },

    #[error("unknown relationship kind '{kind}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_relationship_kind),
        help("Declare the relationship kind (with its src/dst constraints) in the schema.")
    )]
    UnknownRelationshipKind { kind: String, referrer: String },

    #[error("unknown pressure '{pressure}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_pressure),
        help("Every pressure a rule reads or writes must appear in the pressure list.")
    )]
    UnknownPressure { pressure: String, referrer: String },

    #[error("unknown culture '{culture}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_culture),
        help("Declare the culture in the schema's culture list.")
    )]
    UnknownCulture { culture: String, referrer: String },

    #[error("unknown tag '{tag}' referenced by {referrer}")]
    #[diagnostic(
        code(khnum::schema::unknown_tag),
        help(
            "Every tag a rule assigns must be registered in the tag registry so the \
             taxonomy analyzer can track its usage bounds and conflicts."
        )
    )]
    UnknownTag { tag: String, referrer: String },

    #[error("unbound variable '${var}' in rule '{rule}'")]
    #[diagnostic(
        code(khnum::schema::unbound_variable),
        help(
            "Variable references must name a selection binding declared earlier in \
             the same rule document (e.g. `$actor` requires an `actor` binding)."
        )
    )]
    UnboundVariable { var: String, rule: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(khnum::schema::invalid_config),
        help("Check the configuration documents. {message}")
    )]
    InvalidConfig { message: String },

    #[error("failed to parse configuration document: {message}")]
    #[diagnostic(
        code(khnum::schema::parse),
        help(
            "The document is not valid JSON for its expected shape. Unknown \
             `type`/`strategy` discriminants are rejected here, before the run starts."
        )
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Rule evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("variable '${var}' is not bound in this firing")]
    #[diagnostic(
        code(khnum::rule::unbound_variable),
        help(
            "The symbol table is populated per firing from the rule's selection \
             bindings. A reference to an unbound variable here means validation \
             was skipped — run the pre-run validation pass."
        )
    )]
    UnboundVariable { var: String },

    #[error("selection '{binding}' produced no candidates")]
    #[diagnostic(
        code(khnum::rule::empty_selection),
        help(
            "No entity satisfied the selection strategy and hard filters. \
             At run time this aborts the firing silently; it is surfaced as an \
             error only where callers ask for strict resolution."
        )
    )]
    EmptySelection { binding: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Simulation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SimError {
    #[error("simulation already ran to a terminal state")]
    #[diagnostic(
        code(khnum::sim::already_terminal),
        help("Create a fresh `Simulation` for another run; runs are single-shot.")
    )]
    AlreadyTerminal,

    #[error("no eras configured")]
    #[diagnostic(
        code(khnum::sim::no_eras),
        help("At least one era is required to drive the tick loop.")
    )]
    NoEras,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Convenience alias for functions returning khnum results.
pub type KhnumResult<T> = std::result::Result<T, KhnumError>;
