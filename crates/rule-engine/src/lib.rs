//! # rule-engine
//!
//! Path-based authorization for hierarchical data stores. A rule tree
//! mirrors the data layout; each node may carry `.read` / `.write`
//! directives (booleans or expressions) and `$name` keys that match any
//! segment and bind it for use in expressions. The [`PermissionGate`]
//! walks a requested path, evaluates the governing directive and fails
//! closed.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rule_engine::{loader, JsonData, Permission, PermissionGate};
//!
//! let security = loader::load_security("rules.yaml", &Default::default()).unwrap();
//! let gate = PermissionGate::new(security);
//! let store = JsonData::new(serde_json::json!({}));
//! let path = ["users", "u1"];
//! let outcome = gate.checkpoint(Permission::Read, &path, &store.at(&path), None, None);
//! println!("{:?}", outcome);
//! ```

mod context;
mod data;
mod decision;
mod evaluator;
pub mod expression;
mod gate;
pub mod loader;
pub mod records;
pub mod resolver;
mod schema;
mod token;

// Re-export primary public API at crate root.
pub use context::{
    resolve_identity, DataAccessor, EvaluationContext, RequestContext, DEFAULT_TOKEN_PARAM,
};
pub use data::{DataAt, JsonData, KEY_COLUMN};
pub use decision::{Basis, Decision, PermissionDenied};
pub use evaluator::ExpressionEvaluator;
pub use expression::{ExprError, Expression};
pub use gate::{GateOptions, PermissionGate};
pub use loader::LoadOptions;
pub use resolver::{resolve, split_path, Bindings, Resolution};
pub use schema::{
    ConfigIssue, Directive, IssueKind, Permission, RuleNode, RuleTree, SchemaError,
    SecurityConfig, READ_KEY, WILDCARD_SIGIL, WRITE_KEY,
};
pub use token::{ClaimsTokenDecoder, TokenDecoder, TokenError};
