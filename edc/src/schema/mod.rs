//! Schema Model
//!
//! Declarative form definitions: field kinds and constraints, the safe
//! expression language used by `condition` and `validity_expression`, and
//! loaders for field-definition tables.

pub mod expr;
pub mod loader;
pub mod temporal;
pub mod types;

pub use expr::{Environment, ExprError, Expression, Value};
pub use loader::{load_csv, load_json, load_path, load_yaml};
pub use types::{Bound, BoundValue, FieldKind, FieldSpec, FormDefinition, FormSchema};
