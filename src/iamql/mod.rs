//! IAMQL: a small query language over the relational model.
//!
//! ```text
//! q1: { r resource (type == "project"); ro role; m user; b binding; }
//!     { b.grants(r, ro, m); }
//!     { m, ro }
//! ```
//!
//! Text is scanned and parsed into a [`ast::QuerySet`], compiled into one
//! [`plan::QueryPlan`] per query and executed against a [`DataModel`].
pub mod ast;
pub mod compiler;
pub mod parser;
pub mod plan;
pub mod relations;
pub mod scanner;

use crate::error::IamqlError;
use crate::model::DataModel;

pub use compiler::compile;
pub use parser::parse_iamql;
pub use plan::{QueryPlan, QueryResult};

/// Parses and compiles IAMQL text.
pub fn compile_iamql(text: &str) -> Result<Vec<QueryPlan>, IamqlError> {
    compile(&parse_iamql(text)?)
}

/// Parses, compiles and runs every query of `text` against `data`.
pub fn run_iamql(text: &str, data: &DataModel) -> Result<Vec<QueryResult>, IamqlError> {
    Ok(compile_iamql(text)?
        .iter()
        .map(|plan| plan.execute(data))
        .collect())
}
