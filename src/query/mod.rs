//! Query language: parsing, parameter binding, AST caching, and planning
//! into iterator trees.

pub mod ast;
pub mod cache;
pub mod params;
pub mod parser;
pub mod planner;

pub use ast::Node;
pub use params::{resolve_params, Params};
pub use parser::parse_query;
pub use planner::{Plan, PlanOptions, Planner};
