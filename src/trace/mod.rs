//! Parsing recorded trace sessions into [`Plan`](crate::model::Plan)s.

pub mod grammar;
pub mod parse;
pub mod pop_as_plan;

pub use grammar::Grammar;
pub use parse::{normalize_newlines, parse_session};
pub use pop_as_plan::{connector_name, convert_pop_to_plan};
