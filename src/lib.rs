//! Rebuild, transform and partially evaluate recorded execution plans.
//!
//! A trace archive (`log`) holds sessions of plan-construction statements;
//! `trace` parses one into a [`model::Plan`], `model` edits it in place,
//! `render` writes it back as runnable text or as a `dot` graph, and
//! `replan` splits it into a precomputed part and a remaining plan.

pub mod config;
pub mod error;
pub mod log;
pub mod model;
pub mod render;
pub mod replan;
pub mod runtime;
pub mod trace;

pub type Result<T> = anyhow::Result<T>;
