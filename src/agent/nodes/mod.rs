//! One module per workflow graph node. Each `run` takes the shared
//! [`GraphContext`] and mutates the [`AgentState`] bag in place.

pub mod chat;
pub mod mutation_understand;
pub mod respond;
pub mod sql_build;
pub mod sql_execute;
pub mod sql_validate;
