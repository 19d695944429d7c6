//! Query descriptors, predicates and the SQL composition pipeline.

pub mod compose;
pub mod descriptor;
pub mod filter;
