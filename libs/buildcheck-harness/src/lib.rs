//! Build verification harness: drive a project generator and a native build
//! tool, run what they produce, and compare observed behaviour to fixtures.

pub mod backend;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod harness;
pub mod suite;
pub mod workspace;


pub use buildcheck_common::{config, error, types, HarnessError};
pub use engine::{CommandRunner, CommandSpec, ProcessEngine};
pub use harness::Harness;
