#![forbid(unsafe_code)]

//! Dispatch Contract Validator (dcv): checks that a compiler lowers dispatch
//! constructs the way each test's annotations say it should.
//!
//! Each test source carries a contract in `// @key: value` comments. The
//! orchestrator compiles the source for every platform and optimization level
//! in the matrix and then checks the result:
//! 1. **IR structure**: expected dispatch strategy plus validation rules
//! 2. **Golden comparison**: semantic diff against an approved reference IR
//! 3. **Performance**: expectations, baseline regression and trend analysis
//!
//! # Library usage
//!
//! ```rust,no_run
//! use dispatch_contracts::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use dispatch_contracts::contract::parser::parse_contract;
//! use dispatch_contracts::ir::diff::compare;
//! ```

pub mod prelude;

pub mod contract;
pub mod core;
pub mod ir;
pub mod logger;
pub mod orchestrator;
pub mod perf;
pub mod registry;
