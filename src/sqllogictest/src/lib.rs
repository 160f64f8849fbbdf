// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A runner for sqllogictest, the SQL conformance corpus format.
//!
//! <https://www.sqlite.org/sqllogictest/doc/trunk/about.wiki>
//!
//! Test files are parsed into [`ast::Record`]s and executed in order
//! against a pluggable [`harness::Harness`]; each statement or query yields
//! exactly one verdict line, which [`resultlog`] can reparse. The runner
//! can also rewrite a file's expected results from observed output,
//! producing a `.generated` sibling for regression baselining.

pub mod ast;
pub mod harness;
pub mod parser;
pub mod postgres;
pub mod resultlog;
pub mod runner;
pub mod util;
