// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The boundary between the runner and a concrete SQL engine.

use async_trait::async_trait;

/// The observed output of one query: per-column type letters in column
/// order, and a flat row-major list of stringified cell values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub schema: String,
    pub values: Vec<String>,
}

/// An adapter wrapping a SQL engine under test.
///
/// Adapters render cell values with shared conventions: booleans as
/// `1`/`0`, integers in base 10, reals in fixed point with exactly three
/// fractional digits, and NULL as the literal string `NULL`.
///
/// A harness may be invoked again after the runner abandons a timed-out
/// call, so implementations must not poison themselves when a call is
/// dropped mid-flight.
#[async_trait]
pub trait Harness {
    /// A short stable identifier (e.g. `"postgresql"`) matched against
    /// `skipif`/`onlyif` gates.
    fn engine_str(&self) -> &str;

    /// Returns the engine to a known-empty schema. Called once before each
    /// test file.
    async fn init(&mut self) -> Result<(), anyhow::Error>;

    /// Runs a statement that produces no rows.
    async fn execute_statement(&mut self, sql: &str) -> Result<(), anyhow::Error>;

    /// Runs a query, producing its schema and values.
    async fn execute_query(&mut self, sql: &str) -> Result<QueryResult, anyhow::Error>;
}
