// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Abstract syntax for sqllogictest records.

/// The declared type of one result column: `I`, `R`, or `T` in a `query`
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Integer,
    Real,
    Text,
}

impl Type {
    /// The single-letter form used in schema strings.
    pub fn as_char(self) -> char {
        match self {
            Type::Integer => 'I',
            Type::Real => 'R',
            Type::Text => 'T',
        }
    }
}

/// How observed and expected values are ordered before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    No,
    Row,
    Value,
}

impl Sort {
    /// The keyword form used in a `query` header.
    pub fn as_str(self) -> &'static str {
        match self {
            Sort::No => "nosort",
            Sort::Row => "rowsort",
            Sort::Value => "valuesort",
        }
    }

    /// Sorts a flat, row-major value list according to this mode. `num_cols`
    /// is the declared row width; row sorting keys on the concatenation of a
    /// row's cells, and every comparison is stable and bytewise.
    pub fn sort_results(self, num_cols: usize, mut values: Vec<String>) -> Vec<String> {
        match self {
            Sort::No => values,
            Sort::Row => {
                let mut rows: Vec<Vec<String>> = values
                    .chunks(num_cols)
                    .map(|row| row.to_vec())
                    .collect();
                rows.sort_by_cached_key(|row| row.concat());
                rows.into_iter().flatten().collect()
            }
            Sort::Value => {
                values.sort();
                values
            }
        }
    }
}

/// An engine gate attached to a record by a `skipif` or `onlyif` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    SkipIf(String),
    OnlyIf(String),
}

/// The expected output of a query record: either enumerated values or a
/// count-plus-MD5 summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Values(Vec<String>),
    Hashed { num_values: usize, md5: String },
}

impl Output {
    /// The number of individual result values this output stands for.
    pub fn num_values(&self) -> usize {
        match self {
            Output::Values(values) => values.len(),
            Output::Hashed { num_values, .. } => *num_values,
        }
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, Output::Hashed { .. })
    }
}

/// One sqllogictest record.
///
/// Records are immutable once parsed. `line_num` is the 1-based line of the
/// record's header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Statement {
        line_num: usize,
        sql: String,
        expect_error: bool,
        conditions: Vec<Condition>,
    },
    Query {
        line_num: usize,
        sql: String,
        types: Vec<Type>,
        sort: Sort,
        label: Option<String>,
        conditions: Vec<Condition>,
        expected: Output,
        hash_threshold: usize,
    },
    Halt {
        line_num: usize,
        conditions: Vec<Condition>,
    },
}

impl Record {
    pub fn line_num(&self) -> usize {
        match self {
            Record::Statement { line_num, .. }
            | Record::Query { line_num, .. }
            | Record::Halt { line_num, .. } => *line_num,
        }
    }

    /// The SQL text of the record, newlines already collapsed to spaces.
    pub fn sql(&self) -> &str {
        match self {
            Record::Statement { sql, .. } | Record::Query { sql, .. } => sql,
            Record::Halt { .. } => "",
        }
    }

    fn conditions(&self) -> &[Condition] {
        match self {
            Record::Statement { conditions, .. }
            | Record::Query { conditions, .. }
            | Record::Halt { conditions, .. } => conditions,
        }
    }

    /// Whether this record applies to the named engine: no `skipif` gate may
    /// match, and if any `onlyif` gates exist at least one must match.
    pub fn should_execute_for_engine(&self, engine: &str) -> bool {
        let mut has_only = false;
        let mut only_matches = false;
        for condition in self.conditions() {
            match condition {
                Condition::SkipIf(e) => {
                    if e == engine {
                        return false;
                    }
                }
                Condition::OnlyIf(e) => {
                    has_only = true;
                    if e == engine {
                        only_matches = true;
                    }
                }
            }
        }
        !has_only || only_matches
    }
}
