// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A parser for sqllogictest files.

use std::fmt;
use std::mem;
use std::sync::LazyLock;

use anyhow::{anyhow, bail};
use regex::Regex;

use crate::ast::{Condition, Output, Record, Sort, Type};

static HASH_RESULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+) values hashing to ([0-9a-fA-F]{32})$").unwrap());

/// The line separating a query's SQL text from its expected results.
pub const SEPARATOR: &str = "----";

/// A parse failure, tagged with the 1-based line it occurred on.
#[derive(Debug)]
pub struct ParseError {
    pub line_num: usize,
    pub source: anyhow::Error,
}

impl ParseError {
    fn new(line_num: usize, source: anyhow::Error) -> ParseError {
        ParseError { line_num, source }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line_num, self.source)
    }
}

impl std::error::Error for ParseError {}

/// Yields the lines of a test file along with their 1-based line numbers.
/// The line number advances on every line, blanks included.
pub struct LineScanner<'a> {
    lines: std::str::Lines<'a>,
    line_num: usize,
}

impl<'a> LineScanner<'a> {
    pub fn new(contents: &'a str) -> LineScanner<'a> {
        LineScanner {
            lines: contents.lines(),
            line_num: 0,
        }
    }

    /// The line number of the most recently yielded line.
    pub fn line_num(&self) -> usize {
        self.line_num
    }
}

impl<'a> Iterator for LineScanner<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.next()?;
        self.line_num += 1;
        Some((self.line_num, line))
    }
}

/// Parses the contents of one test file into records.
pub fn parse_records(contents: &str) -> Result<Vec<Record>, ParseError> {
    Parser::new(contents).parse_records()
}

pub struct Parser<'a> {
    scanner: LineScanner<'a>,
    hash_threshold: usize,
}

impl<'a> Parser<'a> {
    pub fn new(contents: &'a str) -> Parser<'a> {
        Parser {
            scanner: LineScanner::new(contents),
            // Zero means results are never summarized by hash unless the
            // file raises the threshold with a hash-threshold directive.
            hash_threshold: 0,
        }
    }

    /// Parses every record in the file, stopping at a `halt` directive.
    /// Conditions left dangling at end of file attach to no record and are
    /// discarded.
    pub fn parse_records(&mut self) -> Result<Vec<Record>, ParseError> {
        let mut records = vec![];
        let mut conditions = vec![];
        while let Some((line_num, line)) = self.scanner.next() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            match words.next().unwrap() {
                "skipif" => {
                    let engine = words.next().ok_or_else(|| {
                        ParseError::new(line_num, anyhow!("skipif missing engine name"))
                    })?;
                    conditions.push(Condition::SkipIf(engine.to_owned()));
                }
                "onlyif" => {
                    let engine = words.next().ok_or_else(|| {
                        ParseError::new(line_num, anyhow!("onlyif missing engine name"))
                    })?;
                    conditions.push(Condition::OnlyIf(engine.to_owned()));
                }
                "hash-threshold" => {
                    self.hash_threshold = words
                        .next()
                        .ok_or_else(|| {
                            ParseError::new(line_num, anyhow!("missing threshold in: {}", line))
                        })?
                        .parse::<usize>()
                        .map_err(|err| {
                            ParseError::new(
                                line_num,
                                anyhow!("invalid threshold ({}) in: {}", err, line),
                            )
                        })?;
                }
                "halt" => {
                    records.push(Record::Halt {
                        line_num,
                        conditions: mem::take(&mut conditions),
                    });
                    break;
                }
                "statement" => {
                    let record =
                        self.parse_statement(words, line_num, mem::take(&mut conditions))?;
                    records.push(record);
                }
                "query" => {
                    let record = self.parse_query(words, line_num, mem::take(&mut conditions))?;
                    records.push(record);
                }
                other => {
                    return Err(ParseError::new(
                        line_num,
                        anyhow!("unexpected start of record: {}", other),
                    ));
                }
            }
        }
        Ok(records)
    }

    fn parse_statement(
        &mut self,
        mut words: impl Iterator<Item = &'a str>,
        line_num: usize,
        conditions: Vec<Condition>,
    ) -> Result<Record, ParseError> {
        let expect_error = match words.next() {
            Some("ok") => false,
            Some("error") => true,
            other => {
                return Err(ParseError::new(
                    line_num,
                    anyhow!("invalid statement disposition: {:?}", other),
                ));
            }
        };
        let (sql, _) = self.slurp_sql(false);
        Ok(Record::Statement {
            line_num,
            sql,
            expect_error,
            conditions,
        })
    }

    fn parse_query(
        &mut self,
        mut words: impl Iterator<Item = &'a str>,
        line_num: usize,
        conditions: Vec<Condition>,
    ) -> Result<Record, ParseError> {
        let types = match words.next() {
            Some(s) => parse_types(s).map_err(|err| ParseError::new(line_num, err))?,
            None => {
                return Err(ParseError::new(
                    line_num,
                    anyhow!("query header missing result schema"),
                ));
            }
        };
        let sort = match words.next() {
            Some(s) => parse_sort(s).map_err(|err| ParseError::new(line_num, err))?,
            None => {
                return Err(ParseError::new(
                    line_num,
                    anyhow!("query header missing sort mode"),
                ));
            }
        };
        let label = words.next().map(|s| s.to_owned());
        let (sql, saw_separator) = self.slurp_sql(true);
        let expected = if saw_separator {
            self.parse_expected_results()?
        } else {
            // No separator at all: a legal query expecting an empty result.
            Output::Values(vec![])
        };
        Ok(Record::Query {
            line_num,
            sql,
            types,
            sort,
            label,
            conditions,
            expected,
            hash_threshold: self.hash_threshold,
        })
    }

    /// Collects the SQL text of a record, folding newlines into single
    /// spaces. Returns the text and whether a `----` separator ended it.
    fn slurp_sql(&mut self, stop_at_separator: bool) -> (String, bool) {
        let mut sql = String::new();
        for (_, line) in self.scanner.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return (sql, false);
            }
            if stop_at_separator && trimmed == SEPARATOR {
                return (sql, true);
            }
            if !sql.is_empty() {
                sql.push(' ');
            }
            sql.push_str(line);
        }
        (sql, false)
    }

    /// Parses the expected-result lines of a query record. Every
    /// whitespace-separated token is one value, except that a lone
    /// `N values hashing to <md5>` line summarizes the whole result.
    fn parse_expected_results(&mut self) -> Result<Output, ParseError> {
        let mut values: Vec<String> = vec![];
        let mut hashed = None;
        while let Some((line_num, line)) = self.scanner.next() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if hashed.is_some() {
                return Err(ParseError::new(
                    line_num,
                    anyhow!("unexpected line after hash result: {}", line),
                ));
            }
            if values.is_empty() {
                if let Some(captures) = HASH_RESULT_REGEX.captures(line) {
                    let num_values = captures[1].parse::<usize>().map_err(|err| {
                        ParseError::new(line_num, anyhow!("invalid hash result count: {}", err))
                    })?;
                    hashed = Some(Output::Hashed {
                        num_values,
                        md5: captures[2].to_owned(),
                    });
                    continue;
                }
            }
            values.extend(line.split_whitespace().map(|s| s.to_owned()));
        }
        Ok(hashed.unwrap_or(Output::Values(values)))
    }
}

fn parse_types(input: &str) -> Result<Vec<Type>, anyhow::Error> {
    input
        .chars()
        .map(|char| {
            Ok(match char {
                'I' => Type::Integer,
                'R' => Type::Real,
                'T' => Type::Text,
                _ => bail!("unexpected type char {} in: {}", char, input),
            })
        })
        .collect()
}

fn parse_sort(input: &str) -> Result<Sort, anyhow::Error> {
    match input.to_lowercase().as_str() {
        "nosort" => Ok(Sort::No),
        "rowsort" => Ok(Sort::Row),
        "valuesort" => Ok(Sort::Value),
        other => bail!("unrecognized sort mode: {}", other),
    }
}
