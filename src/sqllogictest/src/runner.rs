// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Executes parsed records against a [`Harness`] and emits verdicts.
//!
//! Records within a file are stateful and strictly ordered, so execution is
//! sequential; the only concurrency is the per-record deadline, which stops
//! waiting on a stuck harness call and discards its eventual result.

use std::any::Any;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::AddAssign;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use md5::{Digest, Md5};
use tokio::time;
use tracing::debug;
use walkdir::WalkDir;

use crate::ast::{Output, Record, Sort, Type};
use crate::harness::{Harness, QueryResult};
use crate::parser::{self, LineScanner, SEPARATOR};
use crate::util;

/// The default per-record deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// A sink for formatted text.
pub trait WriteFmt {
    fn write_fmt(&self, fmt: fmt::Arguments<'_>);
}

/// Configuration shared by the verify and generate drivers.
pub struct RunConfig<'a> {
    /// Where verdict lines are written.
    pub stdout: &'a dyn WriteFmt,
    /// Where per-file errors are reported.
    pub stderr: &'a dyn WriteFmt,
    /// The per-record deadline.
    pub timeout: Duration,
    /// Truncate long queries in the log prefix.
    pub truncate_queries: bool,
    /// After a timeout, report the remaining records in the file as
    /// `did not run` instead of stopping outright.
    pub mark_did_not_run: bool,
}

/// The verdict for one executed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NotOk(String),
    Skipped,
    Timeout,
    DidNotRun,
}

/// Verdict counts accumulated across one or more test files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcomes {
    pub ok: usize,
    pub not_ok: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub did_not_run: usize,
}

impl Outcomes {
    pub fn any_failed(&self) -> bool {
        self.not_ok > 0 || self.timeout > 0
    }

    pub fn total(&self) -> usize {
        self.ok + self.not_ok + self.skipped + self.timeout + self.did_not_run
    }

    fn count(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Ok => self.ok += 1,
            Outcome::NotOk(_) => self.not_ok += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Timeout => self.timeout += 1,
            Outcome::DidNotRun => self.did_not_run += 1,
        }
    }
}

impl AddAssign for Outcomes {
    fn add_assign(&mut self, rhs: Outcomes) {
        self.ok += rhs.ok;
        self.not_ok += rhs.not_ok;
        self.skipped += rhs.skipped;
        self.timeout += rhs.timeout;
        self.did_not_run += rhs.did_not_run;
    }
}

impl fmt::Display for Outcomes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ok={}, not-ok={}, skipped={}, timeout={}, did-not-run={}, total={}",
            self.ok,
            self.not_ok,
            self.skipped,
            self.timeout,
            self.did_not_run,
            self.total(),
        )
    }
}

/// Gathers the test files under the given paths: explicit files are taken
/// as-is, directories contribute every `*.test` file beneath them.
pub fn collect_test_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut test_files = vec![];
    for path in paths {
        let metadata =
            fs::metadata(path).with_context(|| format!("resolving {}", path.display()))?;
        if metadata.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry.with_context(|| format!("walking {}", path.display()))?;
                if entry.file_type().is_file()
                    && entry.path().extension().map_or(false, |ext| ext == "test")
                {
                    test_files.push(entry.into_path());
                }
            }
        } else {
            test_files.push(path.clone());
        }
    }
    Ok(test_files)
}

/// Everything needed to emit one record's verdict line.
struct LogContext<'a> {
    config: &'a RunConfig<'a>,
    test_file: &'a str,
    line_num: usize,
    query: String,
    start: Instant,
}

impl<'a> LogContext<'a> {
    fn new(config: &'a RunConfig<'a>, test_file: &'a str, record: &Record) -> LogContext<'a> {
        LogContext {
            config,
            test_file,
            line_num: record.line_num(),
            query: util::truncate_query(record.sql(), config.truncate_queries),
            start: Instant::now(),
        }
    }

    /// Emits the record's single verdict line.
    fn log(&self, outcome: &Outcome) {
        let prefix = format!(
            "{} {} {}:{}: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.start.elapsed().as_millis(),
            self.test_file,
            self.line_num,
            self.query,
        );
        match outcome {
            Outcome::Ok => writeln!(self.config.stdout, "{} ok", prefix),
            Outcome::NotOk(message) => writeln!(
                self.config.stdout,
                "{} not ok: {}",
                prefix,
                message.replace('\n', " ")
            ),
            Outcome::Skipped => writeln!(self.config.stdout, "{} skipped", prefix),
            Outcome::Timeout => writeln!(self.config.stdout, "{} timeout", prefix),
            Outcome::DidNotRun => writeln!(self.config.stdout, "{} did not run", prefix),
        }
    }
}

/// What executing one record produced.
struct RecordResult {
    /// The verdict, if the record yields one. Halt and inapplicable control
    /// records yield none.
    verdict: Option<Outcome>,
    /// Observed schema letters (queries only).
    schema: String,
    /// Observed values, exactly as the harness returned them.
    values: Vec<String>,
    /// Stop processing the file.
    halt: bool,
    /// The harness itself failed or panicked, as opposed to a comparison
    /// failing; the generator keeps such records unchanged.
    harness_errored: bool,
}

impl RecordResult {
    fn of(verdict: Option<Outcome>) -> RecordResult {
        RecordResult {
            verdict,
            schema: String::new(),
            values: vec![],
            halt: false,
            harness_errored: false,
        }
    }
}

/// Runs one record under the panic boundary and the per-record deadline.
async fn execute_record_guarded<H>(
    timeout: Duration,
    harness: &mut H,
    record: &Record,
) -> RecordResult
where
    H: Harness,
{
    let execution = AssertUnwindSafe(execute_record(harness, record)).catch_unwind();
    match time::timeout(timeout, execution).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => RecordResult {
            harness_errored: true,
            ..RecordResult::of(Some(Outcome::NotOk(format!(
                "Caught panic: {}",
                panic_message(panic.as_ref())
            ))))
        },
        Err(_) => RecordResult::of(Some(Outcome::Timeout)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    };
    message.replace('\n', " ")
}

/// Executes a single record, producing at most one verdict: the first
/// failed check wins and later checks are not attempted.
async fn execute_record<H>(harness: &mut H, record: &Record) -> RecordResult
where
    H: Harness,
{
    if !record.should_execute_for_engine(harness.engine_str()) {
        // Only statements and queries report a skip; gated control records
        // are silent.
        let verdict = match record {
            Record::Statement { .. } | Record::Query { .. } => Some(Outcome::Skipped),
            Record::Halt { .. } => None,
        };
        return RecordResult::of(verdict);
    }

    match record {
        Record::Statement {
            sql, expect_error, ..
        } => match (*expect_error, harness.execute_statement(sql).await) {
            (true, Ok(())) => RecordResult::of(Some(Outcome::NotOk(
                "Expected error but didn't get one".into(),
            ))),
            (false, Err(err)) => RecordResult {
                harness_errored: true,
                ..RecordResult::of(Some(Outcome::NotOk(format!("Unexpected error {}", err))))
            },
            _ => RecordResult::of(Some(Outcome::Ok)),
        },
        Record::Query {
            sql,
            types,
            sort,
            expected,
            ..
        } => {
            let QueryResult { schema, values } = match harness.execute_query(sql).await {
                Ok(result) => result,
                Err(err) => {
                    return RecordResult {
                        harness_errored: true,
                        ..RecordResult::of(Some(Outcome::NotOk(format!(
                            "Unexpected error {}",
                            err
                        ))))
                    };
                }
            };
            let verdict = match verify_schema(types, &schema) {
                Err(outcome) => outcome,
                Ok(()) => verify_results(types, *sort, expected, &values),
            };
            RecordResult {
                verdict: Some(verdict),
                schema,
                values,
                halt: false,
                harness_errored: false,
            }
        }
        Record::Halt { .. } => RecordResult {
            halt: true,
            ..RecordResult::of(None)
        },
    }
}

/// Checks the observed schema against the record's declaration. An integer
/// column is acceptable where a real was declared; engines disagree about
/// when arithmetic produces a decimal.
fn verify_schema(expected: &[Type], actual: &str) -> Result<(), Outcome> {
    let expected_str: String = expected.iter().map(|t| t.as_char()).collect();
    if actual == expected_str {
        return Ok(());
    }
    let mismatch = || {
        Err(Outcome::NotOk(format!(
            "Schemas differ. Expected {}, got {}",
            expected_str, actual
        )))
    };
    if actual.chars().count() != expected.len() {
        return mismatch();
    }
    for (expected, actual) in expected.iter().zip(actual.chars()) {
        let compatible =
            actual == expected.as_char() || (*expected == Type::Real && actual == 'I');
        if !compatible {
            return mismatch();
        }
    }
    Ok(())
}

/// Compares observed values against the record's expectation, after
/// normalization and sorting.
fn verify_results(types: &[Type], sort: Sort, expected: &Output, values: &[String]) -> Outcome {
    if values.len() != expected.num_values() {
        return Outcome::NotOk(format!(
            "Incorrect number of results. Expected {}, got {}",
            expected.num_values(),
            values.len()
        ));
    }

    let values = normalize_results(types, values);
    let values = sort.sort_results(types.len(), values);

    match expected {
        Output::Hashed { md5, .. } => {
            let computed = hash_results(&values);
            if computed != *md5 {
                Outcome::NotOk(format!(
                    "Hash of results differ. Expected {}, got {}",
                    md5, computed
                ))
            } else {
                Outcome::Ok
            }
        }
        Output::Values(expected_values) => {
            for (i, (expected_value, value)) in expected_values.iter().zip(&values).enumerate() {
                if expected_value != value {
                    return Outcome::NotOk(format!(
                        "Incorrect result at position {}. Expected {}, got {}",
                        i, expected_value, value
                    ));
                }
            }
            Outcome::Ok
        }
    }
}

/// Reformats integer-shaped values in columns the record declares as real:
/// `2` becomes `2.000` where the file records a decimal.
fn normalize_results(types: &[Type], values: &[String]) -> Vec<String> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            if types[i % types.len()] == Type::Real && !value.contains('.') {
                format!("{}.000", value)
            } else {
                value.clone()
            }
        })
        .collect()
}

/// MD5 over each value followed by a newline, matching the original
/// sqllogictest C implementation.
pub fn hash_results(values: &[String]) -> String {
    let mut hasher = Md5::new();
    for value in values {
        hasher.update(value);
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Runs every record in the test file at `path` against the harness,
/// writing one verdict line per statement or query.
pub async fn run_file<H>(
    config: &RunConfig<'_>,
    harness: &mut H,
    path: &Path,
) -> Result<Outcomes, anyhow::Error>
where
    H: Harness,
{
    harness
        .init()
        .await
        .with_context(|| format!("initializing harness for {}", path.display()))?;

    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records = parser::parse_records(&contents)
        .map_err(|err| anyhow!("parsing {}: {}", path.display(), err))?;
    debug!("parsed {} records from {}", records.len(), path.display());

    let test_file = util::normalize_path(path);
    let mut outcomes = Outcomes::default();
    let mut timed_out = false;

    for record in &records {
        let ctx = LogContext::new(config, &test_file, record);

        if timed_out {
            if !config.mark_did_not_run {
                break;
            }
            ctx.log(&Outcome::DidNotRun);
            outcomes.count(&Outcome::DidNotRun);
            continue;
        }

        let result = execute_record_guarded(config.timeout, harness, record).await;
        if let Some(outcome) = &result.verdict {
            ctx.log(outcome);
            outcomes.count(outcome);
            if *outcome == Outcome::Timeout {
                timed_out = true;
                continue;
            }
        }
        if result.halt {
            break;
        }
    }

    Ok(outcomes)
}

/// Runs the file and writes a `.generated` sibling with the observed
/// results substituted into the expected-result slots.
pub async fn generate_file<H>(
    config: &RunConfig<'_>,
    harness: &mut H,
    path: &Path,
) -> Result<(), anyhow::Error>
where
    H: Harness,
{
    harness
        .init()
        .await
        .with_context(|| format!("initializing harness for {}", path.display()))?;

    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records = parser::parse_records(&contents)
        .map_err(|err| anyhow!("parsing {}: {}", path.display(), err))?;

    let generated_path = PathBuf::from(format!("{}.generated", path.display()));
    let file = File::create(&generated_path)
        .with_context(|| format!("creating {}", generated_path.display()))?;
    let mut out = BufWriter::new(file);

    let test_file = util::normalize_path(path);
    let mut scanner = LineScanner::new(&contents);

    for record in &records {
        let ctx = LogContext::new(config, &test_file, record);
        let result = execute_record_guarded(config.timeout, harness, record).await;
        if let Some(outcome) = &result.verdict {
            ctx.log(outcome);
            if *outcome == Outcome::Timeout {
                // The deadline fired; keep the rest of the file as it was.
                copy_rest_of_file(&mut scanner, &mut out)?;
                out.flush()?;
                return Ok(());
            }
        }

        if result.harness_errored || !record.should_execute_for_engine(harness.engine_str()) {
            copy_until_end_of_record(&mut scanner, &mut out)?;
            continue;
        }

        if result.halt {
            copy_rest_of_file(&mut scanner, &mut out)?;
            out.flush()?;
            return Ok(());
        }

        match record {
            Record::Statement { line_num, .. } => {
                // The statement header is copied verbatim; its SQL text and
                // terminator are copied while advancing to the next record.
                copy_through_line(&mut scanner, &mut out, *line_num)?;
            }
            Record::Query {
                line_num,
                sort,
                label,
                ..
            } => {
                copy_until_line(&mut scanner, &mut out, *line_num)?;
                let label = match label {
                    Some(label) => format!(" {}", label),
                    None => String::new(),
                };
                writeln!(out, "query {} {}{}", result.schema, sort.as_str(), label)?;
                copy_until_separator(&mut scanner, &mut out)?;
                write_results(record, result.values, &mut out)?;
                skip_until_end_of_record(&mut scanner, &mut out)?;
            }
            Record::Halt { .. } => unreachable!("executed halt records stop the driver"),
        }
    }

    copy_rest_of_file(&mut scanner, &mut out)?;
    out.flush()
        .with_context(|| format!("flushing {}", generated_path.display()))?;
    Ok(())
}

/// Writes the record's observed results: one value per line, or a single
/// hash summary once the record's threshold is exceeded. A threshold of
/// zero never hashes.
fn write_results(
    record: &Record,
    values: Vec<String>,
    out: &mut impl Write,
) -> Result<(), anyhow::Error> {
    let Record::Query {
        types,
        sort,
        hash_threshold,
        ..
    } = record
    else {
        unreachable!("only query records carry results")
    };
    let values = sort.sort_results(types.len(), values);
    if *hash_threshold > 0 && values.len() > *hash_threshold {
        writeln!(out, "{} values hashing to {}", values.len(), hash_results(&values))?;
    } else {
        for value in &values {
            writeln!(out, "{}", value)?;
        }
    }
    Ok(())
}

fn copy_rest_of_file(
    scanner: &mut LineScanner<'_>,
    out: &mut impl Write,
) -> Result<(), anyhow::Error> {
    for (_, line) in scanner {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

/// Copies input lines through the line numbered `line_num`, inclusive.
fn copy_through_line(
    scanner: &mut LineScanner<'_>,
    out: &mut impl Write,
    line_num: usize,
) -> Result<(), anyhow::Error> {
    for (n, line) in scanner {
        writeln!(out, "{}", line)?;
        if n == line_num {
            break;
        }
    }
    Ok(())
}

/// Copies input lines up to, and consumes without copying, the line
/// numbered `line_num`.
fn copy_until_line(
    scanner: &mut LineScanner<'_>,
    out: &mut impl Write,
    line_num: usize,
) -> Result<(), anyhow::Error> {
    for (n, line) in scanner {
        if n == line_num {
            break;
        }
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

/// Copies lines through the `----` separator.
fn copy_until_separator(
    scanner: &mut LineScanner<'_>,
    out: &mut impl Write,
) -> Result<(), anyhow::Error> {
    for (_, line) in scanner {
        writeln!(out, "{}", line)?;
        if line.trim() == SEPARATOR {
            break;
        }
    }
    Ok(())
}

/// Copies lines through the record's blank-line terminator.
fn copy_until_end_of_record(
    scanner: &mut LineScanner<'_>,
    out: &mut impl Write,
) -> Result<(), anyhow::Error> {
    for (_, line) in scanner {
        writeln!(out, "{}", line)?;
        if line.trim().is_empty() {
            break;
        }
    }
    Ok(())
}

/// Discards the record's original expected results, emitting only the
/// blank-line terminator.
fn skip_until_end_of_record(
    scanner: &mut LineScanner<'_>,
    out: &mut impl Write,
) -> Result<(), anyhow::Error> {
    for (_, line) in scanner {
        if line.trim().is_empty() {
            writeln!(out)?;
            break;
        }
    }
    Ok(())
}
