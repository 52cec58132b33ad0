//! # Cron Expression Handling
//!
//! Parses the 5-field cron grammar used by scheduled task definitions and
//! computes upcoming occurrences against UTC wall time.
//!
//! ## Grammar
//!
//! `minute hour day-of-month month day-of-week`, each field a comma list
//! of parts:
//!
//! * `*` matches every value
//! * `*/n` matches every value divisible by `n`
//! * `a` matches exactly `a`
//! * `a-b` matches the inclusive range
//!
//! ## Parsing Strategy
//!
//! Fields are parsed with `nom` combinators; `*/n` is tried before the
//! bare `*` and ranges before exact values so that prefixes do not
//! shadow longer forms. Bounds are checked by an explicit `validate`
//! pass after parsing.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{digit1, space1},
    combinator::{all_consuming, map, map_res, value},
    error::{context, convert_error, VerboseError},
    multi::separated_list1,
    sequence::{preceded, separated_pair, tuple},
    IResult,
};
use thiserror::Error;

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Upper bound for the occurrence scan, one leap year of minutes.
const MAX_SCAN_MINUTES: usize = 527_040;

/// One alternative within a cron field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPart {
    /// `*`
    Any,
    /// `*/n`
    Step(u32),
    /// `a`
    Exact(u32),
    /// `a-b`
    Range(u32, u32),
}

/// A cron field: a comma list of parts, matching when any part matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    parts: Vec<FieldPart>,
}

impl Field {
    fn matches(&self, candidate: u32) -> bool {
        self.parts.iter().any(|part| match part {
            FieldPart::Any => true,
            FieldPart::Step(step) => *step != 0 && candidate % step == 0,
            FieldPart::Exact(exact) => candidate == *exact,
            FieldPart::Range(low, high) => candidate >= *low && candidate <= *high,
        })
    }

    fn is_any(&self) -> bool {
        self.parts.iter().all(|part| matches!(part, FieldPart::Any))
    }

    fn validate(&self, name: &str, min: u32, max: u32) -> Result<(), ScheduleError> {
        for part in &self.parts {
            match part {
                FieldPart::Any => {}
                FieldPart::Step(step) => {
                    if *step == 0 || *step > max {
                        return Err(ScheduleError::InvalidField {
                            field: name.to_string(),
                            message: format!("step {} out of range 1-{}", step, max),
                        });
                    }
                }
                FieldPart::Exact(exact) => {
                    if *exact < min || *exact > max {
                        return Err(ScheduleError::InvalidField {
                            field: name.to_string(),
                            message: format!("value {} out of range {}-{}", exact, min, max),
                        });
                    }
                }
                FieldPart::Range(low, high) => {
                    if low > high || *low < min || *high > max {
                        return Err(ScheduleError::InvalidField {
                            field: name.to_string(),
                            message: format!("range {}-{} out of range {}-{}", low, high, min, max),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A validated 5-field cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronExpr {
    text: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

fn parse_number(input: &str) -> ParserResult<u32> {
    map_res(digit1, str::parse)(input)
}

fn parse_part(input: &str) -> ParserResult<FieldPart> {
    context(
        "field part",
        alt((
            // `*/n` before `*`, ranges before exact values
            map(preceded(tag("*/"), parse_number), FieldPart::Step),
            value(FieldPart::Any, tag("*")),
            map(
                separated_pair(parse_number, tag("-"), parse_number),
                |(low, high)| FieldPart::Range(low, high),
            ),
            map(parse_number, FieldPart::Exact),
        )),
    )(input)
}

fn parse_field(input: &str) -> ParserResult<Field> {
    context(
        "field",
        map(separated_list1(tag(","), parse_part), |parts| Field {
            parts,
        }),
    )(input)
}

#[allow(clippy::type_complexity)]
fn parse_expression(input: &str) -> ParserResult<(Field, Field, Field, Field, Field)> {
    context(
        "cron expression",
        tuple((
            parse_field,
            preceded(space1, parse_field),
            preceded(space1, parse_field),
            preceded(space1, parse_field),
            preceded(space1, parse_field),
        )),
    )(input)
}

impl CronExpr {
    /// Parses and validates a cron expression.
    ///
    /// # Errors
    ///
    /// `ParseError` for grammar violations, `InvalidField` for
    /// out-of-range values.
    #[tracing::instrument(level = "debug")]
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let trimmed = text.trim();
        let (minute, hour, day_of_month, month, day_of_week) =
            match all_consuming(parse_expression)(trimmed) {
                Ok((_, fields)) => fields,
                Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                    return Err(ScheduleError::ParseError {
                        expression: text.to_string(),
                        message: convert_error(trimmed, e),
                    });
                }
                Err(nom::Err::Incomplete(_)) => {
                    return Err(ScheduleError::ParseError {
                        expression: text.to_string(),
                        message: "incomplete expression".to_string(),
                    });
                }
            };

        let expr = Self {
            text: trimmed.to_string(),
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        };
        expr.validate()?;
        Ok(expr)
    }

    fn validate(&self) -> Result<(), ScheduleError> {
        self.minute.validate("minute", 0, 59)?;
        self.hour.validate("hour", 0, 23)?;
        self.day_of_month.validate("day-of-month", 1, 31)?;
        self.month.validate("month", 1, 12)?;
        self.day_of_week.validate("day-of-week", 0, 6)?;
        Ok(())
    }

    /// True when the expression fires at the given instant, second
    /// precision ignored.
    pub fn matches_at(&self, at: DateTime<Utc>) -> bool {
        if !(self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.month.matches(at.month()))
        {
            return false;
        }
        let dom_matches = self.day_of_month.matches(at.day());
        let dow_matches = self.day_of_week.matches(at.weekday().num_days_from_sunday());
        // Classic cron: with both day fields restricted, either suffices.
        if !self.day_of_month.is_any() && !self.day_of_week.is_any() {
            dom_matches || dow_matches
        } else {
            dom_matches && dow_matches
        }
    }

    /// First occurrence strictly after `after`, or None when no minute in
    /// the next year matches.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let truncated = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after);
        let mut candidate = truncated + ChronoDuration::minutes(1);
        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches_at(candidate) {
                return Some(candidate);
            }
            candidate = candidate + ChronoDuration::minutes(1);
        }
        None
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression {expression}: {message}")]
    ParseError { expression: String, message: String },

    #[error("Invalid cron field {field}: {message}")]
    InvalidField { field: String, message: String },
}
