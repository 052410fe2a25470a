// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output path patterns: strftime-like `%` tokens expanded with the session
// timestamp.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::error::{Result, ScanwerkError};

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Year,
    ShortYear,
    Month,
    MonthName,
    ShortMonthName,
    Day,
    Weekday,
    ShortWeekday,
    Hour24,
    Hour12,
    Minute,
    Second,
    Meridiem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A validated output path pattern such as `~/Scans/%Y/%Y%m%d-%H%M%S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl NamePattern {
    /// Parse and validate a pattern. Unknown tokens and a trailing `%` fail.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let token = match chars.next() {
                None => {
                    return Err(ScanwerkError::PatternToken(format!(
                        "pattern {raw:?} ends with a bare %"
                    )));
                }
                Some('%') => {
                    literal.push('%');
                    continue;
                }
                Some('Y') => Token::Year,
                Some('y') => Token::ShortYear,
                Some('m') => Token::Month,
                Some('B') => Token::MonthName,
                Some('b') => Token::ShortMonthName,
                Some('d') => Token::Day,
                Some('A') => Token::Weekday,
                Some('a') => Token::ShortWeekday,
                Some('H') => Token::Hour24,
                Some('I') => Token::Hour12,
                Some('M') => Token::Minute,
                Some('S') => Token::Second,
                Some('p') => Token::Meridiem,
                Some(other) => {
                    return Err(ScanwerkError::PatternToken(format!(
                        "unknown token %{other} in {raw:?}"
                    )));
                }
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Token(token));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Render the pattern for `at`, without any extension.
    pub fn render(&self, at: NaiveDateTime) -> String {
        let mut out = String::with_capacity(self.raw.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => out.push_str(&render_token(*token, at)),
            }
        }
        out
    }

    /// Render the pattern into a path, expanding a leading `~/` to `$HOME`.
    pub fn expand(&self, at: NaiveDateTime) -> PathBuf {
        let rendered = self.render(at);
        match (rendered.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
            _ => PathBuf::from(rendered),
        }
    }
}

fn render_token(token: Token, at: NaiveDateTime) -> String {
    let month_name = MONTHS[at.month0() as usize];
    let weekday_name = WEEKDAYS[at.weekday().num_days_from_monday() as usize];
    match token {
        Token::Year => format!("{:04}", at.year()),
        Token::ShortYear => format!("{:02}", at.year().rem_euclid(100)),
        Token::Month => format!("{:02}", at.month()),
        Token::MonthName => month_name.to_string(),
        Token::ShortMonthName => month_name[..3].to_string(),
        Token::Day => format!("{:02}", at.day()),
        Token::Weekday => weekday_name.to_string(),
        Token::ShortWeekday => weekday_name[..3].to_string(),
        Token::Hour24 => format!("{:02}", at.hour()),
        Token::Hour12 => format!("{:02}", at.hour12().1),
        Token::Minute => format!("{:02}", at.minute()),
        Token::Second => format!("{:02}", at.second()),
        Token::Meridiem => if at.hour12().0 { "PM" } else { "AM" }.to_string(),
    }
}
