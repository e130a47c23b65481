//! Output path templates.
//!
//! A template is a relative path with `{field}` placeholders:
//!
//! | Placeholder   | Value                         | Format spec                |
//! |---------------|-------------------------------|----------------------------|
//! | `{x}`, `{y}`  | tile index                    | zero-pad width, `{x:03}`   |
//! | `{start}`     | window start                  | strftime, `{start:%Y%m%d}` |
//! | `{end}`       | window end (exclusive)        | strftime                   |
//! | `{statistic}` | statistic name                | none                       |
//!
//! Timestamps default to `%Y-%m-%d`. Negative indices keep their sign in
//! front of the padding: `{x:03}` renders `-5` as `-005`.

use crate::grid::TileIndex;
use crate::window::TimeWindow;
use chrono::format::{Item, StrftimeItems};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors from parsing a path template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Unknown placeholder '{{{0}}}' (expected x, y, start, end or statistic)")]
    UnknownPlaceholder(String),

    #[error("Invalid format '{format}' for placeholder '{{{field}}}'")]
    InvalidFormat { field: String, format: String },

    #[error("Unbalanced braces at byte {0}")]
    UnbalancedBrace(usize),

    #[error("Template is empty")]
    Empty,

    #[error("Template must be a relative path: '{0}'")]
    AbsolutePath(String),

    #[error("Template must not contain '..' components: '{0}'")]
    ParentDirectory(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Index { x_axis: bool, width: usize },
    Date { start: bool, format: String },
    Statistic,
}

/// A parsed output path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub tile: TileIndex,
    pub window: &'a TimeWindow,
    pub statistic: &'a str,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        if template.starts_with('/') || template.starts_with('\\') {
            return Err(TemplateError::AbsolutePath(template.to_string()));
        }
        if template.split(['/', '\\']).any(|part| part == "..") {
            return Err(TemplateError::ParentDirectory(template.to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(pos) = rest.find(['{', '}']) {
            if rest.as_bytes()[pos] == b'}' {
                return Err(TemplateError::UnbalancedBrace(offset + pos));
            }
            literal.push_str(&rest[..pos]);
            let close = rest[pos..]
                .find('}')
                .ok_or(TemplateError::UnbalancedBrace(offset + pos))?
                + pos;
            let body = &rest[pos + 1..close];
            if body.contains('{') {
                return Err(TemplateError::UnbalancedBrace(offset + pos));
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_placeholder(body)?);

            offset += close + 1;
            rest = &rest[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders the template to a relative path.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> PathBuf {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Index { x_axis, width } => {
                    let value = if *x_axis { ctx.tile.x } else { ctx.tile.y };
                    out.push_str(&pad_index(value, *width));
                }
                Segment::Date { start, format } => {
                    let instant = if *start { ctx.window.start } else { ctx.window.end };
                    out.push_str(&instant.format(format).to_string());
                }
                Segment::Statistic => out.push_str(ctx.statistic),
            }
        }
        PathBuf::from(out)
    }
}

impl FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_placeholder(body: &str) -> Result<Segment, TemplateError> {
    let (field, format) = match body.split_once(':') {
        Some((field, format)) => (field.trim(), Some(format)),
        None => (body.trim(), None),
    };
    let invalid = || TemplateError::InvalidFormat {
        field: field.to_string(),
        format: format.unwrap_or_default().to_string(),
    };

    match field {
        "x" | "y" => {
            let width = match format {
                None => 0,
                Some(spec) => spec
                    .strip_prefix('0')
                    .unwrap_or(spec)
                    .parse::<usize>()
                    .map_err(|_| invalid())?,
            };
            Ok(Segment::Index {
                x_axis: field == "x",
                width,
            })
        }
        "start" | "end" => {
            let format = format.unwrap_or(DEFAULT_DATE_FORMAT);
            if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(invalid());
            }
            Ok(Segment::Date {
                start: field == "start",
                format: format.to_string(),
            })
        }
        "statistic" => match format {
            None => Ok(Segment::Statistic),
            Some(_) => Err(invalid()),
        },
        other => Err(TemplateError::UnknownPlaceholder(other.to_string())),
    }
}

/// Zero-pads the magnitude, keeping a leading `-` outside the padding.
fn pad_index(value: i32, width: usize) -> String {
    if value < 0 {
        format!("-{:0width$}", value.unsigned_abs(), width = width)
    } else {
        format!("{:0width$}", value, width = width)
    }
}
