//! Built-in line operations for `--stage`.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::str::FromStr;

/// One line-to-line operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOp {
    Trim,
    Upper,
    Lower,
    Reverse,
    Len,
    Int,
    Double,
    Prefix(String),
    Suffix(String),
    Replace { from: String, to: String },
}

impl LineOp {
    pub fn name(&self) -> &'static str {
        match self {
            LineOp::Trim => "trim",
            LineOp::Upper => "upper",
            LineOp::Lower => "lower",
            LineOp::Reverse => "reverse",
            LineOp::Len => "len",
            LineOp::Int => "int",
            LineOp::Double => "double",
            LineOp::Prefix(_) => "prefix",
            LineOp::Suffix(_) => "suffix",
            LineOp::Replace { .. } => "replace",
        }
    }

    pub fn apply(&self, line: String) -> Result<String> {
        let result = match self {
            LineOp::Trim => line.trim().to_string(),
            LineOp::Upper => line.to_uppercase(),
            LineOp::Lower => line.to_lowercase(),
            LineOp::Reverse => line.chars().rev().collect(),
            LineOp::Len => line.chars().count().to_string(),
            LineOp::Int => parse_int(&line)?.to_string(),
            LineOp::Double => parse_int(&line)?
                .checked_mul(2)
                .ok_or_else(|| anyhow!("doubling {} overflows", line.trim()))?
                .to_string(),
            LineOp::Prefix(text) => format!("{}{}", text, line),
            LineOp::Suffix(text) => format!("{}{}", line, text),
            LineOp::Replace { from, to } => line.replace(from.as_str(), to),
        };
        Ok(result)
    }
}

fn parse_int(line: &str) -> Result<i64> {
    line.trim()
        .parse::<i64>()
        .with_context(|| format!("not an integer: {:?}", line))
}

impl FromStr for LineOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, arg) = match s.split_once('=') {
            Some((op, arg)) => (op, Some(arg)),
            None => (s, None),
        };

        let needs_arg = |arg: Option<&str>| {
            arg.map(str::to_string)
                .ok_or_else(|| format!("operation '{}' needs an argument: {}=TEXT", op, op))
        };

        let parsed = match op {
            "trim" => LineOp::Trim,
            "upper" => LineOp::Upper,
            "lower" => LineOp::Lower,
            "reverse" => LineOp::Reverse,
            "len" => LineOp::Len,
            "int" => LineOp::Int,
            "double" => LineOp::Double,
            "prefix" => return Ok(LineOp::Prefix(needs_arg(arg)?)),
            "suffix" => return Ok(LineOp::Suffix(needs_arg(arg)?)),
            "replace" => {
                let arg = needs_arg(arg)?;
                let (from, to) = arg
                    .split_once('/')
                    .ok_or_else(|| "replace expects replace=FROM/TO".to_string())?;
                if from.is_empty() {
                    return Err("replace pattern must not be empty".to_string());
                }
                return Ok(LineOp::Replace {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            other => return Err(format!("unknown operation '{}'", other)),
        };

        match arg {
            Some(_) => Err(format!("operation '{}' takes no argument", op)),
            None => Ok(parsed),
        }
    }
}

/// A `--stage` value: `OP[=ARG][@WORKERS]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub op: LineOp,
    pub workers: Option<usize>,
}

impl FromStr for StageSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A trailing @N is a worker count; any other '@' belongs to the argument
        if let Some((op, workers)) = s.rsplit_once('@') {
            if let Ok(workers) = workers.parse::<usize>() {
                if workers == 0 {
                    return Err("worker count must be at least 1".to_string());
                }
                return Ok(StageSpec {
                    op: op.parse()?,
                    workers: Some(workers),
                });
            }
        }

        Ok(StageSpec {
            op: s.parse()?,
            workers: None,
        })
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.name())?;
        if let Some(workers) = self.workers {
            write!(f, "@{}", workers)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_ops() {
        assert_eq!("trim".parse::<LineOp>(), Ok(LineOp::Trim));
        assert_eq!("double".parse::<LineOp>(), Ok(LineOp::Double));
        assert_eq!(
            "prefix=> ".parse::<LineOp>(),
            Ok(LineOp::Prefix("> ".to_string()))
        );
        assert_eq!(
            "replace=a/b".parse::<LineOp>(),
            Ok(LineOp::Replace {
                from: "a".to_string(),
                to: "b".to_string()
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("shout".parse::<LineOp>().is_err());
        assert!("prefix".parse::<LineOp>().is_err());
        assert!("upper=x".parse::<LineOp>().is_err());
        assert!("replace=nothing".parse::<LineOp>().is_err());
        assert!("replace=/x".parse::<LineOp>().is_err());
    }

    #[test]
    fn test_parse_stage_spec() {
        let spec: StageSpec = "upper@4".parse().unwrap();
        assert_eq!(spec.op, LineOp::Upper);
        assert_eq!(spec.workers, Some(4));

        let spec: StageSpec = "suffix=@home".parse().unwrap();
        assert_eq!(spec.op, LineOp::Suffix("@home".to_string()));
        assert_eq!(spec.workers, None);

        let spec: StageSpec = "prefix=a@b@2".parse().unwrap();
        assert_eq!(spec.op, LineOp::Prefix("a@b".to_string()));
        assert_eq!(spec.workers, Some(2));

        assert!("upper@0".parse::<StageSpec>().is_err());
        assert_eq!(spec.to_string(), "prefix@2");
    }

    #[test]
    fn test_apply() {
        assert_eq!(LineOp::Trim.apply("  x ".into()).unwrap(), "x");
        assert_eq!(LineOp::Upper.apply("abc".into()).unwrap(), "ABC");
        assert_eq!(LineOp::Reverse.apply("héllo".into()).unwrap(), "olléh");
        assert_eq!(LineOp::Len.apply("héllo".into()).unwrap(), "5");
        assert_eq!(LineOp::Int.apply(" 042 ".into()).unwrap(), "42");
        assert_eq!(LineOp::Double.apply("21".into()).unwrap(), "42");
        assert_eq!(
            LineOp::Replace {
                from: "o".into(),
                to: "0".into()
            }
            .apply("foo".into())
            .unwrap(),
            "f00"
        );
    }

    #[test]
    fn test_apply_failures() {
        let err = LineOp::Int.apply("abc".into()).unwrap_err();
        assert!(err.to_string().contains("not an integer"));
        assert!(LineOp::Double.apply(i64::MAX.to_string()).is_err());
    }
}
