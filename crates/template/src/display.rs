//! Template and expression stringification
//!
//! This is not guaranteed to return the exact string that was parsed, as
//! whitespace within expressions is variable and bare keys/words are printed
//! in their canonical (`@key` / quoted) form.

use crate::{
    Chunk, Template,
    expression::{
        Again, CaptureAccess, Collect, Comparand, CompareOp, Condition,
        Expression, Instance, MultiRoll, Placeholder, Prop, RollCount,
        SwitchChain, SwitchResult, Switched, TableRef, Variable,
    },
    parse::{EXPRESSION_CLOSE, EXPRESSION_OPEN},
};
use itertools::Itertools;
use std::fmt::{self, Display, Write};

impl Template {
    /// Convert the template back to a string. Raw text is re-escaped so the
    /// output parses back to the same template.
    pub fn display(&self) -> String {
        let mut buf = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Raw(text) => {
                    buf.push_str(&text.replace(EXPRESSION_OPEN, "\\{{"));
                }
                Chunk::Expression(expression) => {
                    // Writing to a string can't fail
                    write!(
                        buf,
                        "{EXPRESSION_OPEN} {expression} {EXPRESSION_CLOSE}"
                    )
                    .unwrap();
                }
            }
        }
        buf
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableRef(table_ref) => write!(f, "{table_ref}"),
            Self::Dice(body) => write!(f, "dice:{body}"),
            Self::Math(body) => write!(f, "math:{body}"),
            Self::Variable(variable) => write!(f, "{variable}"),
            Self::CaptureAccess(access) => write!(f, "{access}"),
            Self::Placeholder(placeholder) => write!(f, "{placeholder}"),
            Self::MultiRoll(roll) => write!(f, "{roll}"),
            Self::Collect(collect) => write!(f, "{collect}"),
            Self::Instance(instance) => write!(f, "{instance}"),
            Self::Again(again) => write!(f, "{again}"),
            Self::Switch(chain) => write!(f, "{chain}"),
            Self::Str(template) => write_quoted(f, template),
            Self::Switched(switched) => write!(f, "{switched}"),
        }
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        write_path(f, &self.path)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)?;
        write_separator(f, self.separator.as_deref())
    }
}

impl Display for CaptureAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        write_path(f, &self.path)?;
        write_separator(f, self.separator.as_deref())
    }
}

impl Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        write_path(f, &self.path)
    }
}

impl Display for MultiRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.count)?;
        if self.unique {
            write!(f, "unique*")?;
        }
        write!(f, "{}", self.target)?;
        if let Some(capture) = &self.capture {
            write!(f, " >> ${capture}")?;
        }
        write_separator(f, self.separator.as_deref())?;
        if self.silent {
            write!(f, "|silent")?;
        }
        Ok(())
    }
}

impl Display for Collect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collect:${}.{}", self.variable, self.accessor)?;
        if self.unique {
            write!(f, "|unique")?;
        }
        write_separator(f, self.separator.as_deref())
    }
}

impl Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.name)
    }
}

impl Display for Again {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unique {
            write!(f, "{}*unique*again", self.count)?;
        } else if self.count == RollCount::Literal(1) {
            write!(f, "again")?;
        } else {
            write!(f, "{}*again", self.count)?;
        }
        write_separator(f, self.separator.as_deref())
    }
}

impl Display for Switched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.base, self.chain)
    }
}

impl Display for RollCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(count) => write!(f, "{count}"),
            Self::Variable { name, count: true } => {
                write!(f, "${name}.count")
            }
            Self::Variable { name, count: false } => write!(f, "${name}"),
            Self::Dice(dice) => write!(f, "dice:{dice}"),
        }
    }
}

impl Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "@{key}"),
            Self::Value => write!(f, "value"),
            Self::Description => write!(f, "description"),
            Self::Count => write!(f, "count"),
        }
    }
}

impl Display for SwitchChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arms.iter().format("."))?;
        if let Some(fallback) = &self.fallback {
            write!(f, ".else[{fallback}]")?;
        }
        Ok(())
    }
}

impl Display for crate::SwitchArm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "switch[{}:{}]", self.condition, self.result)
    }
}

impl Display for SwitchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(template) => write_quoted(f, template),
            Self::Expression(expression) => write!(
                f,
                "{EXPRESSION_OPEN} {expression} {EXPRESSION_CLOSE}"
            ),
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Or(lhs, rhs) => write!(f, "{lhs} || {rhs}"),
            Self::And(lhs, rhs) => {
                // An || under an && can only come from parentheses; keep them
                // so the output parses back to the same tree
                write_and_operand(f, lhs)?;
                write!(f, " && ")?;
                write_and_operand(f, rhs)
            }
            Self::Compare { lhs, op, rhs } => {
                write!(f, "{lhs} {op} {rhs}")
            }
            Self::Truthy(comparand) => write!(f, "{comparand}"),
        }
    }
}

fn write_and_operand(
    f: &mut fmt::Formatter<'_>,
    condition: &Condition,
) -> fmt::Result {
    if matches!(condition, Condition::Or(_, _)) {
        write!(f, "({condition})")
    } else {
        write!(f, "{condition}")
    }
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "contains",
        };
        write!(f, "{op}")
    }
}

impl Display for Comparand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "\"{}\"", escape_quoted(s)),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Variable { name, index, path } => {
                write!(f, "${name}")?;
                if let Some(index) = index {
                    write!(f, "[{index}]")?;
                }
                write_path(f, path)
            }
            Self::Placeholder { name, path } => {
                write!(f, "@{name}")?;
                write_path(f, path)
            }
            Self::Subject => write!(f, "$"),
        }
    }
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &[Prop]) -> fmt::Result {
    for prop in path {
        write!(f, ".{prop}")?;
    }
    Ok(())
}

fn write_separator(
    f: &mut fmt::Formatter<'_>,
    separator: Option<&str>,
) -> fmt::Result {
    if let Some(separator) = separator {
        write!(f, "|\"{}\"", escape_quoted(separator))?;
    }
    Ok(())
}

fn write_quoted(
    f: &mut fmt::Formatter<'_>,
    template: &Template,
) -> fmt::Result {
    write!(f, "\"{}\"", escape_quoted(&template.display()))
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('\r', "\\r")
}
