//! The math resolver. Substitutes `$var`, `$var.@key…`, and `@placeholder`
//! references (unresolved references become `0`), then evaluates the
//! arithmetic. An expression that still fails to parse after substitution
//! resolves to nothing and the caller emits an empty string.

use tracing::debug;
use winnow::{
    ModalResult, Parser,
    ascii::{float, multispace0},
    combinator::{alt, delimited, opt, preceded, repeat},
    token::{any, take_while},
};

/// A `$`/`@` reference inside a math expression. Path segments have their
/// `@` sigil stripped; the caller maps reserved words (`value`, `count`,
/// `description`) itself.
#[derive(Debug)]
pub(crate) struct MathRef {
    /// `@name` (placeholder scope) rather than `$name` (frame binding)
    pub placeholder: bool,
    pub name: String,
    pub path: Vec<String>,
}

/// Evaluate a math expression against a read-only view of the evaluation
/// state. Returns `None` if the substituted expression isn't arithmetic.
pub(crate) fn evaluate(
    expression: &str,
    resolve: impl Fn(&MathRef) -> Option<String>,
) -> Option<String> {
    let substituted = substitute(expression, &resolve);
    match arithmetic.parse(substituted.as_str()) {
        Ok(value) => Some(format_number(value)),
        Err(_) => {
            debug!(expression, "Ignoring malformed math expression");
            None
        }
    }
}

/// Replace every `$`/`@` reference with its resolved value. Unresolved or
/// empty references substitute as `0` so incomplete documents still produce
/// a number.
fn substitute(
    expression: &str,
    resolve: &impl Fn(&MathRef) -> Option<String>,
) -> String {
    let mut output = String::with_capacity(expression.len());
    let mut rest = expression;
    while !rest.is_empty() {
        if let Ok(reference) = reference.parse_next(&mut rest) {
            match resolve(&reference).filter(|value| !value.is_empty()) {
                Some(value) => output.push_str(&value),
                None => output.push('0'),
            }
        } else if let Ok(c) = any::<_, winnow::error::ContextError>
            .parse_next(&mut rest)
        {
            output.push(c);
        } else {
            break;
        }
    }
    output
}

fn reference(input: &mut &str) -> ModalResult<MathRef> {
    (
        alt(('$'.value(false), '@'.value(true))),
        name,
        repeat(0.., preceded('.', preceded(opt('@'), name))),
    )
        .map(|(placeholder, name, path): (bool, String, Vec<String>)| {
            MathRef {
                placeholder,
                name,
                path,
            }
        })
        .parse_next(input)
}

/// A reference name. Unlike template identifiers, hyphens are excluded so
/// they parse as subtraction.
fn name(input: &mut &str) -> ModalResult<String> {
    (
        take_while(1, |c: char| c.is_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_'),
    )
        .take()
        .map(str::to_owned)
        .parse_next(input)
}

/// `sum` with full-input consumption
fn arithmetic(input: &mut &str) -> ModalResult<f64> {
    delimited(multispace0, sum, multispace0).parse_next(input)
}

fn sum(input: &mut &str) -> ModalResult<f64> {
    let first = product.parse_next(input)?;
    let rest: Vec<(char, f64)> =
        repeat(0.., (ws(alt(('+', '-'))), product)).parse_next(input)?;
    Ok(rest.into_iter().fold(first, |acc, (op, operand)| {
        if op == '+' { acc + operand } else { acc - operand }
    }))
}

fn product(input: &mut &str) -> ModalResult<f64> {
    let first = factor.parse_next(input)?;
    let rest: Vec<(char, f64)> =
        repeat(0.., (ws(alt(('*', '/', '%'))), factor)).parse_next(input)?;
    Ok(rest.into_iter().fold(first, |acc, (op, operand)| match op {
        '*' => acc * operand,
        '/' => acc / operand,
        _ => acc % operand,
    }))
}

fn factor(input: &mut &str) -> ModalResult<f64> {
    delimited(
        multispace0,
        alt((
            preceded('-', factor).map(|value| -value),
            delimited('(', sum, ws(')')),
            float,
        )),
        multispace0,
    )
    .parse_next(input)
}

/// Integral results print without a decimal point
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn ws<'a, O, F>(
    parser: F,
) -> impl winnow::ModalParser<&'a str, O, winnow::error::ContextError>
where
    F: winnow::ModalParser<&'a str, O, winnow::error::ContextError>,
{
    delimited(multispace0, parser, multispace0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn no_refs(_: &MathRef) -> Option<String> {
        None
    }

    #[rstest]
    #[case::literal("5", "5")]
    #[case::addition("5 + 2", "7")]
    #[case::precedence("1 + 2 * 3", "7")]
    #[case::parentheses("(1 + 2) * 3", "9")]
    #[case::division("7 / 2", "3.5")]
    #[case::modulo("7 % 3", "1")]
    #[case::negation("-4 + 10", "6")]
    #[case::float_result("0.5 * 3", "1.5")]
    fn test_arithmetic(#[case] expression: &str, #[case] expected: &str) {
        assert_eq!(
            evaluate(expression, no_refs).as_deref(),
            Some(expected),
        );
    }

    #[rstest]
    #[case::placeholder("@character.level * 2", "10")]
    #[case::placeholder_at_key("@character.@level * 2", "10")]
    #[case::variable("$bonus + 1", "3")]
    // Unresolved references substitute as zero
    #[case::unresolved("$nope + 7", "7")]
    fn test_substitution(#[case] expression: &str, #[case] expected: &str) {
        let resolve = |reference: &MathRef| {
            match (
                reference.placeholder,
                reference.name.as_str(),
                reference.path.as_slice(),
            ) {
                (true, "character", [key]) if key == "level" => {
                    Some("5".to_owned())
                }
                (false, "bonus", []) => Some("2".to_owned()),
                _ => None,
            }
        };
        assert_eq!(evaluate(expression, resolve).as_deref(), Some(expected));
    }

    #[rstest]
    #[case::words("banana")]
    #[case::empty("")]
    #[case::unbalanced("(1 + 2")]
    // A reference that resolves to text isn't arithmetic
    #[case::textual("$name")]
    fn test_malformed(#[case] expression: &str) {
        let resolve = |reference: &MathRef| {
            (reference.name == "name").then(|| "Orc".to_owned())
        };
        assert_eq!(evaluate(expression, resolve), None);
    }
}
