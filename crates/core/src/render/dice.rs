//! The dice-roll resolver: `2d6+1`, `d20`, `3d8-2`, … The evaluator treats
//! this as an opaque entry point; a malformed expression resolves to nothing
//! and the caller emits an empty string.

use crate::random::Sampler;
use tracing::debug;
use winnow::{
    ModalResult, Parser,
    ascii::{dec_uint, multispace0},
    combinator::{alt, delimited, opt, preceded, repeat},
};

/// Roll a dice expression. Returns `None` if the expression doesn't parse.
pub(crate) fn roll(
    expression: &str,
    sampler: &mut dyn Sampler,
) -> Option<i64> {
    let terms = match terms.parse(expression) {
        Ok(terms) => terms,
        Err(_) => {
            debug!(expression, "Ignoring malformed dice expression");
            return None;
        }
    };
    Some(
        terms
            .into_iter()
            .map(|(sign, term)| sign * term.roll(sampler))
            .sum(),
    )
}

enum Term {
    /// `NdS`: N dice with S sides each
    Dice { count: u32, sides: u32 },
    /// A flat modifier
    Modifier(i64),
}

impl Term {
    fn roll(&self, sampler: &mut dyn Sampler) -> i64 {
        match self {
            Self::Dice { count, sides } => (0..*count)
                .map(|_| die(*sides, sampler))
                .sum(),
            Self::Modifier(modifier) => *modifier,
        }
    }
}

/// Roll one die: uniform in `1..=sides`
fn die(sides: u32, sampler: &mut dyn Sampler) -> i64 {
    if sides == 0 {
        return 0;
    }
    let draw = sampler.sample(f64::from(sides)) as i64;
    (draw + 1).clamp(1, i64::from(sides))
}

/// Parse `term ((+|-) term)*`, attaching a sign to each term
fn terms(input: &mut &str) -> ModalResult<Vec<(i64, Term)>> {
    let first = ws(term).parse_next(input)?;
    let rest: Vec<(i64, Term)> = repeat(
        0..,
        (
            ws(alt(('+'.value(1), '-'.value(-1)))),
            ws(term),
        ),
    )
    .parse_next(input)?;
    let mut terms = vec![(1, first)];
    terms.extend(rest);
    Ok(terms)
}

fn term(input: &mut &str) -> ModalResult<Term> {
    alt((
        (opt(dec_uint::<_, u32, _>), preceded('d', dec_uint)).map(
            |(count, sides)| Term::Dice {
                count: count.unwrap_or(1),
                sides,
            },
        ),
        dec_uint::<_, u32, _>.map(|modifier| Term::Modifier(i64::from(modifier))),
    ))
    .parse_next(input)
}

fn ws<'a, O, F>(
    parser: F,
) -> impl winnow::ModalParser<&'a str, O, winnow::error::ContextError>
where
    F: winnow::ModalParser<&'a str, O, winnow::error::ContextError>,
{
    delimited(multispace0, parser, multispace0)
}
