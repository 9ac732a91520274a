//! Template parsing
//!
//! One grammar covers top-level fragments, switch bodies, and quoted
//! mini-templates; the parser picks an expression variant by longest-prefix
//! match on the discriminators. Parsing is a pure function of the source
//! string.

use crate::{
    Chunk, Template,
    error::TemplateParseError,
    expression::{
        Again, CaptureAccess, Collect, Comparand, CompareOp, Condition,
        Expression, Identifier, Instance, MultiRoll, Placeholder, Prop,
        RollCount, SwitchArm, SwitchChain, SwitchResult, Switched, TableRef,
        Variable,
    },
};
use std::{str::FromStr, sync::Arc};
use winnow::{
    ModalParser, ModalResult, Parser,
    ascii::{dec_int, dec_uint, float, multispace0},
    combinator::{
        alt, cut_err, delimited, eof, fail, not, opt, preceded, repeat,
        repeat_till, separated_pair, terminated,
    },
    error::{ContextError, StrContext, StrContextValue},
    token::{any, one_of, take_till, take_while},
};

/// Marks the start of a template expression
pub(crate) const EXPRESSION_OPEN: &str = "{{";
/// Marks the end of a template expression
pub(crate) const EXPRESSION_CLOSE: &str = "}}";

/// Parse a template, extracting all expressions
impl FromStr for Template {
    type Err = TemplateParseError;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        let chunks = all_chunks.parse(template)?;
        Ok(Self { chunks })
    }
}

impl FromStr for Identifier {
    type Err = TemplateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(identifier.parse(s)?)
    }
}

/// Parse a template into expressions and raw text
fn all_chunks(input: &mut &str) -> ModalResult<Vec<Chunk>> {
    repeat_till(
        0..,
        alt((
            expression_chunk.map(Chunk::Expression),
            raw.map(Chunk::Raw),
        ))
        .context(ctx_label("template chunk")),
        eof,
    )
    .map(|(chunks, _)| chunks)
    .context(ctx_label("template"))
    .parse_next(input)
}

/// Parse raw text, until we hit an expression or end of input
fn raw(input: &mut &str) -> ModalResult<Arc<str>> {
    repeat(
        1..,
        alt((
            escape_sequence,
            // Match anything other than an expression opening
            (not(EXPRESSION_OPEN), any).take(),
        )),
    )
    .map(String::into)
    .context(ctx_label("raw text"))
    .parse_next(input)
}

/// Match the escape sequence `\{{`, producing literal braces. The escaped
/// opening never starts an expression, so everything after it up to the next
/// unescaped `{{` stays raw text.
fn escape_sequence<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded('\\', EXPRESSION_OPEN).parse_next(input)
}

/// Parse a template expression with its bounding `{{ }}`
fn expression_chunk(input: &mut &str) -> ModalResult<Expression> {
    preceded(
        EXPRESSION_OPEN,
        // Any error inside an expression is fatal, including an unclosed one
        cut_err(terminated(
            expression,
            EXPRESSION_CLOSE.context(StrContext::Expected(
                StrContextValue::StringLiteral(EXPRESSION_CLOSE),
            )),
        )),
    )
    .context(ctx_label("expression"))
    .parse_next(input)
}

/// Parse the contents of an expression (inside the `{{ }}`, a switch body, or
/// nested within another expression)
fn expression(input: &mut &str) -> ModalResult<Expression> {
    delimited(multispace0, expression_inner, multispace0)
        .context(ctx_label("expression"))
        .parse_next(input)
}

fn expression_inner(input: &mut &str) -> ModalResult<Expression> {
    let base = core_expression.parse_next(input)?;
    // A core token may carry attached `.switch[…]` modifiers
    match opt(attached_chain).parse_next(input)? {
        Some(chain) => Ok(Expression::Switched(Switched {
            base: Box::new(base),
            chain,
        })),
        None => Ok(base),
    }
}

/// Parse one core expression form, discriminated by its prefix
fn core_expression(input: &mut &str) -> ModalResult<Expression> {
    alt((
        switch_chain.map(Expression::Switch),
        collect,
        multi_roll_or_again,
        dice,
        math,
        dollar_expression,
        placeholder,
        string_expression,
        instance_or_table,
        fail.context(ctx_expected("switch"))
            .context(ctx_expected("multi-roll"))
            .context(ctx_expected("variable"))
            .context(ctx_expected("placeholder"))
            .context(ctx_expected("table reference")),
    ))
    .parse_next(input)
}

/// Parse `dice:<body>`, deferring the body to the dice resolver
fn dice(input: &mut &str) -> ModalResult<Expression> {
    preceded("dice:", cut_err(resolver_body))
        .map(Expression::Dice)
        .context(ctx_label("dice expression"))
        .parse_next(input)
}

/// Parse `math:<body>`, deferring the body to the math resolver
fn math(input: &mut &str) -> ModalResult<Expression> {
    preceded("math:", cut_err(resolver_body))
        .map(Expression::Math)
        .context(ctx_label("math expression"))
        .parse_next(input)
}

/// The raw body of a resolver call: everything up to the end of the
/// enclosing expression or switch body. Resolver bodies never contain braces
/// or brackets.
fn resolver_body(input: &mut &str) -> ModalResult<String> {
    take_till(1.., ['}', ']', '|'])
        .map(|body: &str| body.trim().to_owned())
        .parse_next(input)
}

/// Parse `collect:$var.<accessor>` with optional `|unique` and `|"sep"`
fn collect(input: &mut &str) -> ModalResult<Expression> {
    preceded(
        "collect:",
        cut_err((
            preceded('$', identifier),
            preceded('.', property),
            modifiers,
        )),
    )
    .map(|(variable, accessor, mods)| {
        Expression::Collect(Collect {
            variable,
            accessor,
            unique: mods.unique,
            separator: mods.separator,
        })
    })
    .context(ctx_label("collect expression"))
    .parse_next(input)
}

/// Parse a multi-roll (`3*goblin`, `2*unique*loot >> $haul|silent`) or an
/// `again` expression (`again`, `3*unique*again`). Both start with an
/// optional count; `again` is a reserved word in target position.
fn multi_roll_or_again(input: &mut &str) -> ModalResult<Expression> {
    alt((counted_roll, bare_again))
        .context(ctx_label("multi-roll"))
        .parse_next(input)
}

fn bare_again(input: &mut &str) -> ModalResult<Expression> {
    (kw("again"), modifiers)
        .map(|(_, mods)| {
            Expression::Again(Again {
                count: RollCount::Literal(1),
                unique: false,
                separator: mods.separator,
            })
        })
        .parse_next(input)
}

fn counted_roll(input: &mut &str) -> ModalResult<Expression> {
    let count = terminated(roll_count, ws('*')).parse_next(input)?;
    let unique = opt(terminated(kw("unique"), ws('*')))
        .parse_next(input)?
        .is_some();

    if opt(kw("again")).parse_next(input)?.is_some() {
        let mods = modifiers.parse_next(input)?;
        return Ok(Expression::Again(Again {
            count,
            unique,
            separator: mods.separator,
        }));
    }

    let target = identifier.parse_next(input)?;
    let capture =
        opt(preceded(ws(">>"), preceded('$', cut_err(identifier))))
            .parse_next(input)?;
    let mods = modifiers.parse_next(input)?;
    Ok(Expression::MultiRoll(MultiRoll {
        count,
        unique: unique || mods.unique,
        target,
        capture,
        separator: mods.separator,
        silent: mods.silent,
    }))
}

/// Parse the count head of a multi-roll: an integer literal, a dice
/// expression (with or without the `dice:` prefix), `$var`, or `$var.count`
fn roll_count(input: &mut &str) -> ModalResult<RollCount> {
    alt((
        preceded("dice:", dice_head).map(RollCount::Dice),
        dice_head.map(RollCount::Dice),
        dec_uint.map(RollCount::Literal),
        preceded('$', (identifier, opt(preceded('.', kw("count")))))
            .map(|(name, count)| RollCount::Variable {
                name,
                count: count.is_some(),
            }),
    ))
    .parse_next(input)
}

/// A dice expression in count position, e.g. `2d6+1`. Must contain a `d` so
/// a plain integer count isn't mistaken for a roll of zero dice.
fn dice_head(input: &mut &str) -> ModalResult<String> {
    take_while(1.., |c: char| {
        c.is_ascii_digit() || c == 'd' || c == '+' || c == '-' || c == ' '
    })
    .verify(|s: &str| s.contains('d'))
    .map(|s: &str| s.trim().to_owned())
    .parse_next(input)
}

/// Parse a `$`-prefixed binding reference: a plain variable, or a capture
/// access with an index and/or property chain
fn dollar_expression(input: &mut &str) -> ModalResult<Expression> {
    preceded(
        '$',
        (
            identifier,
            opt(index),
            repeat(0.., property_step),
            modifiers,
        ),
    )
    .map(|(name, index, path, mods): (_, _, Vec<Prop>, _)| {
        if index.is_none() && path.is_empty() {
            Expression::Variable(Variable {
                name,
                separator: mods.separator,
            })
        } else {
            Expression::CaptureAccess(CaptureAccess {
                name,
                index,
                path,
                separator: mods.separator,
            })
        }
    })
    .context(ctx_label("variable"))
    .parse_next(input)
}

/// Parse a `@`-prefixed placeholder reference
fn placeholder(input: &mut &str) -> ModalResult<Expression> {
    preceded('@', cut_err((identifier, repeat(0.., property_step))))
        .map(|(name, path)| {
            Expression::Placeholder(Placeholder { name, path })
        })
        .context(ctx_label("placeholder"))
        .parse_next(input)
}

/// Parse a quoted string expression; inner `{{…}}` fragments interpolate
fn string_expression(input: &mut &str) -> ModalResult<Expression> {
    alt((quoted_template('"'), quoted_template('\'')))
        .map(Expression::Str)
        .context(ctx_label("string"))
        .parse_next(input)
}

/// Parse a bare identifier head: `table#name` instance or a table reference
/// with an optional property chain
fn instance_or_table(input: &mut &str) -> ModalResult<Expression> {
    let id = identifier.parse_next(input)?;
    if opt('#').parse_next(input)?.is_some() {
        let name = cut_err(identifier)
            .context(ctx_label("instance name"))
            .parse_next(input)?;
        return Ok(Expression::Instance(Instance { table: id, name }));
    }
    let path: Vec<Prop> = repeat(0.., property_step).parse_next(input)?;
    Ok(Expression::TableRef(TableRef { id, path }))
}

/// Parse one `.`-prefixed step of a property chain. `.switch[` and `.else[`
/// open attached modifiers rather than properties, so a bare identifier
/// followed by `[` is rejected here.
fn property_step(input: &mut &str) -> ModalResult<Prop> {
    preceded((multispace0, '.'), property).parse_next(input)
}

fn property(input: &mut &str) -> ModalResult<Prop> {
    alt((
        preceded('@', identifier).map(|id| Prop::Key(id.into())),
        terminated(identifier, not('[')).map(|id| match id.as_str() {
            "value" => Prop::Value,
            "description" => Prop::Description,
            "count" => Prop::Count,
            _ => Prop::Key(id.into()),
        }),
    ))
    .context(ctx_label("property"))
    .parse_next(input)
}

/// Parse an optional index: `[2]`, `[-1]`
fn index(input: &mut &str) -> ModalResult<i64> {
    delimited('[', dec_int, ']').parse_next(input)
}

/// Parse a standalone switch chain:
/// `switch[cond:result].switch[…].else[result]`
fn switch_chain(input: &mut &str) -> ModalResult<SwitchChain> {
    let first = switch_arm.parse_next(input)?;
    let rest: Vec<SwitchArm> =
        repeat(0.., preceded(ws('.'), switch_arm)).parse_next(input)?;
    let fallback = opt(preceded(ws('.'), else_arm)).parse_next(input)?;
    let mut arms = vec![first];
    arms.extend(rest);
    Ok(SwitchChain { arms, fallback })
}

/// Parse attached switch modifiers: one or more `.switch[…]` followed by an
/// optional `.else[…]`
fn attached_chain(input: &mut &str) -> ModalResult<SwitchChain> {
    let arms: Vec<SwitchArm> =
        repeat(1.., preceded(ws('.'), switch_arm)).parse_next(input)?;
    let fallback = opt(preceded(ws('.'), else_arm)).parse_next(input)?;
    Ok(SwitchChain { arms, fallback })
}

fn switch_arm(input: &mut &str) -> ModalResult<SwitchArm> {
    preceded(
        "switch[",
        // The opening is unambiguous, so errors inside are fatal
        cut_err(terminated(
            separated_pair(condition, ws(':'), switch_result),
            ']'.context(StrContext::Expected(StrContextValue::CharLiteral(
                ']',
            ))),
        )),
    )
    .map(|(condition, result)| SwitchArm { condition, result })
    .context(ctx_label("switch"))
    .parse_next(input)
}

fn else_arm(input: &mut &str) -> ModalResult<SwitchResult> {
    preceded(
        "else[",
        cut_err(terminated(
            switch_result,
            ']'.context(StrContext::Expected(StrContextValue::CharLiteral(
                ']',
            ))),
        )),
    )
    .context(ctx_label("else"))
    .parse_next(input)
}

/// Parse the result payload of a switch arm: a quoted mini-template, a
/// `{{…}}`-wrapped expression, or a bare expression (treated as if wrapped)
fn switch_result(input: &mut &str) -> ModalResult<SwitchResult> {
    delimited(
        multispace0,
        alt((
            alt((quoted_template('"'), quoted_template('\'')))
                .map(SwitchResult::Text),
            delimited(EXPRESSION_OPEN, expression, EXPRESSION_CLOSE)
                .map(|e| SwitchResult::Expression(Box::new(e))),
            expression.map(|e| SwitchResult::Expression(Box::new(e))),
        )),
        multispace0,
    )
    .context(ctx_label("switch result"))
    .parse_next(input)
}

/// Parse a boolean condition. `||` is the weakest binder.
fn condition(input: &mut &str) -> ModalResult<Condition> {
    let first = and_condition.parse_next(input)?;
    let rest: Vec<Condition> =
        repeat(0.., preceded(ws("||"), and_condition)).parse_next(input)?;
    Ok(rest.into_iter().fold(first, |acc, cond| {
        Condition::Or(Box::new(acc), Box::new(cond))
    }))
}

fn and_condition(input: &mut &str) -> ModalResult<Condition> {
    let first = condition_atom.parse_next(input)?;
    let rest: Vec<Condition> =
        repeat(0.., preceded(ws("&&"), condition_atom)).parse_next(input)?;
    Ok(rest.into_iter().fold(first, |acc, cond| {
        Condition::And(Box::new(acc), Box::new(cond))
    }))
}

fn condition_atom(input: &mut &str) -> ModalResult<Condition> {
    alt((
        delimited(ws('('), condition, ws(')')),
        comparison,
    ))
    .context(ctx_label("condition"))
    .parse_next(input)
}

/// A comparison, or a bare comparand (truthy iff non-empty)
fn comparison(input: &mut &str) -> ModalResult<Condition> {
    let lhs = comparand.parse_next(input)?;
    match opt((ws(compare_op), comparand)).parse_next(input)? {
        Some((op, rhs)) => Ok(Condition::Compare { lhs, op, rhs }),
        None => Ok(Condition::Truthy(lhs)),
    }
}

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    alt((
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Ne),
        "<=".value(CompareOp::Le),
        ">=".value(CompareOp::Ge),
        '<'.value(CompareOp::Lt),
        '>'.value(CompareOp::Gt),
        kw("contains").value(CompareOp::Contains),
    ))
    .context(ctx_label("comparison operator"))
    .parse_next(input)
}

fn comparand(input: &mut &str) -> ModalResult<Comparand> {
    delimited(
        multispace0,
        alt((
            quoted_string.map(Comparand::Str),
            number.map(Comparand::Number),
            dollar_comparand,
            preceded('@', (identifier, repeat(0.., property_step))).map(
                |(name, path)| Comparand::Placeholder { name, path },
            ),
            // Bare words compare as string literals
            identifier.map(|id| Comparand::Str(id.into())),
        )),
        multispace0,
    )
    .context(ctx_label("comparand"))
    .parse_next(input)
}

/// `$var`, `$var[i].@key…`, or the bare `$` subject of an attached switch
fn dollar_comparand(input: &mut &str) -> ModalResult<Comparand> {
    preceded(
        '$',
        opt((identifier, opt(index), repeat(0.., property_step))),
    )
    .map(|parts| match parts {
        Some((name, index, path)) => Comparand::Variable { name, index, path },
        None => Comparand::Subject,
    })
    .parse_next(input)
}

/// A numeric literal with a token boundary, so `2d6` isn't half-parsed
fn number(input: &mut &str) -> ModalResult<f64> {
    terminated(float, not(one_of(Identifier::is_char_allowed)))
        .parse_next(input)
}

/// Accumulated `|` modifiers: a quoted separator, `silent`, `unique`
#[derive(Debug, Default)]
struct Modifiers {
    separator: Option<String>,
    silent: bool,
    unique: bool,
}

fn modifiers(input: &mut &str) -> ModalResult<Modifiers> {
    #[derive(Clone)]
    enum Modifier {
        Separator(String),
        Silent,
        Unique,
    }

    let mods: Vec<Modifier> = repeat(
        0..,
        preceded(
            ws('|'),
            cut_err(alt((
                kw("silent").value(Modifier::Silent),
                kw("unique").value(Modifier::Unique),
                quoted_string.map(Modifier::Separator),
            )))
            .context(ctx_label("modifier")),
        ),
    )
    .parse_next(input)?;

    Ok(mods.into_iter().fold(
        Modifiers::default(),
        |mut acc, modifier| {
            match modifier {
                Modifier::Separator(sep) => acc.separator = Some(sep),
                Modifier::Silent => acc.silent = true,
                Modifier::Unique => acc.unique = true,
            }
            acc
        },
    ))
}

/// Parse a quoted string with no interpolation (separators, comparands)
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    alt((plain_quoted('"'), plain_quoted('\''))).parse_next(input)
}

fn plain_quoted<'a>(
    quote: char,
) -> impl ModalParser<&'a str, String, ContextError> {
    move |input: &mut &'a str| {
        preceded(
            quote,
            // The opening quote is unambiguous, so once we've seen it,
            // errors are fatal
            cut_err(terminated(
                repeat(
                    0..,
                    alt((
                        preceded('\\', escaped_char(quote)),
                        literal_char(quote),
                    )),
                ),
                quote.context(StrContext::Expected(
                    StrContextValue::CharLiteral(quote),
                )),
            )),
        )
        .context(ctx_label("string literal"))
        .parse_next(input)
    }
}

/// Parse a quoted mini-template: raw text with escapes, interleaved with
/// interpolated `{{…}}` expressions
fn quoted_template<'a>(
    quote: char,
) -> impl ModalParser<&'a str, Template, ContextError> {
    move |input: &mut &'a str| {
        preceded(
            quote,
            cut_err(terminated(
                repeat(
                    0..,
                    alt((
                        expression_chunk.map(Chunk::Expression),
                        quoted_raw(quote).map(Chunk::Raw),
                    )),
                ),
                quote.context(StrContext::Expected(
                    StrContextValue::CharLiteral(quote),
                )),
            )),
        )
        .map(|chunks: Vec<Chunk>| Template { chunks })
        .context(ctx_label("quoted template"))
        .parse_next(input)
    }
}

/// Raw text within a quoted template, up to the closing quote or an
/// interpolated expression
fn quoted_raw<'a>(
    quote: char,
) -> impl ModalParser<&'a str, Arc<str>, ContextError> {
    move |input: &mut &'a str| {
        repeat(
            1..,
            alt((
                preceded('\\', escaped_char(quote)),
                (not(EXPRESSION_OPEN), literal_char(quote))
                    .map(|((), c)| c),
            )),
        )
        .map(|text: String| text.into())
        .parse_next(input)
    }
}

/// A single character that doesn't terminate or escape the enclosing literal
fn literal_char<'a>(
    quote: char,
) -> impl ModalParser<&'a str, char, ContextError> {
    move |input: &mut &'a str| {
        any.verify(move |c: &char| *c != quote && *c != '\\')
            .parse_next(input)
    }
}

/// A character following a backslash within a quoted literal
fn escaped_char<'a>(
    quote: char,
) -> impl ModalParser<&'a str, char, ContextError> {
    move |input: &mut &'a str| {
        alt((
            '\\'.value('\\'),
            'n'.value('\n'),
            't'.value('\t'),
            'r'.value('\r'),
            '{'.value('{'),
            '"'.value('"'),
            '\''.value('\''),
            quote.value(quote),
        ))
        .parse_next(input)
    }
}

/// Parse a table/binding/key name. See [Identifier] for the allowed syntax.
fn identifier(input: &mut &str) -> ModalResult<Identifier> {
    (
        take_while(1, Identifier::is_char_allowed_first),
        take_while(0.., Identifier::is_char_allowed),
    )
        .take()
        .map(|id: &str| Identifier(id.to_owned()))
        .context(ctx_label("identifier"))
        .parse_next(input)
}

/// Match a keyword with a token boundary, so `again` doesn't eat the head of
/// a table named `against`
fn kw<'a>(
    word: &'static str,
) -> impl ModalParser<&'a str, &'a str, ContextError> {
    terminated(word, not(one_of(Identifier::is_char_allowed)))
}

/// Wrap a parser to allow whitespace on either side of it
fn ws<'a, O, F>(parser: F) -> impl ModalParser<&'a str, O, ContextError>
where
    F: ModalParser<&'a str, O, ContextError>,
{
    delimited(multispace0, parser, multispace0)
}

/// Create a [StrContext::Label]
fn ctx_label(label: &'static str) -> StrContext {
    StrContext::Label(label)
}

/// Create a [StrContext::Expected]
fn ctx_expected(expected: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(expected))
}
