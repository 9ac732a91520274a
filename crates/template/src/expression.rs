//! Typed expression nodes for the template language

use crate::Template;
use derive_more::{Deref, Display};

/// One parsed `{{ … }}` fragment. The parser picks a variant by
/// longest-prefix match on the discriminators (`switch[`, `collect:`,
/// `dice:`, `math:`, `$`, `@`, a count followed by `*`, …); anything left is
/// a table (or template) reference.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// Reference to a table or template by id, with an optional dotted
    /// property chain: `goblin`, `goblin.@weapon.@material`
    TableRef(TableRef),
    /// Deferred dice roll: `dice:2d6+1`. The body is handed to the dice
    /// resolver verbatim.
    Dice(String),
    /// Deferred math evaluation: `math:@char.level * 2`. The body is handed
    /// to the math resolver verbatim; it substitutes `$`/`@` references
    /// itself.
    Math(String),
    /// Plain binding lookup: `$name`, optionally with a list separator
    Variable(Variable),
    /// Binding lookup with an index and/or property chain:
    /// `$foes[0].@weapon.@material`
    CaptureAccess(CaptureAccess),
    /// Placeholder lookup in the materialization scope: `@self.value`,
    /// `@goblin.weapon`
    Placeholder(Placeholder),
    /// Repeated roll of a table or template: `3*goblin`,
    /// `2*unique*loot >> $haul|silent`
    MultiRoll(MultiRoll),
    /// Aggregate one field across a capture list:
    /// `collect:$foes.@type|unique`
    Collect(Collect),
    /// Named singleton roll, stable within one top-level evaluation:
    /// `tavern#home`
    Instance(Instance),
    /// Re-roll the table whose entry is currently being evaluated:
    /// `again`, `2*unique*again`
    Again(Again),
    /// Standalone conditional chain:
    /// `switch[$g=="male":"he"].switch[$g=="female":"she"].else["they"]`
    Switch(SwitchChain),
    /// Quoted string; inner `{{…}}` fragments interpolate
    Str(Template),
    /// A core expression with an attached `.switch[…]` chain. The base is
    /// evaluated to a scalar which the arms can reference as `$`.
    Switched(Switched),
}

/// Reference to a table (or template) by id
#[derive(Clone, Debug, PartialEq)]
pub struct TableRef {
    pub id: Identifier,
    /// Property chain applied to the produced capture: `.@key`, `.value`, …
    pub path: Vec<Prop>,
}

/// `$name` with an optional join separator for list bindings
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: Identifier,
    pub separator: Option<String>,
}

/// `$name[index].@a.@b` — indexed/deep access into a captured binding
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureAccess {
    pub name: Identifier,
    /// Negative indices count from the end of the list
    pub index: Option<i64>,
    pub path: Vec<Prop>,
    pub separator: Option<String>,
}

/// `@name.…` — resolved against the materialization scope of the
/// currently-rolling entry, falling back to the frame's placeholder registry
#[derive(Clone, Debug, PartialEq)]
pub struct Placeholder {
    pub name: Identifier,
    pub path: Vec<Prop>,
}

/// `N*[unique*]target[ >> $var][|modifier…]`
#[derive(Clone, Debug, PartialEq)]
pub struct MultiRoll {
    pub count: RollCount,
    pub unique: bool,
    pub target: Identifier,
    /// `>> $var` stores the capture list into the frame
    pub capture: Option<Identifier>,
    pub separator: Option<String>,
    pub silent: bool,
}

/// `collect:$var.<accessor>[|unique][|sep]`
#[derive(Clone, Debug, PartialEq)]
pub struct Collect {
    pub variable: Identifier,
    pub accessor: Prop,
    pub unique: bool,
    pub separator: Option<String>,
}

/// `table#name`
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub table: Identifier,
    pub name: Identifier,
}

/// `[N*[unique*]]again[|sep]`
#[derive(Clone, Debug, PartialEq)]
pub struct Again {
    pub count: RollCount,
    pub unique: bool,
    pub separator: Option<String>,
}

/// A core expression with attached switch modifiers
#[derive(Clone, Debug, PartialEq)]
pub struct Switched {
    pub base: Box<Expression>,
    pub chain: SwitchChain,
}

/// The repeat count of a multi-roll or `again`
#[derive(Clone, Debug, PartialEq)]
pub enum RollCount {
    Literal(u32),
    /// `$var` (list length or parsed scalar) or `$var.count`
    Variable { name: Identifier, count: bool },
    /// A dice expression, e.g. `2d4`
    Dice(String),
}

/// One step of a dotted property chain
#[derive(Clone, Debug, PartialEq)]
pub enum Prop {
    /// `@key` (or a bare key that isn't one of the reserved accessors):
    /// dereference into the capture's sets
    Key(String),
    Value,
    Description,
    Count,
}

/// `switch[cond:result]` arms with an optional `else[result]`
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchChain {
    pub arms: Vec<SwitchArm>,
    pub fallback: Option<SwitchResult>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchArm {
    pub condition: Condition,
    pub result: SwitchResult,
}

/// The payload of a switch arm
#[derive(Clone, Debug, PartialEq)]
pub enum SwitchResult {
    /// Quoted string; inner `{{…}}` fragments interpolate
    Text(Template),
    /// `{{…}}`-wrapped or bare expression. Evaluation may yield a capture,
    /// which propagates upward so attached property access keeps working.
    Expression(Box<Expression>),
}

/// Boolean expression over comparands. `&&` binds tighter than `||`; both
/// short-circuit.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Or(Box<Condition>, Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Compare {
        lhs: Comparand,
        op: CompareOp,
        rhs: Comparand,
    },
    /// A bare comparand is truthy iff its text is non-empty
    Truthy(Comparand),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring containment on strings
    Contains,
}

/// A value position within a switch condition
#[derive(Clone, Debug, PartialEq)]
pub enum Comparand {
    /// Quoted string or bare word
    Str(String),
    Number(f64),
    Variable {
        name: Identifier,
        index: Option<i64>,
        path: Vec<Prop>,
    },
    Placeholder {
        name: Identifier,
        path: Vec<Prop>,
    },
    /// The bare `$` symbol: the base scalar of an attached switch
    Subject,
}

/// An identifier usable as a table/template/binding/key name. A valid
/// identifier is any non-empty string that contains only alphanumeric
/// characters, `-`, or `_`. The first character must be a letter or
/// underscore. Hyphens and numbers are not allowed first to avoid ambiguity
/// with number literals.
#[derive(Clone, Debug, Deref, Default, Display, Eq, Hash, PartialEq)]
pub struct Identifier(pub(crate) String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Is the character allowed in an identifier?
    pub(crate) fn is_char_allowed(c: char) -> bool {
        Self::is_char_allowed_first(c) || c.is_numeric() || c == '-'
    }

    /// Is the character allowed as the first character in an identifier?
    pub(crate) fn is_char_allowed_first(c: char) -> bool {
        c.is_alphabetic() || c == '_'
    }
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        identifier.0
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A shortcut for creating identifiers from static strings. Since the string
/// is defined in code we're assuming it's valid.
impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
