//! Template evaluation: the recursive walker that turns parsed expressions
//! into text and captures, together with the state evaluation reads and
//! mutates — the capture frame, the entry-scope stack, and the recursion
//! counter. Selection, sets materialization, and the dice/math resolvers
//! live in submodules; the document and parse cache are shared and
//! immutable.

mod capture;
mod dice;
mod error;
mod math;
mod select;
mod sets;
#[cfg(test)]
mod tests;

pub use capture::{Binding, CaptureItem, CaptureList, CapturedField, Frame};
pub use error::RollError;

use crate::{
    collection::{Document, Table, TableId, TemplateDef},
    engine::{EngineConfig, TemplateCache},
    random::Sampler,
    render::{select::ExclusionSet, sets::EntryScope},
};
use grimoire_template::{
    Again, CaptureAccess, Chunk, Collect, Comparand, CompareOp, Condition,
    Expression, Instance, MultiRoll, Prop, RollCount, SwitchChain,
    SwitchResult, Switched, TableRef, Template, Variable,
};
use itertools::Itertools;
use std::mem;
use tracing::trace;

/// The outcome of evaluating a template string or a single expression: the
/// text it produced and, when the evaluation was a single capturing
/// expression, the capture itself. Callers use the capture to store
/// structure into a frame binding or a sets field instead of flat text.
#[derive(Clone, Debug, Default)]
pub(crate) struct Evaluated {
    pub text: String,
    pub item: Option<CaptureItem>,
}

impl Evaluated {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            item: None,
        }
    }

    fn empty() -> Self {
        Self::default()
    }
}

/// The tree walker for one top-level roll
pub(crate) struct Evaluator<'a> {
    document: &'a Document,
    config: &'a EngineConfig,
    cache: &'a TemplateCache,
    sampler: &'a mut dyn Sampler,
    frame: Frame,
    scopes: Vec<EntryScope>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        document: &'a Document,
        config: &'a EngineConfig,
        cache: &'a TemplateCache,
        sampler: &'a mut dyn Sampler,
    ) -> Self {
        Self {
            document,
            config,
            cache,
            sampler,
            frame: Frame::seeded(&document.variables),
            scopes: Vec::new(),
            depth: 0,
        }
    }

    /// Roll a table once: select an entry and materialize it
    pub fn roll_table(
        &mut self,
        table: &Table,
    ) -> Result<CaptureItem, RollError> {
        let selected = select::select(
            self.document,
            table,
            &mut *self.sampler,
            &ExclusionSet::new(),
        )?
        .ok_or_else(|| RollError::EmptyTable(table.id.clone()))?;
        self.materialize(selected, ExclusionSet::new())
    }

    /// Run a template: a fresh frame, the shared bindings in declaration
    /// order, then the pattern. The recursion counter spans invocations so
    /// documents can't loop through templates.
    pub fn run_template(
        &mut self,
        template: &TemplateDef,
    ) -> Result<CaptureItem, RollError> {
        trace!(template = %template.id, "Running template");
        let parent_frame = mem::replace(
            &mut self.frame,
            Frame::seeded(&self.document.variables),
        );
        let parent_scopes = mem::take(&mut self.scopes);
        let result = self.run_template_inner(template);
        self.frame = parent_frame;
        self.scopes = parent_scopes;
        result
    }

    fn run_template_inner(
        &mut self,
        template: &TemplateDef,
    ) -> Result<CaptureItem, RollError> {
        for (name, source) in &template.shared {
            let prior = self.frame.get(name).cloned();
            let evaluated = self.eval_template(source)?;
            match evaluated.item {
                Some(item) => self.frame.set(name, Binding::Item(item)),
                // A capture-into may have written this binding during the
                // evaluation; keep the list in that case
                None if self.frame.get(name) == prior.as_ref() => {
                    self.frame.set(name, Binding::Scalar(evaluated.text));
                }
                None => {}
            }
        }
        let value = self.eval_template(&template.pattern)?.text;
        let sets = template
            .shared
            .keys()
            .filter_map(|name| {
                let field = match self.frame.get(name)? {
                    Binding::Scalar(text) => {
                        CapturedField::Text(text.clone())
                    }
                    Binding::Item(item) => CapturedField::Item(item.clone()),
                    Binding::List(list) => {
                        CapturedField::Text(self.join_list(list, None))
                    }
                };
                Some((name.clone(), field))
            })
            .collect();
        Ok(CaptureItem {
            value,
            raw_value: template.pattern.clone(),
            description: String::new(),
            source: TableId::from(template.id.to_string()),
            sets,
            is_template: true,
        })
    }

    /// Parse (through the cache) and evaluate one template string. Every
    /// nested mini-template evaluation lands here, which is what the
    /// recursion ceiling counts.
    fn eval_template(
        &mut self,
        source: &str,
    ) -> Result<Evaluated, RollError> {
        let template = self.cache.get(source)?;
        self.depth += 1;
        if self.depth > self.config.max_recursion_depth {
            return Err(RollError::RecursionLimit {
                limit: self.config.max_recursion_depth,
                depth: self.depth,
                token: source.to_owned(),
            });
        }
        let result = self.eval_chunks(&template);
        self.depth -= 1;
        result
    }

    fn eval_chunks(
        &mut self,
        template: &Template,
    ) -> Result<Evaluated, RollError> {
        let single = template.as_single_expression().is_some();
        let mut text = String::new();
        let mut item = None;
        for chunk in template.chunks() {
            match chunk {
                Chunk::Raw(raw) => text.push_str(raw),
                Chunk::Expression(expression) => {
                    let evaluated = self.eval_expression(expression)?;
                    text.push_str(&evaluated.text);
                    if single {
                        item = evaluated.item;
                    }
                }
            }
        }
        Ok(Evaluated { text, item })
    }

    fn eval_expression(
        &mut self,
        expression: &Expression,
    ) -> Result<Evaluated, RollError> {
        match expression {
            Expression::TableRef(table_ref) => {
                self.eval_table_ref(table_ref)
            }
            Expression::Dice(body) => Ok(Evaluated::text(
                dice::roll(body, &mut *self.sampler)
                    .map(|total| total.to_string())
                    .unwrap_or_default(),
            )),
            Expression::Math(body) => Ok(self.eval_math(body)),
            Expression::Variable(variable) => {
                Ok(self.eval_variable(variable))
            }
            Expression::CaptureAccess(access) => {
                Ok(self.eval_capture_access(access))
            }
            Expression::Placeholder(placeholder) => Ok(
                self.lookup_placeholder(&placeholder.name, &placeholder.path)
            ),
            Expression::MultiRoll(roll) => self.eval_multi_roll(roll),
            Expression::Collect(collect) => Ok(self.eval_collect(collect)),
            Expression::Instance(instance) => self.eval_instance(instance),
            Expression::Again(again) => self.eval_again(again),
            Expression::Switch(chain) => self.eval_switch(chain, None),
            Expression::Str(template) => self.eval_chunks(template),
            Expression::Switched(switched) => self.eval_switched(switched),
        }
    }

    /// Roll a table (or run a template) and walk the attached property
    /// chain against the capture
    fn eval_table_ref(
        &mut self,
        table_ref: &TableRef,
    ) -> Result<Evaluated, RollError> {
        let (item, path) =
            self.resolve_roll(&table_ref.id, &table_ref.path)?;
        Ok(walk_item(&item, path))
    }

    /// Resolve an id to a rolled capture. Template ids dispatch to the
    /// template runner; a dotted head like `ns.goblin` falls back to the
    /// joined id when the head alone doesn't resolve.
    fn resolve_roll<'p>(
        &mut self,
        id: &str,
        path: &'p [Prop],
    ) -> Result<(CaptureItem, &'p [Prop]), RollError> {
        let document = self.document;
        if let Some(template) = document.template(id) {
            return Ok((self.run_template(template)?, path));
        }
        if let Some(table) = document.table(id) {
            return Ok((self.roll_table(table)?, path));
        }
        if let [Prop::Key(first), rest @ ..] = path {
            let dotted = format!("{id}.{first}");
            if let Some(template) = document.template(&dotted) {
                return Ok((self.run_template(template)?, rest));
            }
            if let Some(table) = document.table(&dotted) {
                return Ok((self.roll_table(table)?, rest));
            }
        }
        Err(RollError::UnknownTable(id.to_owned().into()))
    }

    fn eval_variable(&self, variable: &Variable) -> Evaluated {
        self.lookup_binding(
            &variable.name,
            None,
            &[],
            variable.separator.as_deref(),
        )
    }

    fn eval_capture_access(&self, access: &CaptureAccess) -> Evaluated {
        self.lookup_binding(
            &access.name,
            access.index,
            &access.path,
            access.separator.as_deref(),
        )
    }

    /// Resolve a frame binding with optional index and property chain. All
    /// failures here are recoverable and resolve to empty.
    fn lookup_binding(
        &self,
        name: &str,
        index: Option<i64>,
        path: &[Prop],
        separator: Option<&str>,
    ) -> Evaluated {
        let Some(binding) = self.frame.get(name) else {
            return Evaluated::empty();
        };
        if let Some(index) = index {
            let item = match binding {
                Binding::List(list) => index_list(&list.0, index),
                Binding::Item(item) => {
                    index_list(std::slice::from_ref(item), index)
                }
                Binding::Scalar(_) => None,
            };
            return item
                .map(|item| walk_item(item, path))
                .unwrap_or_default();
        }
        match binding {
            Binding::Scalar(text) => match path {
                [] | [Prop::Value] => Evaluated::text(text.clone()),
                _ => Evaluated::empty(),
            },
            Binding::Item(item) => walk_item(item, path),
            Binding::List(list) => match path {
                [] => Evaluated::text(self.join_list(list, separator)),
                [Prop::Count] => {
                    Evaluated::text(list.len().to_string())
                }
                _ => Evaluated::empty(),
            },
        }
    }

    /// Resolve a `@name` reference. Placeholders consult a stack of scopes
    /// attached to the currently-materializing entry, then the frame's
    /// placeholder registry; variables consult the frame (see
    /// [Self::lookup_binding]).
    fn lookup_placeholder(&self, name: &str, path: &[Prop]) -> Evaluated {
        // `@self` resolves against the entry currently being evaluated
        if name == "self" {
            let Some(scope) = self.scopes.last() else {
                return Evaluated::empty();
            };
            return match path {
                [] | [Prop::Value] => {
                    Evaluated::text(scope.raw_value.clone())
                }
                [Prop::Description] => {
                    Evaluated::text(scope.description.clone())
                }
                [Prop::Key(key), rest @ ..] => scope
                    .lookup(key)
                    .map(|field| walk_field(field, rest))
                    .unwrap_or_default(),
                _ => Evaluated::empty(),
            };
        }

        // A bare key of the innermost entry's sets
        if let Some(scope) = self.scopes.last() {
            if let Some(field) = scope.lookup(name) {
                return walk_field(field, path);
            }
        }

        // `@tableId.key`: an in-progress materialization of that table wins
        // over the frame registry, so intra-set references read the partial
        // map. In-progress keys resolve to empty.
        for scope in self.scopes.iter().rev() {
            if &*scope.table == name {
                let [Prop::Key(key), rest @ ..] = path else {
                    return Evaluated::empty();
                };
                return scope
                    .lookup(key)
                    .map(|field| walk_field(field, rest))
                    .unwrap_or_default();
            }
        }
        if let Some(sets) = self.frame.placeholder_sets(name) {
            let [Prop::Key(key), rest @ ..] = path else {
                return Evaluated::empty();
            };
            return sets
                .get(key)
                .map(|field| walk_field(field, rest))
                .unwrap_or_default();
        }
        Evaluated::empty()
    }

    fn eval_math(&mut self, body: &str) -> Evaluated {
        let result = math::evaluate(body, |reference| {
            let path: Vec<Prop> = reference
                .path
                .iter()
                .map(|segment| match segment.as_str() {
                    "value" => Prop::Value,
                    "description" => Prop::Description,
                    "count" => Prop::Count,
                    key => Prop::Key(key.to_owned()),
                })
                .collect();
            let evaluated = if reference.placeholder {
                self.lookup_placeholder(&reference.name, &path)
            } else {
                self.lookup_binding(&reference.name, None, &path, None)
            };
            Some(evaluated.text)
        });
        Evaluated::text(result.unwrap_or_default())
    }

    /// Draw N entries (or run a template N times), join the texts, and
    /// optionally store the capture list into the frame
    fn eval_multi_roll(
        &mut self,
        roll: &MultiRoll,
    ) -> Result<Evaluated, RollError> {
        let count = self.resolve_count(&roll.count);
        let document = self.document;
        let mut items = Vec::new();
        if let Some(template) = document.template(&roll.target) {
            for _ in 0..count {
                items.push(self.run_template(template)?);
            }
        } else if let Some(table) = document.table(&roll.target) {
            let mut exclude = ExclusionSet::new();
            for _ in 0..count {
                let Some(selected) = select::select(
                    document,
                    table,
                    &mut *self.sampler,
                    &exclude,
                )?
                else {
                    // Unique pool exhausted: stop early with what we have
                    break;
                };
                if roll.unique {
                    exclude.insert(selected.key.clone());
                }
                items.push(self.materialize(selected, ExclusionSet::new())?);
            }
        } else {
            return Err(RollError::UnknownTable(
                roll.target.to_string().into(),
            ));
        }
        let text = if roll.silent {
            String::new()
        } else {
            let separator = roll
                .separator
                .as_deref()
                .unwrap_or(&self.config.default_separator);
            items.iter().map(|item| item.value.as_str()).join(separator)
        };
        if let Some(capture) = &roll.capture {
            self.frame.set(capture, Binding::List(CaptureList(items)));
        }
        Ok(Evaluated::text(text))
    }

    fn resolve_count(&mut self, count: &RollCount) -> u32 {
        match count {
            RollCount::Literal(count) => *count,
            RollCount::Variable { name, count } => {
                match self.frame.get(name) {
                    Some(Binding::List(list)) => list.len() as u32,
                    Some(Binding::Scalar(text)) if !count => {
                        text.trim().parse().unwrap_or(0)
                    }
                    Some(Binding::Item(item)) if !count => {
                        item.value.trim().parse().unwrap_or(0)
                    }
                    _ => 0,
                }
            }
            RollCount::Dice(expression) => {
                dice::roll(expression, &mut *self.sampler)
                    .map_or(0, |total| u32::try_from(total).unwrap_or(0))
            }
        }
    }

    /// Extract one field from every item in a capture list, dropping empty
    /// extractions
    fn eval_collect(&self, collect: &Collect) -> Evaluated {
        let Some(binding) = self.frame.get(&collect.variable) else {
            return Evaluated::empty();
        };
        let items: &[CaptureItem] = match binding {
            Binding::List(list) => &list.0,
            Binding::Item(item) => std::slice::from_ref(item),
            Binding::Scalar(_) => return Evaluated::empty(),
        };
        let mut values = items.iter().filter_map(|item| {
            let text = match &collect.accessor {
                Prop::Value => item.value.clone(),
                Prop::Description => item.description.clone(),
                Prop::Count => return None,
                Prop::Key(key) => item
                    .field(key)
                    .map(|field| field.as_text().to_owned())
                    .unwrap_or_default(),
            };
            (!text.is_empty()).then_some(text)
        });
        let separator = collect
            .separator
            .as_deref()
            .unwrap_or(&self.config.default_separator);
        let text = if collect.unique {
            values.unique().join(separator)
        } else {
            values.join(separator)
        };
        Evaluated::text(text)
    }

    /// A scoped singleton: the first reference rolls, later references in
    /// the same frame return the same capture
    fn eval_instance(
        &mut self,
        instance: &Instance,
    ) -> Result<Evaluated, RollError> {
        let key = (
            TableId::from(instance.table.to_string()),
            instance.name.to_string(),
        );
        if let Some(item) = self.frame.instance(&key) {
            return Ok(Evaluated {
                text: item.value.clone(),
                item: Some(item.clone()),
            });
        }
        let (item, _) = self.resolve_roll(&instance.table, &[])?;
        self.frame.set_instance(key, item.clone());
        Ok(Evaluated {
            text: item.value.clone(),
            item: Some(item),
        })
    }

    /// Re-roll the table whose entry is currently being evaluated. Unique
    /// mode excludes everything already drawn in this chain.
    fn eval_again(&mut self, again: &Again) -> Result<Evaluated, RollError> {
        let Some(scope) = self.scopes.last() else {
            return Err(RollError::InvalidAgainContext);
        };
        let table_id = scope.table.clone();
        let base_exclude = if again.unique {
            scope.exclude.clone()
        } else {
            ExclusionSet::new()
        };
        let document = self.document;
        let table = document
            .table(&table_id)
            .ok_or_else(|| RollError::UnknownTable(table_id.clone()))?;
        let count = self.resolve_count(&again.count);
        let mut exclude = base_exclude;
        let mut values = Vec::new();
        for _ in 0..count {
            let Some(selected) = select::select(
                document,
                table,
                &mut *self.sampler,
                &exclude,
            )?
            else {
                break;
            };
            if again.unique {
                exclude.insert(selected.key.clone());
            }
            let chain = if again.unique {
                exclude.clone()
            } else {
                ExclusionSet::new()
            };
            values.push(self.materialize(selected, chain)?.value);
        }
        let separator = again
            .separator
            .as_deref()
            .unwrap_or(&self.config.default_separator);
        Ok(Evaluated::text(values.join(separator)))
    }

    /// Evaluate a switch chain. `subject` is the base scalar of an attached
    /// switch, referenced as `$` in conditions; with no matching arm and no
    /// `else`, an attached switch passes it through unchanged.
    fn eval_switch(
        &mut self,
        chain: &SwitchChain,
        subject: Option<&Evaluated>,
    ) -> Result<Evaluated, RollError> {
        for arm in &chain.arms {
            if self.eval_condition(&arm.condition, subject) {
                return self.eval_switch_result(&arm.result);
            }
        }
        if let Some(fallback) = &chain.fallback {
            return self.eval_switch_result(fallback);
        }
        Ok(subject.cloned().unwrap_or_default())
    }

    fn eval_switch_result(
        &mut self,
        result: &SwitchResult,
    ) -> Result<Evaluated, RollError> {
        match result {
            SwitchResult::Text(template) => self.eval_chunks(template),
            SwitchResult::Expression(expression) => {
                self.eval_expression(expression)
            }
        }
    }

    fn eval_switched(
        &mut self,
        switched: &Switched,
    ) -> Result<Evaluated, RollError> {
        let base = self.eval_expression(&switched.base)?;
        self.eval_switch(&switched.chain, Some(&base))
    }

    fn eval_condition(
        &self,
        condition: &Condition,
        subject: Option<&Evaluated>,
    ) -> bool {
        match condition {
            Condition::Or(lhs, rhs) => {
                self.eval_condition(lhs, subject)
                    || self.eval_condition(rhs, subject)
            }
            Condition::And(lhs, rhs) => {
                self.eval_condition(lhs, subject)
                    && self.eval_condition(rhs, subject)
            }
            Condition::Compare { lhs, op, rhs } => {
                let lhs = self.comparand_text(lhs, subject);
                let rhs = self.comparand_text(rhs, subject);
                compare(&lhs, *op, &rhs)
            }
            Condition::Truthy(comparand) => {
                !self.comparand_text(comparand, subject).is_empty()
            }
        }
    }

    fn comparand_text(
        &self,
        comparand: &Comparand,
        subject: Option<&Evaluated>,
    ) -> String {
        match comparand {
            Comparand::Str(text) => text.clone(),
            Comparand::Number(number) => math::format_number(*number),
            Comparand::Variable { name, index, path } => {
                self.lookup_binding(name, *index, path, None).text
            }
            Comparand::Placeholder { name, path } => {
                self.lookup_placeholder(name, path).text
            }
            Comparand::Subject => subject
                .map(|evaluated| evaluated.text.clone())
                .unwrap_or_default(),
        }
    }

    fn join_list(
        &self,
        list: &CaptureList,
        separator: Option<&str>,
    ) -> String {
        let separator =
            separator.unwrap_or(&self.config.default_separator);
        list.iter().map(|item| item.value.as_str()).join(separator)
    }
}

/// Coercion rules for conditions: equality and containment compare as
/// strings; ordering requires both sides to parse as numbers, else false
fn compare(lhs: &str, op: CompareOp, rhs: &str) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Contains => lhs.contains(rhs),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let (Ok(lhs), Ok(rhs)) =
                (lhs.trim().parse::<f64>(), rhs.trim().parse::<f64>())
            else {
                return false;
            };
            match op {
                CompareOp::Lt => lhs < rhs,
                CompareOp::Le => lhs <= rhs,
                CompareOp::Gt => lhs > rhs,
                _ => lhs >= rhs,
            }
        }
    }
}

/// Walk a property chain against a capture. Each `@key` step dereferences
/// into the item's sets; a chain that steps past flat text, or a lookup
/// that misses, resolves to empty. A chain ending on a nested capture keeps
/// it, so further access can continue upstream.
fn walk_item(item: &CaptureItem, path: &[Prop]) -> Evaluated {
    let mut current = item;
    for (position, prop) in path.iter().enumerate() {
        let last = position == path.len() - 1;
        match prop {
            Prop::Value if last => {
                return Evaluated::text(current.value.clone());
            }
            Prop::Description if last => {
                return Evaluated::text(current.description.clone());
            }
            Prop::Key(key) => match current.field(key) {
                Some(CapturedField::Item(nested)) => current = nested,
                Some(CapturedField::Text(text)) if last => {
                    return Evaluated::text(text.clone());
                }
                _ => return Evaluated::empty(),
            },
            _ => return Evaluated::empty(),
        }
    }
    Evaluated {
        text: current.value.clone(),
        item: Some(current.clone()),
    }
}

fn walk_field(field: &CapturedField, path: &[Prop]) -> Evaluated {
    match field {
        CapturedField::Text(text) => {
            if path.is_empty() {
                Evaluated::text(text.clone())
            } else {
                Evaluated::empty()
            }
        }
        CapturedField::Item(item) => walk_item(item, path),
    }
}

/// Select the item at `index`, with negative indices counting from the end
fn index_list(items: &[CaptureItem], index: i64) -> Option<&CaptureItem> {
    let index = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    usize::try_from(index).ok().and_then(|index| items.get(index))
}
