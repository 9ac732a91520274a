//! Sets materialization: turning a selected entry into a capture. Each key
//! of the merged `defaultSets`/entry sets is evaluated as a mini-template in
//! the entry's scope, so values can reference `@self` and
//! previously-materialized keys of the same table.

use crate::{
    collection::{Entry, Table, TableId},
    render::{
        CaptureItem, CapturedField, Evaluator, RollError,
        select::{ExclusionSet, Selected},
    },
};
use indexmap::IndexMap;

/// Evaluation scope of the entry currently being rolled: the target of
/// `@self`, intra-set references, and `again`
#[derive(Debug)]
pub(crate) struct EntryScope {
    pub table: TableId,
    /// The entry's unevaluated value string
    pub raw_value: String,
    /// The entry's evaluated description; empty until evaluated
    pub description: String,
    /// Sets materialized so far; grows key by key
    pub sets: IndexMap<String, CapturedField>,
    /// Entries excluded from `again` re-rolls: this entry plus everything
    /// already drawn in the current unique `again` chain
    pub exclude: ExclusionSet,
    /// Keys whose values are being evaluated right now. A reference back to
    /// one of these short-circuits to empty so the outer evaluation still
    /// completes.
    materializing: Vec<String>,
}

impl EntryScope {
    /// Look up a materialized key; in-progress keys resolve to nothing
    pub fn lookup(&self, key: &str) -> Option<&CapturedField> {
        if self.materializing.iter().any(|entry| entry == key) {
            return None;
        }
        self.sets.get(key)
    }
}

impl Evaluator<'_> {
    /// Turn a selected entry into a capture: evaluate its description,
    /// materialize its sets, then evaluate its value, all within the
    /// entry's scope. `chain` carries the exclusions of an enclosing unique
    /// `again` chain.
    pub(crate) fn materialize(
        &mut self,
        selected: Selected<'_>,
        chain: ExclusionSet,
    ) -> Result<CaptureItem, RollError> {
        let table = selected.table;
        let entry = selected.entry;
        let mut exclude = chain;
        exclude.insert(selected.key.clone());
        self.scopes.push(EntryScope {
            table: table.id.clone(),
            raw_value: entry.value.clone(),
            description: String::new(),
            sets: IndexMap::new(),
            exclude,
            materializing: Vec::new(),
        });
        let value = self.fill_scope(table, entry);
        let scope = self.scopes.pop().expect("entry scope missing");
        let item = CaptureItem {
            value: value?,
            raw_value: scope.raw_value,
            description: scope.description,
            source: table.id.clone(),
            sets: scope.sets,
            is_template: false,
        };
        // Record the sets so `@tableId.key` resolves for the rest of the
        // invocation
        self.frame
            .register_placeholders(table.id.clone(), item.sets.clone());
        Ok(item)
    }

    fn fill_scope(
        &mut self,
        table: &Table,
        entry: &Entry,
    ) -> Result<String, RollError> {
        // Description first, so `@self.description` is visible while the
        // sets materialize
        if !entry.description.is_empty() {
            let description = self.eval_template(&entry.description)?.text;
            self.scope_mut().description = description;
        }
        for (key, source) in merge_sets(table, entry) {
            self.scope_mut().materializing.push(key.clone());
            let evaluated = self.eval_template(&source);
            self.scope_mut().materializing.pop();
            let evaluated = evaluated?;
            // A value that was a single capturing expression keeps its
            // structure; anything else flattens to text
            let field = match evaluated.item {
                Some(item) => CapturedField::Item(item),
                None => CapturedField::Text(evaluated.text),
            };
            self.scope_mut().sets.insert(key, field);
        }
        self.eval_template(&entry.value).map(|evaluated| evaluated.text)
    }

    fn scope_mut(&mut self) -> &mut EntryScope {
        self.scopes.last_mut().expect("no active entry scope")
    }
}

/// The effective sets of an entry: every `defaultSets` key (entry values
/// shadowing the defaults), then entry-only keys, in insertion order
fn merge_sets(table: &Table, entry: &Entry) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = table
        .default_sets
        .iter()
        .map(|(key, default)| {
            let value = entry.sets.get(key).unwrap_or(default);
            (key.clone(), value.clone())
        })
        .collect();
    merged.extend(
        entry
            .sets
            .iter()
            .filter(|(key, _)| !table.default_sets.contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    merged
}
