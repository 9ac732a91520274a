//! Captured rolls and the per-invocation binding frame

use crate::collection::TableId;
use derive_more::Deref;
use indexmap::IndexMap;

/// Runtime record of a rolled entry (or template invocation). Captures are
/// structured — a captured roll remembers its materialized sets, which may
/// themselves contain further captures — so chained property access like
/// `$x.@a.@b` can dereference through them. Captures live only inside one
/// top-level roll.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureItem {
    /// The text the roll produced, after full expression expansion of the
    /// entry's value
    pub value: String,
    /// The entry's unevaluated value string (`@self.value`)
    pub raw_value: String,
    /// The entry's evaluated description, or empty
    pub description: String,
    /// Id of the table that produced this item. For template invocations
    /// this is the template id.
    pub source: TableId,
    /// Materialized sets, in `defaultSets`-then-entry order
    pub sets: IndexMap<String, CapturedField>,
    /// Set when the item originated from a template invocation; `sets` then
    /// mirrors the template's shared bindings
    pub is_template: bool,
}

impl CaptureItem {
    pub fn field(&self, key: &str) -> Option<&CapturedField> {
        self.sets.get(key)
    }
}

/// One materialized sets value: flat text, or a nested capture when the
/// value was produced by a single capturing expression (a table roll, a
/// wrapped switch yielding a table, or a template reference)
#[derive(Clone, Debug, PartialEq)]
pub enum CapturedField {
    Text(String),
    Item(CaptureItem),
}

impl CapturedField {
    /// Flatten to text; nested captures collapse to their value
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Item(item) => &item.value,
        }
    }
}

/// Ordered list of captures produced by a multi-roll, with an observable
/// count
#[derive(Clone, Debug, Default, Deref, PartialEq)]
pub struct CaptureList(pub Vec<CaptureItem>);

/// One frame binding
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Scalar(String),
    Item(CaptureItem),
    List(CaptureList),
}

/// Per-invocation binding environment. Each top-level roll and each template
/// invocation owns a fresh frame, which is what makes `{{4*npcTemplate}}`
/// yield four independent draws. Destroyed when the roll returns.
#[derive(Debug, Default)]
pub struct Frame {
    bindings: IndexMap<String, Binding>,
    /// Sets of every table materialized during this invocation, for
    /// `@tableId.key` lookups outside any entry scope
    placeholders: IndexMap<TableId, IndexMap<String, CapturedField>>,
    /// `table#name` singletons, stable for the lifetime of the frame
    instances: IndexMap<(TableId, String), CaptureItem>,
}

impl Frame {
    /// A frame seeded with the document's variables as scalar defaults
    pub fn seeded(variables: &IndexMap<String, String>) -> Self {
        Self {
            bindings: variables
                .iter()
                .map(|(name, value)| {
                    (name.clone(), Binding::Scalar(value.clone()))
                })
                .collect(),
            placeholders: IndexMap::new(),
            instances: IndexMap::new(),
        }
    }

    /// Look up a binding. Authors may or may not write the leading `$`;
    /// lookup normalizes it away.
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(normalize(name))
    }

    pub fn set(&mut self, name: &str, binding: Binding) {
        self.bindings
            .insert(normalize(name).to_owned(), binding);
    }

    /// Does this binding hold a capture list?
    pub fn has_list(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Binding::List(_)))
    }

    /// A copy of the current bindings, e.g. for debugging a roll
    pub fn snapshot(&self) -> IndexMap<String, Binding> {
        self.bindings.clone()
    }

    pub(crate) fn register_placeholders(
        &mut self,
        table: TableId,
        sets: IndexMap<String, CapturedField>,
    ) {
        self.placeholders.insert(table, sets);
    }

    pub(crate) fn placeholder_sets(
        &self,
        table: &str,
    ) -> Option<&IndexMap<String, CapturedField>> {
        self.placeholders.get(table)
    }

    pub(crate) fn instance(
        &self,
        key: &(TableId, String),
    ) -> Option<&CaptureItem> {
        self.instances.get(key)
    }

    pub(crate) fn set_instance(
        &mut self,
        key: (TableId, String),
        item: CaptureItem,
    ) {
        self.instances.insert(key, item);
    }
}

fn normalize(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn test_dollar_normalization() {
        let mut frame = Frame::default();
        frame.set("$hero", Binding::Scalar("Finn".into()));
        assert_eq!(
            frame.get("hero"),
            Some(&Binding::Scalar("Finn".into()))
        );
        assert_eq!(
            frame.get("$hero"),
            Some(&Binding::Scalar("Finn".into()))
        );
    }

    #[test]
    fn test_seeded_variables() {
        let variables = indexmap! {
            "hero".to_owned() => "Finn".to_owned(),
        };
        let frame = Frame::seeded(&variables);
        assert_eq!(
            frame.get("hero"),
            Some(&Binding::Scalar("Finn".into()))
        );
        assert!(frame.get("villain").is_none());
    }

    #[test]
    fn test_has_list() {
        let mut frame = Frame::default();
        frame.set("foes", Binding::List(CaptureList::default()));
        frame.set("hero", Binding::Scalar("Finn".into()));
        assert!(frame.has_list("foes"));
        assert!(!frame.has_list("hero"));
        assert!(!frame.has_list("missing"));
    }

    #[test]
    fn test_snapshot() {
        let mut frame = Frame::default();
        frame.set("hero", Binding::Scalar("Finn".into()));
        let snapshot = frame.snapshot();
        frame.set("hero", Binding::Scalar("Jake".into()));
        assert_eq!(
            snapshot.get("hero"),
            Some(&Binding::Scalar("Finn".into()))
        );
    }
}
