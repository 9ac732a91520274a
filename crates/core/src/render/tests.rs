//! End-to-end evaluation tests, driven through the engine façade

use crate::{
    Engine, EngineConfig,
    collection::Document,
    random::{RngSampler, SequenceSampler},
    test_util::{
        document, entry, entry_with_sets, simple, string_map, template,
        weighted,
    },
};
use grimoire_util::assert_err;
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Load a document into a default-config engine
fn rig(document: Document) -> (Engine, String) {
    rig_with(document, EngineConfig::default())
}

fn rig_with(document: Document, config: EngineConfig) -> (Engine, String) {
    let mut engine = Engine::new(config);
    let collection = engine.load(document);
    (engine, collection)
}

/// Roll with a scripted sampler and return the text
fn roll(engine: &Engine, collection: &str, id: &str, fractions: &[f64]) -> String {
    let mut sampler = SequenceSampler::new(fractions.iter().copied());
    engine
        .roll_with(collection, id, &mut sampler)
        .unwrap_or_else(|error| panic!("roll of `{id}` failed: {error}"))
        .text
}

/// Table references chase through nested tables
#[test]
fn test_deep_table_chain() {
    let (engine, collection) = rig(document(
        [
            simple("level1", [entry("{{level2}}")]),
            simple("level2", [entry("{{level3}}")]),
            simple("level3", [entry("Deep!")]),
        ],
        [],
    ));
    assert_eq!(roll(&engine, &collection, "level1", &[]), "Deep!");
}

/// A self-referential table hits the recursion ceiling instead of looping
#[test]
fn test_recursion_limit() {
    let (engine, collection) = rig_with(
        document(
            [simple("recursive", [entry("{{recursive}} again")])],
            [],
        ),
        EngineConfig {
            max_recursion_depth: 3,
            ..EngineConfig::default()
        },
    );
    let mut sampler = SequenceSampler::new([]);
    assert_err!(
        engine.roll_with(&collection, "recursive", &mut sampler),
        "recursion limit 3"
    );
}

/// Captured multi-rolls support indexed access and chained `@key`
/// dereferencing through nested captures
#[test]
fn test_capture_with_indexed_property() {
    let (engine, collection) = rig(document(
        [
            simple(
                "enemy",
                [entry_with_sets("Orc", [("weapon", "{{orcWeapon}}")])],
            ),
            simple(
                "orcWeapon",
                [entry_with_sets("Axe", [("material", "Iron")])],
            ),
        ],
        [template(
            "encounter",
            "{{1*enemy >> $foes|silent}}Enemy: {{$foes[0]}}, \
            Material: {{$foes[0].@weapon.@material}}",
            [],
        )],
    ));
    assert_eq!(
        roll(&engine, &collection, "encounter", &[]),
        "Enemy: Orc, Material: Iron"
    );
}

/// Property chains work directly on table references too, and a direct
/// table roll lands its materialized sets in the envelope
#[test]
fn test_table_ref_property_chain() {
    let tables = [
        simple(
            "enemy",
            [entry_with_sets("Orc", [("weapon", "{{orcWeapon}}")])],
        ),
        simple(
            "orcWeapon",
            [entry_with_sets("Axe", [("material", "Iron")])],
        ),
    ];

    let (engine, collection) = rig(document(
        tables.clone(),
        [template("chain", "{{enemy.@weapon.@material}}", [])],
    ));
    assert_eq!(roll(&engine, &collection, "chain", &[]), "Iron");

    let (engine, collection) = rig(document(tables, []));
    let mut sampler = SequenceSampler::new([]);
    let outcome = engine
        .roll_with(&collection, "enemy", &mut sampler)
        .unwrap();
    assert_eq!(outcome.text, "Orc");
    assert_eq!(outcome.placeholders["weapon"], "Axe");
}

/// The first truthy switch arm wins; `else` catches the rest
#[test]
fn test_standalone_switch() {
    let (engine, collection) = rig(document(
        [],
        [template(
            "pronoun",
            "{{switch[$gender==\"male\":\"he\"]\
            .switch[$gender==\"female\":\"she\"].else[\"they\"]}}",
            [("gender", "male")],
        )],
    ));
    assert_eq!(roll(&engine, &collection, "pronoun", &[]), "he");
}

/// Sets may reference previously-materialized keys of their own table, and
/// the math resolver reads them through the placeholder scope
#[test]
fn test_intra_set_reference_with_math() {
    let character = simple(
        "character",
        [entry_with_sets(
            "Hero",
            [("level", "5"), ("bonus", "{{math:@character.level * 2}}")],
        )],
    );

    // Rolled directly, the materialized sets land in the envelope
    let (engine, collection) = rig(document([character.clone()], []));
    let mut sampler = SequenceSampler::new([]);
    let outcome = engine
        .roll_with(&collection, "character", &mut sampler)
        .unwrap();
    assert_eq!(outcome.text, "Hero");
    assert_eq!(outcome.placeholders["level"], "5");
    assert_eq!(outcome.placeholders["bonus"], "10");

    // Rolled through a shared binding, the sets stay visible to the
    // pattern via `@tableId.key`
    let (engine, collection) = rig(document(
        [character],
        [template(
            "sheet",
            "Level {{@character.level}} with bonus {{@character.bonus}}",
            [("_init", "{{character}}")],
        )],
    ));
    assert_eq!(
        roll(&engine, &collection, "sheet", &[]),
        "Level 5 with bonus 10"
    );
}

/// Collect extracts one field per item, drops empties, and dedupes with
/// `|unique`
#[test]
fn test_collect_unique() {
    let (engine, collection) = rig(document(
        [simple(
            "enemy",
            [
                entry_with_sets("goblin", [("type", "humanoid")]),
                entry_with_sets("orc", [("type", "humanoid")]),
                entry_with_sets("dragon", [("type", "dragon")]),
            ],
        )],
        [template(
            "foes",
            "{{3*unique*enemy >> $foes|silent}}\
            {{collect:$foes.@type|unique}}",
            [],
        )],
    ));
    assert_eq!(
        roll(&engine, &collection, "foes", &[]),
        "humanoid, dragon"
    );
}

/// Collect drops items whose extracted field is empty
#[test]
fn test_collect_drops_empty() {
    let (engine, collection) = rig(document(
        [simple(
            "loot",
            [
                entry_with_sets("sword", [("rune", "sharpness")]),
                entry("rock"),
            ],
        )],
        [template(
            "runes",
            "{{2*unique*loot >> $haul|silent}}{{collect:$haul.@rune}}",
            [],
        )],
    ));
    assert_eq!(roll(&engine, &collection, "runes", &[]), "sharpness");
}

/// Fixed sampler stream in, fixed text out
#[test]
fn test_determinism_given_rng() {
    let doc = document(
        [simple(
            "enemy",
            [
                weighted("goblin", 1.0),
                weighted("orc", 2.0),
                weighted("troll", 0.5),
            ],
        )],
        [template("horde", "{{3*enemy}} rolling {{dice:2d6}}", [])],
    );
    let (engine, collection) = rig(doc);
    let mut first = RngSampler::seeded(42);
    let mut second = RngSampler::seeded(42);
    assert_eq!(
        engine
            .roll_with(&collection, "horde", &mut first)
            .unwrap()
            .text,
        engine
            .roll_with(&collection, "horde", &mut second)
            .unwrap()
            .text,
    );
}

/// A set key referencing itself terminates and resolves to empty
#[test]
fn test_set_key_cycle() {
    let (engine, collection) = rig(document(
        [simple(
            "ouro",
            [entry_with_sets("O", [("k", "{{@ouro.k}}")])],
        )],
        [],
    ));
    let mut sampler = SequenceSampler::new([]);
    let outcome =
        engine.roll_with(&collection, "ouro", &mut sampler).unwrap();
    assert_eq!(outcome.text, "O");
    assert_eq!(outcome.placeholders["k"], "");
}

/// Missing variables, out-of-range indices, unknown placeholders, and
/// missing keys all resolve to empty strings instead of erroring
#[test]
fn test_recoverable_lookups() {
    let (engine, collection) = rig(document(
        [simple("enemy", [entry("Orc")])],
        [template(
            "gaps",
            "[{{$missing}}][{{$x[99]}}][{{@nope.key}}][{{$x.@nokey}}]",
            [("x", "{{enemy}}")],
        )],
    ));
    assert_eq!(roll(&engine, &collection, "gaps", &[]), "[][][][]");
}

/// Each template invocation of a multi-roll gets its own frame: shared
/// bindings are evaluated once per invocation and don't leak across
#[test]
fn test_shared_binding_isolation() {
    let (engine, collection) = rig(document(
        [simple("pair", [entry("A"), entry("B")])],
        [
            template("twice", "{{$x}}{{$x}}", [("x", "{{pair}}")]),
            template("party", "{{2*twice}}", []),
        ],
    ));
    // One draw per invocation; the second invocation draws differently
    assert_eq!(
        roll(&engine, &collection, "party", &[0.0, 0.9]),
        "AA, BB"
    );
}

/// `table#name` rolls once per frame and replays the same capture
#[test]
fn test_instance_singleton() {
    let (engine, collection) = rig(document(
        [simple("spot", [entry("A"), entry("B")])],
        [template("visits", "{{spot#here}} and {{spot#here}}", [])],
    ));
    assert_eq!(
        roll(&engine, &collection, "visits", &[0.0, 0.9]),
        "A and A"
    );
}

/// `again` re-rolls the enclosing table; unique mode excludes everything
/// already drawn in the chain
#[test]
fn test_again_unique_chain() {
    let (engine, collection) = rig(document(
        [simple(
            "chain",
            [
                entry("a{{2*unique*again|\"\"}}"),
                entry("b"),
                entry("c"),
            ],
        )],
        [],
    ));
    assert_eq!(roll(&engine, &collection, "chain", &[]), "abc");
}

/// `again` outside a table entry is a document error
#[test]
fn test_again_outside_entry() {
    let (engine, collection) = rig(document(
        [],
        [template("bad", "{{again}}", [])],
    ));
    let mut sampler = SequenceSampler::new([]);
    assert_err!(
        engine.roll_with(&collection, "bad", &mut sampler),
        "`again` is only valid inside a table entry"
    );
}

/// Attached switches map the base scalar; with no match and no else, the
/// scalar passes through unchanged
#[rstest]
#[case::matched("{{metal.switch[$==\"gold\":\"shiny\"]}}", "shiny")]
#[case::pass_through("{{metal.switch[$==\"iron\":\"rusty\"]}}", "gold")]
#[case::fallback(
    "{{metal.switch[$==\"iron\":\"rusty\"].else[\"dull\"]}}",
    "dull"
)]
fn test_attached_switch(#[case] pattern: &str, #[case] expected: &str) {
    let (engine, collection) = rig(document(
        [simple("metal", [entry("gold")])],
        [template("vibe", pattern, [])],
    ));
    assert_eq!(roll(&engine, &collection, "vibe", &[]), expected);
}

/// A `{{table}}`-wrapped switch result produces a capture, so the stored
/// binding supports property access
#[test]
fn test_wrapped_switch_result_captures() {
    let (engine, collection) = rig(document(
        [
            simple(
                "dogNames",
                [entry_with_sets("Rex", [("sound", "woof")])],
            ),
            simple(
                "catNames",
                [entry_with_sets("Tom", [("sound", "meow")])],
            ),
        ],
        [template(
            "pet",
            "{{$pet.value}} says {{$pet.@sound}}",
            [
                ("kind", "dog"),
                (
                    "pet",
                    "{{switch[$kind==\"dog\":{{dogNames}}]\
                    .else[{{catNames}}]}}",
                ),
            ],
        )],
    ));
    assert_eq!(roll(&engine, &collection, "pet", &[]), "Rex says woof");
}

/// A unique multi-roll over an exhausted pool stops early with what it has
#[test]
fn test_unique_pool_exhausted() {
    let (engine, collection) = rig(document(
        [simple("duo", [entry("A"), entry("B")])],
        [template("many", "{{5*unique*duo}}", [])],
    ));
    assert_eq!(roll(&engine, &collection, "many", &[]), "A, B");
}

/// Dice and math resolvers plug into evaluation
#[rstest]
#[case::dice("{{dice:2d6+1}}", &[0.0, 0.99][..], "8")]
#[case::math_with_variable("{{math:$bonus * 3}}", &[][..], "6")]
#[case::math_malformed("{{math:bogus words}}", &[][..], "")]
#[case::dice_malformed("{{dice:banana}}", &[][..], "")]
fn test_resolvers(
    #[case] pattern: &str,
    #[case] fractions: &[f64],
    #[case] expected: &str,
) {
    let mut doc = document([], [template("t", pattern, [])]);
    doc.variables = string_map([("bonus", "2")]);
    let (engine, collection) = rig(doc);
    assert_eq!(roll(&engine, &collection, "t", fractions), expected);
}

/// Document variables seed every frame; shared bindings shadow them within
/// their invocation
#[test]
fn test_variables_and_shadowing() {
    let mut doc = document(
        [],
        [
            template("plain", "{{$hero}}", []),
            template("shadowed", "{{$hero}}", [("hero", "Override")]),
        ],
    );
    doc.variables = string_map([("hero", "Default")]);
    let (engine, collection) = rig(doc);
    assert_eq!(roll(&engine, &collection, "plain", &[]), "Default");
    assert_eq!(roll(&engine, &collection, "shadowed", &[]), "Override");
}

/// `@self` exposes the raw entry value and the evaluated description to
/// sets materialization
#[test]
fn test_self_placeholder() {
    let mut table = simple(
        "beast",
        [crate::collection::Entry {
            description: "A {{@self.value}} of the woods".to_owned(),
            ..entry_with_sets("Wolf", [("about", "{{@self.description}}")])
        }],
    );
    table.name = "Beast".to_owned();
    let (engine, collection) = rig(document([table], []));
    let mut sampler = SequenceSampler::new([]);
    let outcome =
        engine.roll_with(&collection, "beast", &mut sampler).unwrap();
    assert_eq!(outcome.text, "Wolf");
    assert_eq!(outcome.placeholders["about"], "A Wolf of the woods");
}

/// A capture-into inside a shared binding keeps the list under the shared
/// name, and `.count` reads its length
#[test]
fn test_capture_count() {
    let (engine, collection) = rig(document(
        [simple("enemy", [entry("Orc")])],
        [template(
            "war",
            "{{$foes.count}} foes, last {{$foes[-1]}}",
            [("foes", "{{2*enemy >> $foes|silent}}")],
        )],
    ));
    assert_eq!(
        roll(&engine, &collection, "war", &[]),
        "2 foes, last Orc"
    );
}

/// Multi-rolls can target templates; each invocation is independent
#[test]
fn test_multi_roll_of_template() {
    let (engine, collection) = rig(document(
        [simple("name", [entry("Ash"), entry("Birch")])],
        [
            template("npc", "{{name}} the bold", []),
            template("crowd", "{{2*npc|\" & \"}}", []),
        ],
    ));
    assert_eq!(
        roll(&engine, &collection, "crowd", &[0.0, 0.9]),
        "Ash the bold & Birch the bold"
    );
}

/// Rolling an id that's neither a table nor a template fails, as does
/// `roll_template` on a table id
#[test]
fn test_unknown_ids() {
    let (engine, collection) =
        rig(document([simple("enemy", [entry("Orc")])], []));
    let mut sampler = SequenceSampler::new([]);
    assert_err!(
        engine.roll_with(&collection, "nope", &mut sampler),
        "unknown table `nope`"
    );
    assert_err!(
        engine.roll_template(&collection, "enemy", &mut sampler),
        "unknown template `enemy`"
    );
    assert_err!(
        engine.roll_with("ghost", "enemy", &mut sampler),
        "unknown collection `ghost`"
    );
}

/// A parse error anywhere in a rolled template aborts the roll
#[test]
fn test_parse_error_propagates() {
    let (engine, collection) = rig(document(
        [simple("broken", [entry("{{")])],
        [],
    ));
    let mut sampler = SequenceSampler::new([]);
    assert_err!(
        engine.roll_with(&collection, "broken", &mut sampler),
        "expression"
    );
}

/// Escaped braces pass through as literal text, unparsed
#[test]
fn test_escaped_braces() {
    let (engine, collection) = rig(document(
        [simple("doc", [entry(r"literal \{{$braces}} here")])],
        [],
    ));
    assert_eq!(
        roll(&engine, &collection, "doc", &[]),
        "literal {{$braces}} here"
    );
}
