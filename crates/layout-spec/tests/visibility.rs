use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use layout_spec::{
    DataSources, EngineConfig, EngineError, InteractionEvent, LayoutEngine, LayoutSet,
    ValidationCategory, ValidationMask,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "repeating_group" => include_str!("../tests/fixtures/repeating_group.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn engine(config: EngineConfig) -> LayoutEngine {
    let layout = LayoutSet::from_json_str(fixture("repeating_group")).expect("deserialize");
    LayoutEngine::new(&layout, config).expect("compile")
}

fn rows(count: usize) -> HashMap<String, usize> {
    HashMap::from([("Group".to_string(), count)])
}

fn data() -> DataSources {
    DataSources::default().with_data_model("model", json!({ "Owner": "Ada" }))
}

fn name_initial() -> ValidationMask {
    ValidationMask::REQUIRED | ValidationMask::SCHEMA | ValidationMask::BACKEND
}

#[test]
fn new_nodes_start_with_their_initial_mask() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(1));
    assert_eq!(engine.visibility_for("Name-0", None), Ok(name_initial()));
    assert_eq!(
        engine.visibility_for("Intro", None),
        Ok(ValidationMask::SCHEMA | ValidationMask::BACKEND)
    );
}

#[test]
fn configured_default_categories_apply_without_show_validations() {
    let config = EngineConfig {
        default_show_validations: vec![ValidationCategory::Component],
        ..EngineConfig::default()
    };
    let mut engine = engine(config);
    engine.generate(&data(), &rows(1));
    assert_eq!(
        engine.visibility_for("Intro", None),
        Ok(ValidationMask::COMPONENT | ValidationMask::BACKEND)
    );
    assert_eq!(engine.visibility_for("Name-0", None), Ok(name_initial()));
}

#[test]
fn setting_zero_keeps_the_initial_bits() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(1));
    engine
        .handle_event(&InteractionEvent::Reveal {
            node: "Name-0".into(),
            mask: ValidationMask::ALL,
            row: None,
        })
        .expect("reveal");
    engine
        .handle_event(&InteractionEvent::Reveal {
            node: "Name-0".into(),
            mask: ValidationMask::NONE,
            row: None,
        })
        .expect("reset");
    assert_eq!(engine.visibility_for("Name-0", None), Ok(name_initial()));
}

#[test]
fn blur_reveals_everything_but_required() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(1));
    engine
        .handle_event(&InteractionEvent::Blur {
            node: "Intro".into(),
        })
        .expect("blur");
    let mask = engine.visibility_for("Intro", None).expect("intro");
    assert!(mask.contains(ValidationMask::ALL_EXCEPT_REQUIRED));
    assert!(!mask.contains(ValidationMask::REQUIRED));

    assert_eq!(
        engine.handle_event(&InteractionEvent::Blur {
            node: "Nowhere".into(),
        }),
        Err(EngineError::UnknownNode("Nowhere".into()))
    );
}

#[test]
fn row_masks_can_be_set_individually() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(2));
    let event: InteractionEvent =
        serde_json::from_value(json!({ "type": "reveal", "node": "Group", "mask": 31, "row": 1 }))
            .expect("deserialize");
    engine.handle_event(&event).expect("reveal row");

    let row = engine.visibility_for("Group", Some(1)).expect("row 1");
    assert!(row.contains(ValidationMask::ALL));
    let other = engine.visibility_for("Group", Some(0)).expect("row 0");
    assert!(!other.contains(ValidationMask::REQUIRED));
}

#[test]
fn removing_the_last_row_clears_the_row_list_and_re_adding_starts_fresh() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(1));
    engine
        .handle_event(&InteractionEvent::Submit)
        .expect("submit");
    assert!(
        engine
            .visibility_for("Name-0", None)
            .expect("name")
            .contains(ValidationMask::ALL)
    );

    engine.generate(&data(), &rows(0));
    let visibility = engine.visibility();
    let group = &visibility.root().children["people"].children["Group"];
    assert!(group.items.is_empty());

    engine.generate(&data(), &rows(1));
    assert_eq!(engine.visibility_for("Name-0", None), Ok(name_initial()));
}

#[test]
fn deleting_a_row_moves_masks_with_their_rows() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(3));
    for node in ["Name-1", "Name-2"] {
        engine
            .handle_event(&InteractionEvent::Reveal {
                node: node.into(),
                mask: ValidationMask::COMPONENT,
                row: None,
            })
            .expect("reveal");
    }

    engine.remove_row("Group", 1).expect("remove");
    engine.generate(&data(), &rows(2));

    assert_eq!(engine.visibility_for("Name-0", None), Ok(name_initial()));
    assert_eq!(
        engine.visibility_for("Name-1", None),
        Ok(name_initial() | ValidationMask::COMPONENT)
    );
    assert!(engine.visibility_for("Name-2", None).is_err());
}

#[test]
fn rows_deleted_in_the_data_keep_identity_and_masks() {
    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let rows_of = |ids: &[Uuid]| {
        let group = ids
            .iter()
            .map(|id| json!({ "altinnRowId": id.to_string(), "Name": "n" }))
            .collect::<Vec<_>>();
        DataSources::default().with_data_model("model", json!({ "Owner": "Ada", "Group": group }))
    };
    let mut engine = engine(EngineConfig::default());
    let before = rows_of(&ids);
    engine.generate(&before, &before);
    engine
        .handle_event(&InteractionEvent::Reveal {
            node: "Name-1".into(),
            mask: ValidationMask::COMPONENT,
            row: None,
        })
        .expect("reveal");

    let after = rows_of(&ids[1..]);
    engine.generate(&after, &after);

    let tree = engine.snapshot();
    let uuids = tree
        .node("Group")
        .expect("group")
        .row_ids()
        .iter()
        .map(|row| row.uuid)
        .collect::<Vec<_>>();
    assert_eq!(uuids, ids[1..].to_vec());
    assert_eq!(
        engine.visibility_for("Name-0", None),
        Ok(name_initial() | ValidationMask::COMPONENT)
    );
    assert_eq!(engine.visibility_for("Name-1", None), Ok(name_initial()));
    assert!(engine.visibility_for("Name-2", None).is_err());
}

#[test]
fn attachments_fall_back_to_the_node_mask() {
    let mut engine = engine(EngineConfig::default());
    engine.generate(&data(), &rows(1));
    let tree = engine.snapshot();
    let name = tree.node("Name-0").expect("name");

    let mut visibility = (*engine.visibility()).clone();
    assert_eq!(visibility.attachment_visibility(name, "file-1"), name_initial());
    assert!(visibility.set_attachment_visibility(name, "file-1", ValidationMask::COMPONENT));
    assert_eq!(
        visibility.attachment_visibility(name, "file-1"),
        name_initial() | ValidationMask::COMPONENT
    );
    assert_eq!(visibility.attachment_visibility(name, "file-2"), name_initial());
}
