use super::*;

fn two_sheets() -> String {
    manifest(&[
        SheetSpec::new("Decision_1", SheetKind::DecisionTable, Some("Age Check")),
        SheetSpec::new("Definitions_1", SheetKind::Drd, None),
    ])
}

#[tokio::test]
async fn import_creates_fresh_elements_and_prefers_diagram_as_initial_view() {
    let engine = ScriptedEngine::new();

    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("first import");
    let first = engine.views();
    assert_eq!(first.len(), 2);
    assert!(engine.active_view().is_none());

    let initial = engine.initial_view().expect("initial view");
    assert_eq!(initial.kind, SheetKind::Drd);

    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("second import");
    let second = engine.views();

    assert_eq!(first[0].element.id(), second[0].element.id());
    assert!(!first[0].is_same(&second[0]));
    assert!(engine.view(&first[0].element).is_none());
    assert!(engine.view(&second[0].element).is_some());
    assert_eq!(engine.import_calls(), 2);
}

#[tokio::test]
async fn import_reports_parse_failures_and_duplicate_warnings() {
    let engine = ScriptedEngine::new();

    let err = engine
        .import("<definitions", ImportOptions::default())
        .await
        .expect_err("malformed");
    assert!(matches!(err, EngineError::Import { .. }));

    let duplicated = manifest(&[
        SheetSpec::new("Decision_1", SheetKind::DecisionTable, None),
        SheetSpec::new("Decision_1", SheetKind::DecisionTable, None),
    ]);
    let report = engine
        .import(&duplicated, ImportOptions { open: true })
        .await
        .expect("import");
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(engine.views().len(), 1);
    assert!(engine.active_view().is_some());
}

#[tokio::test]
async fn open_emits_views_changed_with_the_new_active_view() {
    let engine = ScriptedEngine::new();
    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("import");
    let mut events = engine.subscribe_events();

    let table = engine.views().remove(0);
    engine.open(&table).expect("open");

    match events.recv().await.expect("event") {
        EngineEvent::ViewsChanged { views, active_view } => {
            assert_eq!(views.len(), 2);
            assert!(active_view.expect("active").is_same(&table));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let stale = Sheet::new(ElementRef::new("Decision_1", None), SheetKind::DecisionTable);
    assert!(matches!(
        engine.open(&stale),
        Err(EngineError::UnknownSheet(_))
    ));
}

#[tokio::test]
async fn command_stack_tracks_undo_and_redo_depth() {
    let engine = ScriptedEngine::new();
    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("import");

    engine.edit("Decision_1").expect("edit");
    engine.edit("Decision_1").expect("edit");
    let viewer = engine.viewer("Decision_1").expect("viewer");
    let stack = viewer.stack();

    assert!(stack.can_undo());
    assert!(!stack.can_redo());

    stack.undo();
    stack.undo();
    stack.undo();
    assert!(!stack.can_undo());
    assert!(stack.can_redo());

    stack.redo();
    assert!(stack.can_undo());

    stack.execute();
    assert!(!stack.can_redo());
}

#[tokio::test]
async fn only_diagram_viewers_export_svg() {
    let engine = ScriptedEngine::new();
    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("import");

    let table = engine.viewer("Decision_1").expect("table viewer");
    assert!(table.vector_export().is_none());

    let drd = engine.viewer("Definitions_1").expect("drd viewer");
    let svg = drd
        .vector_export()
        .expect("svg capability")
        .save_svg()
        .await
        .expect("svg");
    assert!(svg.contains("Definitions_1"));

    assert!(engine.fail_next_export("Definitions_1", "canvas lost"));
    assert!(!engine.fail_next_export("Decision_1", "n/a"));
    let err = drd
        .vector_export()
        .expect("svg capability")
        .save_svg()
        .await
        .expect_err("injected failure");
    assert!(matches!(err, EngineError::Export(_)));
}

#[tokio::test]
async fn editor_actions_reject_unknown_names() {
    let engine = ScriptedEngine::new();
    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("import");

    let viewer = engine.viewer("Decision_1").expect("viewer");
    let actions = viewer.editor_actions().expect("actions");
    actions.trigger("addRule").expect("known action");
    assert!(matches!(
        actions.trigger("lassoTool"),
        Err(EngineError::UnknownAction(_))
    ));
    assert_eq!(viewer.triggered_actions(), vec!["addRule".to_string()]);
}

#[tokio::test]
async fn serialize_round_trips_through_import() {
    let engine = ScriptedEngine::new();
    engine
        .import(&two_sheets(), ImportOptions::default())
        .await
        .expect("import");

    let text = engine
        .serialize(SerializeOptions { format: true })
        .await
        .expect("serialize");
    assert!(text.contains('\n'));

    engine.fail_next_serialize("writer closed");
    assert!(matches!(
        engine.serialize(SerializeOptions::default()).await,
        Err(EngineError::Serialize(_))
    ));

    engine
        .import(&text, ImportOptions::default())
        .await
        .expect("re-import");
    assert_eq!(engine.views().len(), 2);
}
