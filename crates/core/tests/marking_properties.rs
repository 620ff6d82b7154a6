use marking_core::layer::{estimated_footprint, AnnotationLayer, PointerInput};
use marking_core::{
    percentage_to_pixels, pixels_to_percentage, AnnotationSet, AssessmentId, Command,
    DrawingMode, LayerSettings, MarkingService, MemoryMarkingService, PageSize, PercentageRect,
    Point, QuestionId, ResultKey, StudentId, ToolKind,
};

fn mouse(x: f64, y: f64) -> PointerInput {
    PointerInput::Mouse(Point::new(x, y))
}

fn mounted_layer(size: PageSize) -> AnnotationLayer {
    let mut layer = AnnotationLayer::new(1, AnnotationSet::new(1), LayerSettings::default());
    layer.set_dimensions(size);
    layer
}

fn stroke(layer: &mut AnnotationLayer, points: &[(f64, f64)]) {
    let (first, rest) = points.split_first().expect("stroke needs points");
    layer.pointer_down(&mouse(first.0, first.1));
    for &(x, y) in rest {
        layer.pointer_move(&mouse(x, y));
    }
    layer.pointer_up();
}

#[test]
fn percentage_pixel_round_trip_is_stable() {
    let rects = [
        PercentageRect::new(0.0, 0.0, 100.0, 100.0),
        PercentageRect::new(12.5, 33.3, 40.1, 17.9),
        PercentageRect::new(99.0, 0.5, 1.0, 0.25),
    ];
    let sizes = [
        PageSize::new(595.0, 842.0),
        PageSize::new(1234.0, 77.0),
        PageSize::new(1.0, 3.0),
    ];
    for rect in rects {
        for size in sizes {
            let back = pixels_to_percentage(&percentage_to_pixels(&rect, size), size);
            assert!((back.x - rect.x).abs() < 1e-6, "{rect:?} at {size:?}");
            assert!((back.y - rect.y).abs() < 1e-6);
            assert!((back.width - rect.width).abs() < 1e-6);
            assert!((back.height - rect.height).abs() < 1e-6);
        }
    }
}

#[test]
fn rendered_points_scale_with_page_size() {
    let mut layer = mounted_layer(PageSize::new(800.0, 600.0));
    layer.set_mode(DrawingMode::Pencil);
    stroke(&mut layer, &[(80.0, 60.0), (400.0, 300.0), (720.0, 90.0)]);

    let small = layer.render().lines[0].points.clone();
    layer.set_dimensions(PageSize::new(1600.0, 900.0));
    let large = layer.render().lines[0].points.clone();

    for (i, (s, l)) in small.iter().zip(&large).enumerate() {
        let ratio = if i % 2 == 0 { 2.0 } else { 1.5 };
        assert!((s * ratio - l).abs() < 1e-9);
    }
}

#[test]
fn undo_all_then_redo_all_restores_final_state() {
    let mut layer = mounted_layer(PageSize::new(1000.0, 1000.0));
    let initial = layer.annotations().clone();

    layer.set_mode(DrawingMode::Pencil);
    stroke(&mut layer, &[(100.0, 100.0), (200.0, 150.0)]);
    stroke(&mut layer, &[(300.0, 300.0), (320.0, 340.0)]);
    layer.set_mode(DrawingMode::StickyNote);
    layer.pointer_down(&mouse(500.0, 500.0));
    layer.pointer_up();
    layer.set_mode(DrawingMode::FineEraser);
    stroke(&mut layer, &[(100.0, 100.0), (120.0, 110.0)]);
    layer.set_mode(DrawingMode::TextNote);
    layer.pointer_down(&mouse(700.0, 100.0));
    let final_state = layer.annotations().clone();

    let actions = 5;
    for _ in 0..actions {
        assert!(layer.apply_command(Command::Undo));
    }
    assert!(!layer.apply_command(Command::Undo));
    assert_eq!(layer.annotations(), &initial);
    assert!(layer.annotations().is_empty());

    for _ in 0..actions {
        assert!(layer.apply_command(Command::Redo));
    }
    assert_eq!(layer.annotations(), &final_state);
}

#[test]
fn new_action_after_undo_drops_redo_branch() {
    let mut layer = mounted_layer(PageSize::new(1000.0, 1000.0));
    layer.set_mode(DrawingMode::Pencil);
    stroke(&mut layer, &[(100.0, 100.0), (200.0, 100.0)]);
    stroke(&mut layer, &[(100.0, 200.0), (200.0, 200.0)]);
    let redo_target = layer.annotations().clone();

    layer.apply_command(Command::Undo);
    assert!(layer.history_state().can_redo);
    stroke(&mut layer, &[(100.0, 300.0), (200.0, 300.0)]);

    assert!(!layer.history_state().can_redo);
    assert!(!layer.apply_command(Command::Redo));
    assert_ne!(layer.annotations(), &redo_target);
}

#[test]
fn fine_eraser_masks_and_eraser_removes_pencil_only() {
    let mut layer = mounted_layer(PageSize::new(1000.0, 1000.0));
    layer.settings_mut().eraser_width = 40.0;

    layer.set_mode(DrawingMode::Pencil);
    stroke(&mut layer, &[(100.0, 100.0), (200.0, 100.0)]);
    layer.set_mode(DrawingMode::FineEraser);
    stroke(&mut layer, &[(150.0, 100.0), (160.0, 100.0)]);
    assert_eq!(layer.annotations().lines.len(), 2);

    layer.set_mode(DrawingMode::Eraser);
    stroke(&mut layer, &[(100.0, 100.0), (105.0, 100.0)]);
    let lines = &layer.annotations().lines;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].tool, ToolKind::FineEraser);
}

#[test]
fn notes_placed_at_far_corner_stay_on_page() {
    let size = PageSize::new(640.0, 900.0);
    for (mode, tool) in [
        (DrawingMode::TextNote, ToolKind::TextNote),
        (DrawingMode::StickyNote, ToolKind::StickyNote),
    ] {
        let mut layer = mounted_layer(size);
        layer.set_mode(mode);
        layer.pointer_down(&mouse(640.0, 900.0));
        layer.pointer_up();

        let note = layer
            .annotations()
            .texts
            .iter()
            .chain(&layer.annotations().sticky_notes)
            .find(|n| n.tool == tool)
            .expect("note placed");
        let footprint = estimated_footprint(tool, size);
        assert!(note.x + footprint.width <= 100.0 + 1e-9);
        assert!(note.y + footprint.height <= 100.0 + 1e-9);
    }
}

#[test]
fn history_keeps_newest_fifty_states() {
    let mut layer = mounted_layer(PageSize::new(1000.0, 1000.0));
    layer.set_mode(DrawingMode::Pencil);
    for i in 0..60 {
        let y = 10.0 + i as f64 * 15.0;
        stroke(&mut layer, &[(100.0, y), (200.0, y)]);
    }

    let history = layer.history();
    assert_eq!(history.len(), 50);
    assert_eq!(history.index(), 49);
    assert_eq!(history.current().lines.len(), 60);
    assert_eq!(history.oldest().lines.len(), 11);
}

#[test]
fn annotation_and_mark_writes_are_isolated() {
    let service = MemoryMarkingService::new();
    let key = ResultKey::new(AssessmentId::new(), StudentId::new(), QuestionId::new());

    service.save_mark(&key, 7.0).unwrap();
    let set = AnnotationSet::new(3);
    service.save_annotations(&key, &set).unwrap();
    assert_eq!(service.fetch_result(&key).unwrap().unwrap().mark, Some(7.0));

    service.save_mark(&key, 8.0).unwrap();
    let stored = service.fetch_result(&key).unwrap().unwrap();
    assert_eq!(stored.annotation, Some(set));
    assert_eq!(stored.mark, Some(8.0));
}

#[test]
fn stroke_renders_and_is_erased_in_scenario() {
    let mut set = AnnotationSet::new(1);
    set.lines.push(marking_core::LineElement {
        id: "ink".into(),
        tool: ToolKind::Pencil,
        points: vec![10.0, 10.0, 20.0, 10.0, 20.0, 20.0],
        stroke: "#ff0000".into(),
        stroke_width: 2.0,
        composite_operation: Default::default(),
    });
    let size = PageSize::new(1000.0, 1000.0);
    let mut layer = AnnotationLayer::new(1, set, LayerSettings::default());
    layer.set_dimensions(size);
    assert_eq!(
        layer.render().lines[0].points,
        vec![100.0, 100.0, 200.0, 100.0, 200.0, 200.0]
    );

    // A fine-eraser pass along the same path keeps the line
    layer.settings_mut().eraser_width = 120.0;
    layer.set_mode(DrawingMode::FineEraser);
    stroke(&mut layer, &[(150.0, 100.0), (150.0, 100.0)]);
    assert!(layer.annotations().lines.iter().any(|l| l.tool == ToolKind::Pencil));

    layer.set_mode(DrawingMode::Eraser);
    stroke(&mut layer, &[(150.0, 100.0), (150.0, 100.0)]);
    assert!(layer.annotations().lines.iter().all(|l| l.tool != ToolKind::Pencil));
}
