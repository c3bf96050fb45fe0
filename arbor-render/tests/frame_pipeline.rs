//! Whole-frame behaviour against the recording backend.

use arbor_core::{Element, Graph, NodeSnapshot, Point, Rgb, Viewport};
use arbor_render::backend::BulkLayer;
use arbor_render::{
    BackendCall, RecordingBackend, RenderStrategy, Renderer, RendererConfig, Shape, SolidNode,
    MAX_INSTANCES,
};

fn renderer() -> Renderer<RecordingBackend> {
    let mut renderer = Renderer::new(RecordingBackend::new(), RendererConfig::default());
    renderer
        .add_render_type(
            "round",
            RenderStrategy::textured(SolidNode::new(Shape::Ellipse).with_texture_size(16)),
        )
        .unwrap();
    renderer
}

fn round(x: f32, y: f32, color: Rgb) -> NodeSnapshot {
    NodeSnapshot::new(x, y, 30.0, 30.0)
        .with_render_type("round")
        .with_color(color)
}

#[test]
fn test_three_nodes_two_edges() {
    let mut graph = Graph::new();
    let red = graph.add_node(round(0.0, 0.0, Rgb::new(255, 0, 0)));
    let green = graph.add_node(round(100.0, 0.0, Rgb::new(0, 255, 0)));
    let blue = graph.add_node(round(50.0, 80.0, Rgb::new(0, 0, 255)));
    graph.add_edge(red, green).unwrap();
    graph.add_edge(green, blue).unwrap();

    let mut renderer = renderer();
    let stats = renderer
        .render_frame(&graph.z_sorted(), &Viewport::new(640.0, 480.0))
        .unwrap();

    assert_eq!(stats.edge_count, 2);
    assert_eq!(stats.textured_node_count, 3);
    assert_eq!(stats.batch_flushes, 1);
    assert_eq!(renderer.backend().flush_sizes(), vec![3]);

    let edge_draws: Vec<_> = renderer
        .backend()
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::DrawGeometry { layer: BulkLayer::Edges, .. }))
        .collect();
    assert_eq!(
        edge_draws,
        vec![&BackendCall::DrawGeometry { layer: BulkLayer::Edges, vertex_count: 4 }]
    );
    assert_eq!(renderer.backend().live_textures(), 3);
}

#[test]
fn test_edges_drawn_before_nodes() {
    let mut graph = Graph::new();
    let a = graph.add_node(NodeSnapshot::new(0.0, 0.0, 10.0, 10.0));
    let b = graph.add_node(round(40.0, 0.0, Rgb::new(10, 20, 30)));
    graph.add_edge(a, b).unwrap();

    let mut renderer = renderer();
    renderer
        .render_frame(&graph.z_sorted(), &Viewport::new(100.0, 100.0))
        .unwrap();

    let calls = renderer.backend().calls();
    let position = |pred: &dyn Fn(&BackendCall) -> bool| calls.iter().position(|c| pred(c));
    let edges = position(&|c| matches!(c, BackendCall::DrawGeometry { layer: BulkLayer::Edges, .. }));
    let flat = position(&|c| matches!(c, BackendCall::DrawGeometry { layer: BulkLayer::Nodes, .. }));
    let textured = position(&|c| matches!(c, BackendCall::DrawInstances { .. }));
    assert!(edges < flat && flat < textured, "{calls:?}");
}

#[test]
fn test_large_graph_respects_batch_limit() {
    let mut graph = Graph::new();
    for i in 0..23 {
        graph.add_node(round(i as f32 * 40.0, 0.0, Rgb::new(i as u8, 0, 0)));
    }

    let mut renderer = renderer();
    let stats = renderer
        .render_frame(&graph.z_sorted(), &Viewport::new(1024.0, 768.0))
        .unwrap();

    assert_eq!(renderer.backend().flush_sizes(), vec![10, 10, 3]);
    assert_eq!(stats.batch_flushes, 3);
    assert!(renderer
        .backend()
        .calls()
        .iter()
        .all(|c| match c {
            BackendCall::DrawInstances { textures, .. } => textures.len() <= MAX_INSTANCES,
            _ => true,
        }));
}

#[test]
fn test_graph_dirty_flag_drives_rebuild() {
    let mut graph = Graph::new();
    let id = graph.add_node(NodeSnapshot::new(0.0, 0.0, 10.0, 10.0));
    let mut renderer = renderer();
    let viewport = Viewport::new(200.0, 200.0);

    let frame = |graph: &mut Graph, renderer: &mut Renderer<RecordingBackend>| {
        if graph.take_dirty() {
            renderer.invalidate();
        }
        renderer.render_frame(&graph.z_sorted(), &viewport).unwrap()
    };

    assert!(frame(&mut graph, &mut renderer).rebuilt);
    assert!(!frame(&mut graph, &mut renderer).rebuilt);

    graph.move_node(id, Point::new(20.0, 20.0)).unwrap();
    assert!(frame(&mut graph, &mut renderer).rebuilt);

    // The quad moved with the node.
    let bytes = &renderer.backend().last_node_bytes;
    let first: [f32; 2] = bytemuck::pod_read_unaligned(&bytes[..8]);
    assert_eq!(first, [15.0, 15.0]);
}

#[test]
fn test_redundant_rebuilds_are_byte_identical() {
    let mut graph = Graph::new();
    let a = graph.add_node(NodeSnapshot::new(0.0, 0.0, 10.0, 10.0).with_opacity(0.5));
    let b = graph.add_node(NodeSnapshot::new(30.0, 10.0, 12.0, 8.0));
    graph.add_edge(a, b).unwrap();
    let elements = graph.z_sorted();

    let mut renderer = renderer();
    let viewport = Viewport::new(100.0, 100.0);
    renderer.render_frame(&elements, &viewport).unwrap();
    let (nodes, edges) = (
        renderer.backend().last_node_bytes.clone(),
        renderer.backend().last_edge_bytes.clone(),
    );

    renderer.invalidate();
    renderer.render_frame(&elements, &viewport).unwrap();
    assert_eq!(renderer.backend().last_node_bytes, nodes);
    assert_eq!(renderer.backend().last_edge_bytes, edges);
}

#[test]
fn test_bounded_cache_evicts_across_frames() {
    let config = RendererConfig {
        texture_cache_capacity: Some(MAX_INSTANCES),
        ..RendererConfig::default()
    };
    let mut renderer = Renderer::new(RecordingBackend::new(), config);
    renderer
        .add_render_type(
            "round",
            RenderStrategy::textured(SolidNode::new(Shape::Ellipse).with_texture_size(4)),
        )
        .unwrap();
    let viewport = Viewport::new(100.0, 100.0);

    for frame in 0..3u8 {
        let elements: Vec<Element> = (0..MAX_INSTANCES as u8)
            .map(|i| Element::Node(round(0.0, 0.0, Rgb::new(frame, i, 0))))
            .collect();
        renderer.render_frame(&elements, &viewport).unwrap();
    }

    assert_eq!(renderer.texture_cache().len(), MAX_INSTANCES);
    assert_eq!(renderer.backend().live_textures(), MAX_INSTANCES);
    assert_eq!(renderer.texture_cache().stats().evictions, 2 * MAX_INSTANCES as u64);
}
