//! Arbor Desktop: interactive graph viewer powered by wgpu.
//!
//! Uses `winit` 0.30 for windowing and input and `arbor-render` for
//! batched GPU drawing of an `arbor-core` graph.

mod state;

use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowAttributes, WindowId},
};

use arbor_render::{GpuContext, RenderError};
use state::{load_config, AppState, CONFIG_ENV};

/// Winit 0.30 application handler.
struct App {
    window: Option<Arc<Window>>,
    state: Option<AppState>,
    // Mouse tracking for pan gestures.
    mouse_pressed: bool,
    last_mouse: (f64, f64),
    frame_count: u64,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            state: None,
            mouse_pressed: false,
            last_mouse: (0.0, 0.0),
            frame_count: 0,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), String> {
        let attrs = WindowAttributes::default()
            .with_title("Arbor")
            .with_inner_size(LogicalSize::new(1280, 800))
            .with_min_inner_size(LogicalSize::new(400, 300));

        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|e| format!("failed to create window: {e}"))?,
        );
        let size = window.inner_size();

        let gpu = pollster::block_on(GpuContext::new_with_surface(
            window.clone(),
            size.width.max(1),
            size.height.max(1),
        ))
        .map_err(|e| format!("failed to initialise GPU: {e}"))?;
        let adapter = gpu.adapter.get_info().name;

        let config = load_config(std::env::var_os(CONFIG_ENV).map(PathBuf::from).as_deref());
        let mut app_state = AppState::new(gpu, config, window.scale_factor() as f32)
            .map_err(|e| format!("failed to create renderer: {e}"))?;
        app_state
            .load_demo_graph()
            .map_err(|e| format!("failed to build demo graph: {e}"))?;

        info!(
            "Arbor Desktop initialized: {}×{}, GPU: {adapter:?}, {} node(s), {} edge(s)",
            size.width,
            size.height,
            app_state.graph.node_count(),
            app_state.graph.edge_count()
        );

        window.request_redraw();
        self.state = Some(app_state);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized.
        }
        if let Err(e) = self.init(event_loop) {
            log::error!("{e}");
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let (Some(window), Some(state)) = (self.window.as_ref(), self.state.as_mut()) else {
            return;
        };

        match event {
            // ── Close / Escape ──────────────────────────────────
            WindowEvent::CloseRequested => {
                info!("Window closed after {} frames", self.frame_count);
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed =>
            {
                if let Key::Named(NamedKey::Escape) = event.logical_key {
                    event_loop.exit();
                }
            }

            // ── Resize ──────────────────────────────────────────
            WindowEvent::Resized(new_size) => {
                state.resize(new_size.width, new_size.height);
                window.request_redraw();
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                state.camera.pixel_ratio = scale_factor as f32;
                window.request_redraw();
            }

            // ── Mouse move → pan ────────────────────────────────
            WindowEvent::CursorMoved {
                position: PhysicalPosition { x, y },
                ..
            } => {
                if self.mouse_pressed {
                    let dx = x - self.last_mouse.0;
                    let dy = y - self.last_mouse.1;
                    state.pan(dx as f32, dy as f32);
                    window.request_redraw();
                }
                self.last_mouse = (x, y);
            }

            // ── Mouse buttons ───────────────────────────────────
            WindowEvent::MouseInput { state: btn_state, button, .. } => match (button, btn_state) {
                (MouseButton::Left | MouseButton::Middle | MouseButton::Right, ElementState::Pressed) => {
                    self.mouse_pressed = true;
                }
                (MouseButton::Left | MouseButton::Middle | MouseButton::Right, ElementState::Released) => {
                    self.mouse_pressed = false;
                }
                _ => {}
            },

            // ── Scroll → zoom ───────────────────────────────────
            WindowEvent::MouseWheel { delta, .. } => {
                let dy = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 50.0,
                };
                state.zoom_at(self.last_mouse.0 as f32, self.last_mouse.1 as f32, dy);
                window.request_redraw();
            }

            // ── Redraw ──────────────────────────────────────────
            WindowEvent::RedrawRequested => match state.render_frame() {
                Ok(stats) => {
                    self.frame_count += 1;
                    if self.frame_count % 300 == 0 {
                        info!(
                            "Frame {}: {} edges, {} flat + {} textured nodes, {} flush(es), {} draw call(s)",
                            self.frame_count,
                            stats.edge_count,
                            stats.flat_node_count,
                            stats.textured_node_count,
                            stats.batch_flushes,
                            stats.draw_calls
                        );
                    }
                }
                Err(RenderError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                    // Reconfigure surface on lost/outdated.
                    let size = window.inner_size();
                    state.resize(size.width, size.height);
                    window.request_redraw();
                }
                Err(RenderError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                    log::error!("surface out of memory, exiting");
                    event_loop.exit();
                }
                Err(e) => {
                    log::error!("Render error: {e}");
                }
            },

            _ => {}
        }
    }
}

fn main() {
    env_logger::init();

    info!("Starting Arbor Desktop...");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("failed to create event loop: {e}");
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new();
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {e}");
        std::process::exit(1);
    }
}
