use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::config::{SimulationConfig, Theme};
use crate::session::{Preferences, Session};

const WINDOW_TITLE: &str = "Fluid Backdrop";

/// Application state
pub struct App {
    window: Option<Arc<Window>>,
    session: Option<Session>,
    theme: Theme,
    config: SimulationConfig,
    preferences: Preferences,
    fps_counter: FpsCounter,
}

impl App {
    pub fn new(theme: Theme, config: SimulationConfig, preferences: Preferences) -> Self {
        Self {
            window: None,
            session: None,
            theme,
            config,
            preferences,
            fps_counter: FpsCounter::new(),
        }
    }

    fn start_session(&mut self) {
        if let Some(window) = &self.window {
            self.session = Some(Session::start(
                window.clone(),
                self.theme,
                &self.config,
                self.preferences,
            ));
        }
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    /// A theme change is a full remount: the old session is gone before the new one starts
    fn toggle_theme(&mut self) {
        self.stop_session();
        self.theme = self.theme.toggled();
        log::info!("Theme: {:?}", self.theme);
        self.start_session();
    }

    fn render(&mut self) {
        let (Some(window), Some(session)) = (&self.window, &mut self.session) else {
            return;
        };
        if !session.redraw(window) {
            return;
        }

        if let Some(fps) = self.fps_counter.tick() {
            window.set_title(&format!(
                "{} - {:.0} FPS - {:?}",
                WINDOW_TITLE, fps, self.theme
            ));
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_transparent(self.config.transparent)
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 800));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        log::info!("Controls:");
        log::info!("  Move the pointer to stir the fluid");
        log::info!("  T: Toggle dark/light theme");
        log::info!("  Escape: Quit");

        self.window = Some(window);
        self.start_session();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                self.stop_session();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    match event.physical_key {
                        PhysicalKey::Code(KeyCode::Escape) => {
                            log::info!("Escape pressed, exiting...");
                            self.stop_session();
                            event_loop.exit();
                        }
                        PhysicalKey::Code(KeyCode::KeyT) => self.toggle_theme(),
                        _ => {}
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(session) = &mut self.session {
                    session.pointer_moved(position.x as f32, position.y as f32);
                }
            }
            WindowEvent::Resized(new_size) => {
                if let Some(session) = &mut self.session {
                    log::info!("Window resized to {}x{}", new_size.width, new_size.height);
                    session.resized(new_size.width, new_size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.render();
            }
            _ => {}
        }
    }
}

/// Simple FPS counter
struct FpsCounter {
    last_update: Instant,
    frame_count: u32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    /// Tick the counter, returns Some(fps) every second
    fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed.as_secs_f64() >= 1.0 {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.frame_count = 0;
            self.last_update = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}
