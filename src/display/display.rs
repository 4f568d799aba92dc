//! SDL2 Window Display Module
//! Creates an SDL2 window, shows RGB24 frames and reports user quit requests.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;

use tracing::{info, instrument, warn};

use crate::capture::{Frame, PixelFormat};
use crate::display::FrameSink;
use crate::DisplayConfig;

/// SDL2 Window Display
/// Handles window creation, event polling, and frame rendering.
pub struct Sdl2Display {
    inner: Option<Inner>,
    quit_keys: Vec<Keycode>,
}

struct Inner {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    window_id: u32,
    _sdl_context: sdl2::Sdl,
}

impl Sdl2Display {
    /// Open the window. Must be called on the thread that will drive it.
    #[instrument(skip(config), fields(title = %config.title))]
    pub fn open(config: &DisplayConfig) -> Result<Self> {
        let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;
        let window_id = window.id();

        let mut canvas_builder = window.into_canvas();
        if config.vsync {
            canvas_builder = canvas_builder.present_vsync();
        }
        let canvas = canvas_builder.build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        let quit_keys = config
            .quit_keys
            .iter()
            .filter_map(|name| {
                let key = Keycode::from_name(name);
                if key.is_none() {
                    warn!("Unknown quit key {:?}, ignoring", name);
                }
                key
            })
            .collect();

        info!("Display window opened ({}x{})", config.width, config.height);

        Ok(Self {
            inner: Some(Inner {
                canvas,
                texture_creator,
                event_pump,
                window_id,
                _sdl_context: sdl_context,
            }),
            quit_keys,
        })
    }

    pub fn render_frame(&mut self, frame: &Frame) -> Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| eyre!("Display already released"))?;

        if frame.meta.format != PixelFormat::Rgb24 {
            return Err(eyre!("Display expects RGB24, got {:?}", frame.meta.format));
        }

        let width = frame.meta.width;
        let height = frame.meta.height;

        let mut texture = inner
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.data, frame.meta.stride as usize)
            .map_err(|e| eyre!(e))?;

        inner.canvas.clear();
        inner
            .canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        inner.canvas.present();
        Ok(())
    }
}

impl FrameSink for Sdl2Display {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        self.render_frame(frame)
    }

    fn poll_quit(&mut self) -> bool {
        let Some(inner) = self.inner.as_mut() else {
            return true;
        };

        let mut quit = false;
        for event in inner.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    quit = true;
                }
                Event::Window {
                    window_id,
                    win_event: WindowEvent::Close,
                    ..
                } if window_id == inner.window_id => {
                    info!("Window closed");
                    quit = true;
                }
                Event::KeyDown {
                    keycode: Some(key), ..
                } if self.quit_keys.contains(&key) => {
                    info!("Quit key {} pressed", key.name());
                    quit = true;
                }
                _ => {}
            }
        }
        quit
    }

    fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.canvas.window_mut().hide();
            info!("Display window released");
        }
    }
}

impl Drop for Sdl2Display {
    fn drop(&mut self) {
        self.release();
    }
}
