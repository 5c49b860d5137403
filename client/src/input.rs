//! Mouse and keyboard handling

use macroquad::prelude::*;
use shared::Position;

/// What the player asked for this frame.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct InputActions {
    /// World-space point under the cursor while the button is held.
    pub destination: Option<Position>,
    pub rejoin: bool,
    pub toggle_history: bool,
}

/// Samples input once per frame with edge detection on toggle keys
pub struct InputManager {
    // Previous frame key states for edge detection
    prev_key_r: bool,
    prev_key_h: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            prev_key_r: false,
            prev_key_h: false,
        }
    }

    /// `camera` is the world position of the screen's top-left corner.
    pub fn update(&mut self, camera: Position) -> InputActions {
        let destination = is_mouse_button_down(MouseButton::Left).then(|| {
            let (x, y) = mouse_position();
            screen_to_world(x, y, camera)
        });

        let key_r = is_key_down(KeyCode::R);
        let key_h = is_key_down(KeyCode::H);

        let actions = InputActions {
            destination,
            rejoin: key_r && !self.prev_key_r,
            toggle_history: key_h && !self.prev_key_h,
        };

        self.prev_key_r = key_r;
        self.prev_key_h = key_h;

        actions
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

pub fn screen_to_world(x: f32, y: f32, camera: Position) -> Position {
    Position::new(camera.x + x, camera.y + y)
}
