use crate::game::ClientGameState;
use macroquad::prelude::*;
use shared::{Position, Tier, COLLECT_RADIUS, MAP_HEIGHT, MAP_WIDTH};

const PLAYER_RADIUS: f32 = 12.0;
const COLLECTIBLE_RADIUS: f32 = 8.0;
const GRID_SPACING: f32 = 100.0;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub show_history: bool,
    pub fake_ping_ms: u64,
}

pub struct Renderer {
    width: f32,
    height: f32,
}

impl Renderer {
    pub fn new(width: usize, height: usize) -> Self {
        Renderer {
            width: width as f32,
            height: height as f32,
        }
    }

    /// World position of the top-left corner, keeping `focus` centred.
    pub fn camera_origin(&self, focus: Position) -> Position {
        Position::new(focus.x - self.width / 2.0, focus.y - self.height / 2.0)
    }

    pub fn render(&self, game: &ClientGameState, config: &UiConfig) {
        clear_background(Color::from_rgba(34, 52, 30, 255));

        let camera = self.camera_origin(game.predicted);

        self.draw_map(camera);

        if config.show_history {
            self.draw_history(game, camera);
        }

        for local in game.collectibles.values() {
            let collectible = &local.collectible;
            let mut color = match collectible.tier {
                Tier::Normal => ORANGE,
                Tier::Premium => GOLD,
            };
            if local.is_collecting() {
                color.a = 0.4;
            }
            let (x, y) = to_screen(collectible.position, camera);
            draw_circle(x, y, COLLECTIBLE_RADIUS, color);
        }

        for player in game.players.values() {
            self.draw_player(
                player.position,
                camera,
                Color::from_rgba(255, 68, 68, 255),
                &format!("{} ({})", player.name, player.score),
            );
        }

        if game.is_joined() {
            if let Some(destination) = game.destination {
                let (x, y) = to_screen(destination, camera);
                draw_circle_lines(x, y, 6.0, 1.0, YELLOW);
            }

            let (x, y) = to_screen(game.predicted, camera);
            draw_circle_lines(x, y, COLLECT_RADIUS, 1.0, Color::from_rgba(255, 255, 255, 60));
            self.draw_player(
                game.predicted,
                camera,
                GREEN,
                &format!("{} ({})", game.name, game.score_label()),
            );
        }

        self.draw_leaderboard(game);
        self.draw_ui(game, config);
    }

    fn draw_map(&self, camera: Position) {
        let (left, top) = to_screen(Position::new(0.0, 0.0), camera);
        let (right, bottom) = to_screen(Position::new(MAP_WIDTH, MAP_HEIGHT), camera);

        let grid = Color::from_rgba(255, 255, 255, 20);
        let mut x = 0.0;
        while x <= MAP_WIDTH {
            let (sx, _) = to_screen(Position::new(x, 0.0), camera);
            draw_line(sx, top, sx, bottom, 1.0, grid);
            x += GRID_SPACING;
        }
        let mut y = 0.0;
        while y <= MAP_HEIGHT {
            let (_, sy) = to_screen(Position::new(0.0, y), camera);
            draw_line(left, sy, right, sy, 1.0, grid);
            y += GRID_SPACING;
        }

        draw_rectangle_lines(left, top, right - left, bottom - top, 3.0, WHITE);
    }

    fn draw_history(&self, game: &ClientGameState, camera: Position) {
        for sample in game.history() {
            let (x, y) = to_screen(sample.position, camera);
            draw_circle(x, y, 1.5, Color::from_rgba(0, 170, 255, 160));
        }
    }

    fn draw_player(&self, position: Position, camera: Position, color: Color, label: &str) {
        let (x, y) = to_screen(position, camera);
        draw_circle(x, y, PLAYER_RADIUS, color);
        draw_circle_lines(x, y, PLAYER_RADIUS, 2.0, WHITE);

        let size = measure_text(label, None, 16, 1.0);
        draw_text(label, x - size.width / 2.0, y - PLAYER_RADIUS - 6.0, 16.0, WHITE);
    }

    fn draw_leaderboard(&self, game: &ClientGameState) {
        let x = self.width - 190.0;
        let mut y = 20.0;

        draw_rectangle(x - 10.0, 5.0, 190.0, 30.0 + 18.0 * game.leaderboard.len() as f32, Color::from_rgba(0, 0, 0, 140));
        draw_text("Leaderboard", x, y, 18.0, WHITE);

        for (rank, entry) in game.leaderboard.iter().enumerate() {
            y += 18.0;
            let own = entry.name == game.name && game.is_joined();
            let color = if own { GREEN } else { WHITE };
            let line = format!("{:>2}. {:<12} {:>5}", rank + 1, entry.name, entry.score);
            draw_text(&line, x, y, 16.0, color);
        }
    }

    fn draw_ui(&self, game: &ClientGameState, config: &UiConfig) {
        let connection_color = if game.is_joined() { GREEN } else { RED };
        draw_rectangle(10.0, 10.0, 8.0, 8.0, connection_color);

        let status = match (&game.player_id, &game.last_rejection) {
            (Some(id), _) => format!("Player {}", id),
            (None, Some(reason)) => format!("Rejected: {}", reason),
            (None, None) => "Joining...".to_string(),
        };
        draw_text(&status, 24.0, 18.0, 16.0, WHITE);

        draw_text(&format!("Score: {}", game.score_label()), 10.0, 38.0, 20.0, WHITE);
        draw_text(
            &format!("Corrections: {}", game.corrections),
            10.0,
            56.0,
            14.0,
            LIGHTGRAY,
        );

        if config.fake_ping_ms > 0 {
            draw_text(
                &format!("Fake ping: {}ms", config.fake_ping_ms),
                10.0,
                72.0,
                14.0,
                LIGHTGRAY,
            );
        }

        draw_text(
            "Click to move  R: rejoin  H: history",
            10.0,
            self.height - 10.0,
            14.0,
            LIGHTGRAY,
        );
    }
}

fn to_screen(position: Position, camera: Position) -> (f32, f32) {
    (position.x - camera.x, position.y - camera.y)
}
