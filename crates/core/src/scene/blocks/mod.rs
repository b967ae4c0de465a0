//! Falling-blocks game played from the web page.
//!
//! The board is drawn on a 20×10 grid of lights wired as a serpentine: the
//! left half snakes out from light 0, the right half from light 100. Rows 0
//! and 19 are a border whose colour shows whether a person or the move
//! advisor is playing.

pub mod advisor;
pub mod game;

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::{
    advisor::{AdvisorWorker, MoveAdvisor, NaiveBayesAdvisor, Position},
    game::{Game, BOARD_COLS, BOARD_ROWS},
};
use super::{FrameGenerator, FrameInput, RemoteCall};
use crate::{
    frame::{ChannelLayout, FrameShape, PixelFrame},
    timeline::Watermark,
    Result,
};

pub const GRID_ROWS: usize = 20;
pub const LED_COUNT: usize = GRID_ROWS * BOARD_COLS;

const MID_COL: usize = BOARD_COLS / 2;
const BOARD_ROW_OFFSET: usize = 1;

/// Idle time after which the advisor takes over.
pub const AI_TIMEOUT: Duration = Duration::from_secs(15);
/// Minimum time between two advisor steps.
pub const AI_MOVE_INTERVAL: Duration = Duration::from_millis(750);

const PLAYER_BORDER: [u8; 3] = [127, 25, 25];
const AI_BORDER: [u8; 3] = [127, 127, 127];

/// Light index of grid cell `(row, col)`; row 0 is the top.
pub fn frame_index(row: usize, col: usize) -> usize {
    let (col_start, goes_up) = if col < MID_COL {
        ((MID_COL - 1 - col) * GRID_ROWS, col % 2 == 0)
    } else {
        (col * GRID_ROWS, col % 2 == 1)
    };
    let within = if goes_up { row } else { GRID_ROWS - 1 - row };
    col_start + within
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Left,
    Right,
    Rotate,
    Drop,
}

#[derive(Debug, Clone, Deserialize)]
struct GameInput {
    #[serde(rename = "type")]
    kind: String,
    timestamp: f64,
}

impl GameInput {
    fn kind(&self) -> Option<InputKind> {
        match self.kind.as_str() {
            "left" => Some(InputKind::Left),
            "right" => Some(InputKind::Right),
            "rotate" => Some(InputKind::Rotate),
            "drop" => Some(InputKind::Drop),
            _ => None,
        }
    }
}

/// Game-board generator.
pub struct BlocksScene {
    shape: FrameShape,
    game: Game,
    advisor: AdvisorWorker,
    inputs: Watermark,
    ai_mode: bool,
    last_input: Option<Instant>,
    last_ai_move: Option<Instant>,
    requested_for: Option<u64>,
    web_updates: bool,
    token: Option<String>,
    calls: Vec<RemoteCall>,
}

impl BlocksScene {
    pub fn new(layout: ChannelLayout, token: Option<String>) -> Result<Self> {
        Self::with_parts(layout, token, Game::new(), Box::new(NaiveBayesAdvisor::new()))
    }

    pub fn with_parts(
        layout: ChannelLayout,
        token: Option<String>,
        game: Game,
        advisor: Box<dyn MoveAdvisor>,
    ) -> Result<Self> {
        if token.is_none() {
            warn!("no controller token, game state will not be published");
        }
        Ok(Self {
            shape: FrameShape::new(LED_COUNT, layout),
            game,
            advisor: AdvisorWorker::spawn(advisor)?,
            inputs: Watermark::new(),
            ai_mode: false,
            last_input: None,
            last_ai_move: None,
            requested_for: None,
            web_updates: true,
            token,
            calls: Vec::new(),
        })
    }

    pub fn ai_mode(&self) -> bool {
        self.ai_mode
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    fn new_game(&mut self) {
        self.game.restart();
        self.ai_mode = false;
        self.requested_for = None;
    }

    fn read_inputs(&mut self, input: &FrameInput<'_>) -> Vec<GameInput> {
        let Some(inputs) = input.state.first().and_then(|record| record.get("inputs")) else {
            return Vec::new();
        };
        let inputs: Vec<GameInput> = match serde_json::from_value(inputs.clone()) {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(error = %e, "ignoring malformed game inputs");
                return Vec::new();
            }
        };
        self.inputs.fresh(inputs, |game_input| game_input.timestamp)
    }

    fn apply_input(&mut self, game_input: &GameInput, now: Instant) {
        self.last_input = Some(now);
        self.web_updates = true;
        if self.ai_mode {
            info!("player is back, starting a new game");
            self.new_game();
            self.advisor.reset();
            return;
        }
        match game_input.kind() {
            Some(InputKind::Left) => {
                self.game.left();
            }
            Some(InputKind::Right) => {
                self.game.right();
            }
            Some(InputKind::Rotate) => {
                self.game.rotate();
            }
            Some(InputKind::Drop) => self.game.hard_drop(),
            None => debug!(kind = %game_input.kind, "unknown game input"),
        }
    }

    /// Moves the piece one step toward the advisor's suggestion: rotation
    /// first, then column, then drop.
    fn step_towards_suggestion(&mut self, now: Instant) {
        let piece = self.game.piece();
        let Some(target) = self.advisor.slot().for_piece(piece.serial) else {
            return;
        };
        if self
            .last_ai_move
            .is_some_and(|last| now.duration_since(last) <= AI_MOVE_INTERVAL)
        {
            return;
        }
        self.last_ai_move = Some(now);
        if piece.rotation != target.rotation {
            self.game.rotate();
        } else if piece.col > target.col {
            self.game.left();
        } else if piece.col < target.col {
            self.game.right();
        } else {
            self.game.hard_drop();
        }
    }

    fn advance_game(&mut self, now: Instant) {
        if self.ai_mode {
            self.step_towards_suggestion(now);
        }
        self.game.tick();

        for placement in self.game.take_placements() {
            if !self.ai_mode {
                self.advisor.learn(placement);
            }
            self.advisor.slot().set(None);
        }

        let piece = self.game.piece();
        if self.ai_mode && !self.game.lost() && self.requested_for != Some(piece.serial) {
            self.requested_for = Some(piece.serial);
            self.advisor.suggest(
                piece.serial,
                Position {
                    board: self.game.board().clone(),
                    kind: piece.kind,
                },
            );
        }
    }

    fn draw(&self) -> PixelFrame {
        let mut frame = PixelFrame::new(self.shape);
        let field = self.game.playfield();
        for row in 0..BOARD_ROWS {
            for col in 0..BOARD_COLS {
                if let Some(kind) = field.get(row, col) {
                    frame.set_rgb(frame_index(row + BOARD_ROW_OFFSET, col), kind.colour());
                }
            }
        }
        let border = if self.ai_mode { AI_BORDER } else { PLAYER_BORDER };
        for col in 0..BOARD_COLS {
            frame.set_rgb(frame_index(0, col), border);
            frame.set_rgb(frame_index(GRID_ROWS - 1, col), border);
        }
        frame
    }

    fn publish_state(&mut self) {
        if !self.web_updates {
            return;
        }
        let Some(token) = &self.token else {
            return;
        };
        let state = json!({
            "score": self.game.score(),
            "playfield": self.game.playfield_codes(),
            "aiMode": self.ai_mode,
        });
        self.calls.push(RemoteCall::new(
            "blocks.updateState",
            vec![Value::String(token.clone()), state],
        ));
        if self.ai_mode {
            self.web_updates = false;
        }
    }
}

impl FrameGenerator for BlocksScene {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn render(&mut self, input: &FrameInput<'_>) -> Result<PixelFrame> {
        let now = input.now;
        self.last_input.get_or_insert(now);
        for game_input in self.read_inputs(input) {
            self.apply_input(&game_input, now);
        }

        let idle = self
            .last_input
            .map_or(Duration::ZERO, |last| now.duration_since(last));
        if !self.ai_mode && idle > AI_TIMEOUT {
            info!("no input for a while, advisor takes over");
            self.ai_mode = true;
        }

        // The advisor only plays while the sculpture can show it.
        if input.device_connected || !self.ai_mode {
            self.advance_game(now);
        }

        let frame = self.draw();
        self.publish_state();

        if self.game.lost() {
            info!(score = self.game.score(), "game over");
            let ai_mode = self.ai_mode;
            self.new_game();
            self.ai_mode = ai_mode;
        }
        Ok(frame)
    }

    fn drain_calls(&mut self) -> Vec<RemoteCall> {
        std::mem::take(&mut self.calls)
    }
}
