//! Falling-blocks rules: a fixed board, seven piece kinds drawn from a
//! shuffled bag, gravity, line clears and scoring.
//!
//! Row 0 is the top of the board and column 0 the left edge. Pieces are
//! described by mino offsets inside their bounding box; a piece's `row` and
//! `col` locate the top-left corner of that box.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

pub const BOARD_ROWS: usize = 18;
pub const BOARD_COLS: usize = 10;

/// Game ticks between gravity steps.
pub const GRAVITY_TICKS: u32 = 5;

const LINE_SCORES: [u64; 5] = [0, 100, 300, 500, 800];
const HARD_DROP_SCORE: u64 = 2;
const ROTATION_KICKS: [i32; 5] = [0, -1, 1, -2, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    I,
    J,
    L,
    O,
    S,
    T,
    Z,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        Self::I,
        Self::J,
        Self::L,
        Self::O,
        Self::S,
        Self::T,
        Self::Z,
    ];

    /// Cell value reported to the web client's playfield (0 is empty).
    pub fn code(self) -> u8 {
        match self {
            Self::I => 1,
            Self::J => 2,
            Self::L => 3,
            Self::O => 4,
            Self::S => 5,
            Self::T => 6,
            Self::Z => 7,
        }
    }

    pub fn colour(self) -> [u8; 3] {
        match self {
            Self::I => [255, 216, 0],
            Self::J => [255, 0, 0],
            Self::L => [0, 127, 0],
            Self::O => [75, 0, 130],
            Self::S => [100, 50, 0],
            Self::T => [0, 250, 171],
            Self::Z => [0, 100, 250],
        }
    }

    fn box_size(self) -> i32 {
        match self {
            Self::I => 4,
            Self::O => 2,
            _ => 3,
        }
    }

    fn spawn_minos(self) -> [(i32, i32); 4] {
        match self {
            Self::I => [(1, 0), (1, 1), (1, 2), (1, 3)],
            Self::J => [(0, 0), (1, 0), (1, 1), (1, 2)],
            Self::L => [(0, 2), (1, 0), (1, 1), (1, 2)],
            Self::O => [(0, 0), (0, 1), (1, 0), (1, 1)],
            Self::S => [(0, 1), (0, 2), (1, 0), (1, 1)],
            Self::T => [(0, 1), (1, 0), (1, 1), (1, 2)],
            Self::Z => [(0, 0), (0, 1), (1, 1), (1, 2)],
        }
    }

    /// Mino `(row, col)` offsets after `rotation` clockwise quarter turns.
    pub fn minos(self, rotation: u8) -> [(i32, i32); 4] {
        let n = self.box_size();
        let mut minos = self.spawn_minos();
        for _ in 0..rotation % 4 {
            minos = minos.map(|(row, col)| (col, n - 1 - row));
        }
        minos
    }
}

/// A piece's horizontal placement and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub col: i32,
    pub rotation: u8,
}

/// Max column height and covered empty cells of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardStats {
    pub max_height: usize,
    pub holes: usize,
}

/// Locked cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[Option<PieceKind>; BOARD_COLS]; BOARD_ROWS],
}

impl Default for Board {
    fn default() -> Self {
        Self {
            cells: [[None; BOARD_COLS]; BOARD_ROWS],
        }
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<PieceKind> {
        self.cells.get(row).and_then(|cells| cells.get(col)).copied().flatten()
    }

    pub fn set(&mut self, row: usize, col: usize, kind: Option<PieceKind>) {
        if let Some(cell) = self.cells.get_mut(row).and_then(|cells| cells.get_mut(col)) {
            *cell = kind;
        }
    }

    fn is_free(&self, row: i32, col: i32) -> bool {
        if row < 0 || col < 0 || row >= BOARD_ROWS as i32 || col >= BOARD_COLS as i32 {
            return false;
        }
        self.cells[row as usize][col as usize].is_none()
    }

    /// Whether a piece fits with its box at `(row, col)`.
    pub fn fits(&self, kind: PieceKind, rotation: u8, row: i32, col: i32) -> bool {
        kind.minos(rotation)
            .iter()
            .all(|(r, c)| self.is_free(row + r, col + c))
    }

    /// Whether every mino lands inside the board's columns.
    pub fn within_columns(kind: PieceKind, rotation: u8, col: i32) -> bool {
        kind.minos(rotation)
            .iter()
            .all(|(_, c)| (0..BOARD_COLS as i32).contains(&(col + c)))
    }

    /// Row the piece comes to rest at when dropped from the top of `col`.
    /// A piece that cannot even enter the board rests at the top.
    pub fn landing_row(&self, kind: PieceKind, rotation: u8, col: i32) -> i32 {
        let top = -kind.minos(rotation).iter().map(|(r, _)| *r).min().unwrap_or(0);
        let mut row = top;
        while self.fits(kind, rotation, row + 1, col) {
            row += 1;
        }
        row
    }

    /// Writes the piece's minos into the board, ignoring anything off-board.
    pub fn place(&mut self, kind: PieceKind, rotation: u8, row: i32, col: i32) {
        for (r, c) in kind.minos(rotation) {
            let (row, col) = (row + r, col + c);
            if row >= 0 && col >= 0 {
                self.set(row as usize, col as usize, Some(kind));
            }
        }
    }

    pub fn full_rows(&self) -> usize {
        self.cells
            .iter()
            .filter(|row| row.iter().all(Option::is_some))
            .count()
    }

    /// Removes full rows, shifting everything above them down.
    pub fn clear_lines(&mut self) -> usize {
        let kept: Vec<_> = self
            .cells
            .iter()
            .filter(|row| !row.iter().all(Option::is_some))
            .copied()
            .collect();
        let cleared = BOARD_ROWS - kept.len();
        let mut cells = [[None; BOARD_COLS]; BOARD_ROWS];
        for (target, row) in cells[cleared..].iter_mut().zip(kept) {
            *target = row;
        }
        self.cells = cells;
        cleared
    }

    pub fn stats(&self) -> BoardStats {
        let mut stats = BoardStats::default();
        for col in 0..BOARD_COLS {
            let Some(top) = (0..BOARD_ROWS).find(|&row| self.cells[row][col].is_some()) else {
                continue;
            };
            stats.max_height = stats.max_height.max(BOARD_ROWS - top);
            stats.holes += (top..BOARD_ROWS)
                .filter(|&row| self.cells[row][col].is_none())
                .count();
        }
        stats
    }
}

/// The falling piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePiece {
    pub kind: PieceKind,
    pub rotation: u8,
    pub row: i32,
    pub col: i32,
    /// Increases with every spawned piece, across restarts.
    pub serial: u64,
}

impl ActivePiece {
    pub fn placement(&self) -> Move {
        Move {
            col: self.col,
            rotation: self.rotation,
        }
    }
}

/// A locked piece together with the board it was dropped onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub board: Board,
    pub kind: PieceKind,
    pub chosen: Move,
}

/// One game in progress.
pub struct Game {
    board: Board,
    piece: ActivePiece,
    bag: Vec<PieceKind>,
    rng: StdRng,
    score: u64,
    lost: bool,
    ticks_since_fall: u32,
    next_serial: u64,
    placements: Vec<Placement>,
}

impl Game {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        let mut game = Self {
            board: Board::new(),
            piece: ActivePiece {
                kind: PieceKind::O,
                rotation: 0,
                row: 0,
                col: 0,
                serial: 0,
            },
            bag: Vec::new(),
            rng,
            score: 0,
            lost: false,
            ticks_since_fall: 0,
            next_serial: 0,
            placements: Vec::new(),
        };
        game.spawn();
        game
    }

    /// Starts over with an empty board. Piece serials keep counting up.
    pub fn restart(&mut self) {
        self.board = Board::new();
        self.bag.clear();
        self.score = 0;
        self.lost = false;
        self.ticks_since_fall = 0;
        self.placements.clear();
        self.spawn();
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn piece(&self) -> ActivePiece {
        self.piece
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn lost(&self) -> bool {
        self.lost
    }

    /// Board cells with the falling piece drawn in.
    pub fn playfield(&self) -> Board {
        let mut field = self.board.clone();
        if !self.lost {
            let piece = self.piece;
            field.place(piece.kind, piece.rotation, piece.row, piece.col);
        }
        field
    }

    /// Playfield as rows of piece codes.
    pub fn playfield_codes(&self) -> Vec<Vec<u8>> {
        let field = self.playfield();
        (0..BOARD_ROWS)
            .map(|row| {
                (0..BOARD_COLS)
                    .map(|col| field.get(row, col).map_or(0, PieceKind::code))
                    .collect()
            })
            .collect()
    }

    /// Pieces locked since the last call.
    pub fn take_placements(&mut self) -> Vec<Placement> {
        std::mem::take(&mut self.placements)
    }

    pub fn left(&mut self) -> bool {
        self.shift(-1)
    }

    pub fn right(&mut self) -> bool {
        self.shift(1)
    }

    pub fn rotate(&mut self) -> bool {
        if self.lost {
            return false;
        }
        let piece = self.piece;
        let rotation = (piece.rotation + 1) % 4;
        for kick in ROTATION_KICKS {
            if self.board.fits(piece.kind, rotation, piece.row, piece.col + kick) {
                self.piece.rotation = rotation;
                self.piece.col += kick;
                return true;
            }
        }
        false
    }

    pub fn hard_drop(&mut self) {
        if self.lost {
            return;
        }
        let piece = self.piece;
        let mut distance = 0;
        while self.board.fits(piece.kind, piece.rotation, piece.row + distance + 1, piece.col) {
            distance += 1;
        }
        self.piece.row += distance;
        self.score += HARD_DROP_SCORE * distance as u64;
        self.lock();
    }

    /// Advances gravity by one game tick.
    pub fn tick(&mut self) {
        if self.lost {
            return;
        }
        self.ticks_since_fall += 1;
        if self.ticks_since_fall < GRAVITY_TICKS {
            return;
        }
        self.ticks_since_fall = 0;
        let piece = self.piece;
        if self.board.fits(piece.kind, piece.rotation, piece.row + 1, piece.col) {
            self.piece.row += 1;
        } else {
            self.lock();
        }
    }

    fn shift(&mut self, delta: i32) -> bool {
        let piece = self.piece;
        if self.lost || !self.board.fits(piece.kind, piece.rotation, piece.row, piece.col + delta) {
            return false;
        }
        self.piece.col += delta;
        true
    }

    fn lock(&mut self) {
        let piece = self.piece;
        self.placements.push(Placement {
            board: self.board.clone(),
            kind: piece.kind,
            chosen: piece.placement(),
        });
        self.board.place(piece.kind, piece.rotation, piece.row, piece.col);
        let cleared = self.board.clear_lines();
        self.score += LINE_SCORES[cleared.min(4)];
        self.ticks_since_fall = 0;
        self.spawn();
    }

    fn spawn(&mut self) {
        if self.bag.is_empty() {
            self.bag = PieceKind::ALL.to_vec();
            self.bag.shuffle(&mut self.rng);
        }
        let kind = self.bag.pop().unwrap_or(PieceKind::T);
        let col = (BOARD_COLS as i32 - kind.box_size()) / 2;
        let row = -kind.minos(0).iter().map(|(r, _)| *r).min().unwrap_or(0);
        self.piece = ActivePiece {
            kind,
            rotation: 0,
            row,
            col,
            serial: self.next_serial,
        };
        self.next_serial += 1;
        if !self.board.fits(kind, 0, row, col) {
            self.lost = true;
        }
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}
