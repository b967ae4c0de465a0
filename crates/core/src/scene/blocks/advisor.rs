//! Move suggestions for the unattended game.
//!
//! The advisor learns from where players put their pieces and, once nobody
//! is playing, proposes where the current piece should go. It runs on its own
//! thread; finished suggestions are published through a [`MoveSlot`].

use std::sync::{mpsc, Arc, Mutex};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, error, info};

use super::game::{Board, BoardStats, Move, PieceKind, Placement};
use crate::{Result, StarsError};

const FEATURES: usize = 3;

type Features = [f64; FEATURES];

/// A piece about to be placed on a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub board: Board,
    pub kind: PieceKind,
}

/// Learns from player placements and suggests placements.
pub trait MoveAdvisor: Send {
    fn learn(&mut self, placement: &Placement);

    fn suggest(&mut self, position: &Position) -> Option<Move>;

    /// Forgets everything learned so far.
    fn reset(&mut self);
}

/// Every horizontal position and rotation that keeps the piece on the board.
pub fn possible_moves(kind: PieceKind) -> Vec<Move> {
    let mut moves = Vec::new();
    for rotation in 0..4u8 {
        for col in -3..BOARD_WIDTH {
            if Board::within_columns(kind, rotation, col) {
                moves.push(Move { col, rotation });
            }
        }
    }
    moves
}

const BOARD_WIDTH: i32 = super::game::BOARD_COLS as i32;

/// Height change, hole change and completed rows if `kind` were dropped
/// with `mv`.
pub fn move_features(board: &Board, kind: PieceKind, mv: Move, before: BoardStats) -> Features {
    let row = board.landing_row(kind, mv.rotation, mv.col);
    let mut after = board.clone();
    after.place(kind, mv.rotation, row, mv.col);
    let stats = after.stats();
    [
        stats.max_height as f64 - before.max_height as f64,
        stats.holes as f64 - before.holes as f64,
        after.full_rows() as f64,
    ]
}

/// Running mean and variance of each feature for one class.
#[derive(Debug, Clone, Default)]
struct ClassStats {
    count: f64,
    mean: Features,
    m2: Features,
}

impl ClassStats {
    fn update(&mut self, x: &Features) {
        self.count += 1.0;
        for i in 0..FEATURES {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / self.count;
            self.m2[i] += delta * (x[i] - self.mean[i]);
        }
    }

    fn variance(&self, i: usize) -> f64 {
        if self.count > 1.0 {
            self.m2[i] / (self.count - 1.0)
        } else {
            0.0
        }
    }

    fn log_likelihood(&self, x: &Features) -> f64 {
        (0..FEATURES)
            .map(|i| {
                let variance = self.variance(i);
                if variance > 0.0 {
                    let diff = x[i] - self.mean[i];
                    -0.5 * (std::f64::consts::TAU * variance).ln() - diff * diff / (2.0 * variance)
                } else if x[i] == self.mean[i] {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            })
            .sum()
    }
}

/// Online Gaussian naive Bayes over two classes: moves players chose and
/// moves they passed over.
#[derive(Debug, Clone, Default)]
pub struct GaussianNb {
    chosen: ClassStats,
    passed: ClassStats,
}

impl GaussianNb {
    pub fn learn(&mut self, x: &Features, chosen: bool) {
        if chosen {
            self.chosen.update(x);
        } else {
            self.passed.update(x);
        }
    }

    /// Posterior probability that `x` is a chosen move. Zero before any
    /// training.
    pub fn probability_chosen(&self, x: &Features) -> f64 {
        let total = self.chosen.count + self.passed.count;
        if total == 0.0 {
            return 0.0;
        }
        let joint = |class: &ClassStats| {
            if class.count == 0.0 {
                f64::NEG_INFINITY
            } else {
                (class.count / total).ln() + class.log_likelihood(x)
            }
        };
        let chosen = joint(&self.chosen);
        let passed = joint(&self.passed);
        let max = chosen.max(passed);
        if max == f64::NEG_INFINITY {
            return 0.0;
        }
        let chosen = (chosen - max).exp();
        chosen / (chosen + (passed - max).exp())
    }
}

/// [`MoveAdvisor`] backed by [`GaussianNb`]; equally good moves are picked
/// at random.
pub struct NaiveBayesAdvisor {
    model: GaussianNb,
    rng: StdRng,
}

impl NaiveBayesAdvisor {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            model: GaussianNb::default(),
            rng,
        }
    }
}

impl Default for NaiveBayesAdvisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveAdvisor for NaiveBayesAdvisor {
    fn learn(&mut self, placement: &Placement) {
        let before = placement.board.stats();
        for mv in possible_moves(placement.kind) {
            let x = move_features(&placement.board, placement.kind, mv, before);
            self.model.learn(&x, mv == placement.chosen);
        }
        debug!(kind = ?placement.kind, chosen = ?placement.chosen, "learned placement");
    }

    fn suggest(&mut self, position: &Position) -> Option<Move> {
        let before = position.board.stats();
        let scored: Vec<(Move, f64)> = possible_moves(position.kind)
            .into_iter()
            .map(|mv| {
                let x = move_features(&position.board, position.kind, mv, before);
                (mv, self.model.probability_chosen(&x))
            })
            .collect();
        let best = scored.iter().map(|(_, score)| *score).fold(f64::NEG_INFINITY, f64::max);
        let candidates: Vec<Move> = scored
            .into_iter()
            .filter(|(_, score)| *score == best)
            .map(|(mv, _)| mv)
            .collect();
        candidates.choose(&mut self.rng).copied()
    }

    fn reset(&mut self) {
        self.model = GaussianNb::default();
    }
}

/// A suggestion for the piece with the given serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suggestion {
    pub piece: u64,
    pub mv: Move,
}

/// Single shared move suggestion. Readers always see a whole suggestion,
/// never a rotation from one and a column from another.
#[derive(Debug, Default)]
pub struct MoveSlot {
    current: Mutex<Option<Suggestion>>,
}

impl MoveSlot {
    pub fn get(&self) -> Option<Suggestion> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(_) => {
                error!("move slot has been poisoned");
                None
            }
        }
    }

    pub fn set(&self, suggestion: Option<Suggestion>) {
        match self.current.lock() {
            Ok(mut current) => *current = suggestion,
            Err(_) => error!("move slot has been poisoned"),
        }
    }

    /// The suggestion, if it was made for piece `serial`.
    pub fn for_piece(&self, serial: u64) -> Option<Move> {
        self.get()
            .filter(|suggestion| suggestion.piece == serial)
            .map(|suggestion| suggestion.mv)
    }
}

enum Job {
    Learn(Placement),
    Suggest { piece: u64, position: Position },
    Reset,
}

/// Runs a [`MoveAdvisor`] on a background thread.
///
/// Dropping the worker closes its job queue and detaches the thread, which
/// exits once the job in progress finishes.
pub struct AdvisorWorker {
    jobs: Option<mpsc::Sender<Job>>,
    slot: Arc<MoveSlot>,
}

impl AdvisorWorker {
    pub fn spawn(mut advisor: Box<dyn MoveAdvisor>) -> Result<Self> {
        let (jobs, rx) = mpsc::channel::<Job>();
        let slot = Arc::new(MoveSlot::default());
        let thread_slot = slot.clone();
        std::thread::Builder::new()
            .name("move-advisor".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Learn(placement) => advisor.learn(&placement),
                        Job::Suggest { piece, position } => {
                            if let Some(mv) = advisor.suggest(&position) {
                                thread_slot.set(Some(Suggestion { piece, mv }));
                            }
                        }
                        Job::Reset => {
                            advisor.reset();
                            info!("move advisor reset");
                        }
                    }
                }
                debug!("move advisor stopped");
            })?;
        Ok(Self {
            jobs: Some(jobs),
            slot,
        })
    }

    pub fn slot(&self) -> &MoveSlot {
        &self.slot
    }

    pub fn learn(&self, placement: Placement) {
        self.send(Job::Learn(placement));
    }

    pub fn suggest(&self, piece: u64, position: Position) {
        self.send(Job::Suggest { piece, position });
    }

    pub fn reset(&self) {
        self.slot.set(None);
        self.send(Job::Reset);
    }

    fn send(&self, job: Job) {
        let sent = self
            .jobs
            .as_ref()
            .ok_or_else(|| StarsError::msg("advisor stopped"))
            .and_then(|jobs| jobs.send(job).map_err(|_| StarsError::msg("advisor thread exited")));
        if let Err(e) = sent {
            error!(error = %e, "move advisor unavailable");
        }
    }
}

impl Drop for AdvisorWorker {
    fn drop(&mut self) {
        self.jobs.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::blocks::game::{BOARD_COLS, BOARD_ROWS};
    use std::time::{Duration, Instant};

    fn floor_with_gap(gap: usize) -> Board {
        let mut board = Board::new();
        for col in (0..BOARD_COLS).filter(|&col| col != gap) {
            board.set(BOARD_ROWS - 1, col, Some(PieceKind::Z));
        }
        board
    }

    #[test]
    fn enumerates_on_board_moves() {
        let moves = possible_moves(PieceKind::O);
        assert_eq!(moves.len(), 4 * 9);
        assert!(moves.iter().all(|mv| Board::within_columns(PieceKind::O, mv.rotation, mv.col)));

        // Horizontal I fits 7 ways, vertical I fits 10 ways.
        assert_eq!(possible_moves(PieceKind::I).len(), 7 + 10 + 7 + 10);
    }

    #[test]
    fn features_measure_drop_outcome() {
        let board = floor_with_gap(0);
        let before = board.stats();
        let vertical_i = Move { col: -2, rotation: 1 };
        let x = move_features(&board, PieceKind::I, vertical_i, before);
        assert_eq!(x, [3.0, 0.0, 1.0]);
    }

    #[test]
    fn untrained_model_scores_zero() {
        let model = GaussianNb::default();
        assert_eq!(model.probability_chosen(&[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn learns_to_prefer_chosen_features() {
        let mut model = GaussianNb::default();
        for i in 0..20 {
            let jitter = (i % 3) as f64 * 0.1;
            model.learn(&[0.0 + jitter, 0.0, 1.0], true);
            model.learn(&[3.0 + jitter, 2.0, 0.0], false);
            model.learn(&[4.0 - jitter, 1.0, 0.0], false);
        }
        assert!(model.probability_chosen(&[0.1, 0.0, 1.0]) > 0.9);
        assert!(model.probability_chosen(&[3.5, 2.0, 0.0]) < 0.1);
    }

    #[test]
    fn advisor_repeats_a_consistent_player() {
        let mut advisor = NaiveBayesAdvisor::with_rng(StdRng::seed_from_u64(3));
        let board = floor_with_gap(0);
        let chosen = Move { col: -2, rotation: 1 };
        for _ in 0..5 {
            advisor.learn(&Placement {
                board: board.clone(),
                kind: PieceKind::I,
                chosen,
            });
        }
        let suggestion = advisor
            .suggest(&Position {
                board: board.clone(),
                kind: PieceKind::I,
            })
            .unwrap();

        // Both vertical orientations fill the gap identically.
        let before = board.stats();
        assert_eq!(
            move_features(&board, PieceKind::I, suggestion, before),
            move_features(&board, PieceKind::I, chosen, before)
        );
    }

    #[test]
    fn untrained_advisor_still_suggests_a_valid_move() {
        let mut advisor = NaiveBayesAdvisor::with_rng(StdRng::seed_from_u64(3));
        let mv = advisor
            .suggest(&Position {
                board: Board::new(),
                kind: PieceKind::T,
            })
            .unwrap();
        assert!(possible_moves(PieceKind::T).contains(&mv));
    }

    #[test]
    fn slot_only_hands_out_moves_for_the_current_piece() {
        let slot = MoveSlot::default();
        let mv = Move { col: 2, rotation: 1 };
        slot.set(Some(Suggestion { piece: 4, mv }));
        assert_eq!(slot.for_piece(4), Some(mv));
        assert_eq!(slot.for_piece(5), None);
    }

    #[test]
    fn worker_publishes_suggestions() {
        let worker = AdvisorWorker::spawn(Box::new(NaiveBayesAdvisor::with_rng(
            StdRng::seed_from_u64(9),
        )))
        .unwrap();
        worker.suggest(
            11,
            Position {
                board: Board::new(),
                kind: PieceKind::S,
            },
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.slot().for_piece(11).is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.slot().for_piece(11).is_some());

        worker.reset();
        assert_eq!(worker.slot().get(), None);
    }

    struct SlowAdvisor {
        finished: Arc<Mutex<bool>>,
    }

    impl MoveAdvisor for SlowAdvisor {
        fn learn(&mut self, _placement: &Placement) {}

        fn suggest(&mut self, _position: &Position) -> Option<Move> {
            std::thread::sleep(Duration::from_millis(500));
            if let Ok(mut finished) = self.finished.lock() {
                *finished = true;
            }
            None
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn dropping_worker_does_not_wait_for_busy_advisor() {
        let finished = Arc::new(Mutex::new(false));
        let worker = AdvisorWorker::spawn(Box::new(SlowAdvisor {
            finished: finished.clone(),
        }))
        .unwrap();
        worker.suggest(
            1,
            Position {
                board: Board::new(),
                kind: PieceKind::T,
            },
        );
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        drop(worker);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!*finished.lock().unwrap());
    }
}
