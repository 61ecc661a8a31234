//! The game core: one player's board, piece, and scoring state.
//!
//! Pure and deterministic — no I/O, no clocks. The runtime owns one `Game`
//! per player, seeded identically, so both boards draw the same piece
//! sequence; divergence comes only from the players' inputs.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Board height in rows.
pub const BOARD_ROWS: usize = 20;
/// Board width in columns.
pub const BOARD_COLS: usize = 10;

/// Points for clearing 0..=4 rows with one lock.
const LINE_SCORES: [u32; 5] = [0, 100, 300, 500, 800];

/// The seven shapes as 4×4 masks, indexed by shape id 0..=6.
/// Cells lock into the board as `shape_id + 1`, so occupants are 1..=7.
const SHAPES: [[[u8; 4]; 4]; 7] = [
    // I
    [[0, 1, 0, 0], [0, 1, 0, 0], [0, 1, 0, 0], [0, 1, 0, 0]],
    // T
    [[0, 1, 0, 0], [1, 1, 1, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
    // L
    [[0, 1, 0, 0], [0, 1, 0, 0], [0, 1, 1, 0], [0, 0, 0, 0]],
    // J
    [[0, 1, 0, 0], [0, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0]],
    // O
    [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
    // S
    [[0, 1, 1, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
    // Z
    [[1, 1, 0, 0], [0, 1, 1, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
];

/// A player action, as carried by `INPUT <ACTION>` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Left,
    Right,
    Down,
    Rotate,
    Drop,
    Hold,
}

impl std::str::FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "LEFT" => Ok(Self::Left),
            "RIGHT" => Ok(Self::Right),
            "DOWN" => Ok(Self::Down),
            "ROTATE" => Ok(Self::Rotate),
            "DROP" => Ok(Self::Drop),
            "HOLD" => Ok(Self::Hold),
            _ => Err(()),
        }
    }
}

/// The falling piece: a 4×4 mask plus its board position.
///
/// `x`/`y` are the mask's top-left corner and may sit outside the board as
/// long as every occupied cell is inside.
#[derive(Debug, Clone)]
struct Piece {
    cells: [[u8; 4]; 4],
    x: i32,
    y: i32,
    shape_id: usize,
}

/// One player's full game state.
#[derive(Debug, Clone)]
pub struct Game {
    board: [[u8; BOARD_COLS]; BOARD_ROWS],
    piece: Piece,
    score: u32,
    lines_cleared: u32,
    game_over: bool,
    hold_shape_id: Option<usize>,
    hold_used: bool,
    rng: StdRng,
    bag: Vec<usize>,
}

impl Game {
    /// Creates a game and spawns the first bag piece.
    pub fn new(seed: u64) -> Self {
        let mut game = Self {
            board: [[0; BOARD_COLS]; BOARD_ROWS],
            piece: Piece {
                cells: [[0; 4]; 4],
                x: 0,
                y: 0,
                shape_id: 0,
            },
            score: 0,
            lines_cleared: 0,
            game_over: false,
            hold_shape_id: None,
            hold_used: false,
            rng: StdRng::seed_from_u64(seed),
            bag: Vec::new(),
        };
        game.fill_bag();
        game.spawn_piece();
        game
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn lines_cleared(&self) -> u32 {
        self.lines_cleared
    }

    pub fn is_over(&self) -> bool {
        self.game_over
    }

    /// Forces the game over — used when the player's connection drops
    /// mid-match.
    pub fn set_over(&mut self) {
        self.game_over = true;
    }

    // -- Bag and spawning ---------------------------------------------------

    fn fill_bag(&mut self) {
        self.bag = (0..SHAPES.len()).collect();
        self.bag.shuffle(&mut self.rng);
    }

    /// Places `shape_id` at the spawn position. A collision right there
    /// means the stack has reached the top: game over.
    fn set_active_shape(&mut self, shape_id: usize) {
        self.piece = Piece {
            cells: SHAPES[shape_id],
            x: BOARD_COLS as i32 / 2 - 2,
            y: 0,
            shape_id,
        };
        if self.collides(self.piece.x, self.piece.y) {
            self.game_over = true;
        }
    }

    fn spawn_piece(&mut self) {
        if self.bag.is_empty() {
            self.fill_bag();
        }
        let next = self.bag.pop().expect("bag was just refilled");
        self.set_active_shape(next);
        self.hold_used = false;
    }

    // -- Collision and locking ----------------------------------------------

    /// Whether the piece mask at `(px, py)` hits a wall, the floor, or an
    /// occupied cell.
    fn collides(&self, px: i32, py: i32) -> bool {
        for r in 0..4 {
            for c in 0..4 {
                if self.piece.cells[r][c] == 0 {
                    continue;
                }
                let row = py + r as i32;
                let col = px + c as i32;
                if row < 0
                    || row >= BOARD_ROWS as i32
                    || col < 0
                    || col >= BOARD_COLS as i32
                    || self.board[row as usize][col as usize] != 0
                {
                    return true;
                }
            }
        }
        false
    }

    fn lock_piece(&mut self) {
        for r in 0..4 {
            for c in 0..4 {
                if self.piece.cells[r][c] != 0 {
                    let row = (self.piece.y + r as i32) as usize;
                    let col = (self.piece.x + c as i32) as usize;
                    self.board[row][col] = self.piece.shape_id as u8 + 1;
                }
            }
        }
        self.clear_lines();
        self.spawn_piece();
    }

    fn clear_lines(&mut self) {
        let mut cleared = 0usize;
        let mut r = BOARD_ROWS as i32 - 1;
        while r >= 0 {
            let row = r as usize;
            if self.board[row].iter().all(|&cell| cell != 0) {
                cleared += 1;
                for above in (1..=row).rev() {
                    self.board[above] = self.board[above - 1];
                }
                self.board[0] = [0; BOARD_COLS];
                // Re-check the same row: everything shifted down into it.
            } else {
                r -= 1;
            }
        }
        if cleared > 0 {
            self.lines_cleared += cleared as u32;
            self.score += LINE_SCORES[cleared];
        }
    }

    // -- Operations ---------------------------------------------------------

    /// One gravity step: descend, or lock on contact.
    pub fn tick(&mut self) {
        if self.game_over {
            return;
        }
        if !self.collides(self.piece.x, self.piece.y + 1) {
            self.piece.y += 1;
        } else {
            self.lock_piece();
        }
    }

    /// Applies one player action. Illegal moves are ignored.
    pub fn handle_input(&mut self, action: Action) {
        if self.game_over {
            return;
        }
        match action {
            Action::Left => {
                if !self.collides(self.piece.x - 1, self.piece.y) {
                    self.piece.x -= 1;
                }
            }
            Action::Right => {
                if !self.collides(self.piece.x + 1, self.piece.y) {
                    self.piece.x += 1;
                }
            }
            Action::Down => {
                if !self.collides(self.piece.x, self.piece.y + 1) {
                    self.piece.y += 1;
                    self.score += 1;
                } else {
                    self.lock_piece();
                }
            }
            Action::Rotate => self.rotate_piece(),
            Action::Drop => {
                let mut distance = 0u32;
                while !self.collides(self.piece.x, self.piece.y + 1) {
                    self.piece.y += 1;
                    distance += 1;
                }
                self.score += distance * 2;
                self.lock_piece();
            }
            Action::Hold => self.hold_piece(),
        }
    }

    /// 90° clockwise rotation with a minimal ±1-column wall kick.
    ///
    /// The rotation is committed first; if the result collides, the piece
    /// tries one column left, then one right, then reverts entirely.
    fn rotate_piece(&mut self) {
        let old = self.piece.cells;
        let mut rotated = [[0u8; 4]; 4];
        for (r, row) in old.iter().enumerate() {
            for (c, &cell) in row.iter().enumerate() {
                rotated[c][3 - r] = cell;
            }
        }
        self.piece.cells = rotated;

        if self.collides(self.piece.x, self.piece.y) {
            if !self.collides(self.piece.x - 1, self.piece.y) {
                self.piece.x -= 1;
            } else if !self.collides(self.piece.x + 1, self.piece.y) {
                self.piece.x += 1;
            } else {
                self.piece.cells = old;
            }
        }
    }

    /// Swaps the active piece with the held one (or stashes it and spawns
    /// the next bag piece). Usable once per spawned piece.
    fn hold_piece(&mut self) {
        if self.hold_used {
            return;
        }
        let current = self.piece.shape_id;
        match self.hold_shape_id.replace(current) {
            Some(held) => self.set_active_shape(held),
            None => self.spawn_piece(),
        }
        self.hold_used = true;
    }

    // -- Serialization ------------------------------------------------------

    /// The board with the active piece overlaid, one digit `'0'..'7'` per
    /// cell in row-major order — always exactly 200 characters.
    pub fn board_snapshot(&self) -> String {
        let mut view = self.board;
        for r in 0..4 {
            for c in 0..4 {
                if self.piece.cells[r][c] != 0 {
                    let row = self.piece.y + r as i32;
                    let col = self.piece.x + c as i32;
                    if (0..BOARD_ROWS as i32).contains(&row)
                        && (0..BOARD_COLS as i32).contains(&col)
                    {
                        view[row as usize][col as usize] = self.piece.shape_id as u8 + 1;
                    }
                }
            }
        }

        let mut out = String::with_capacity(BOARD_ROWS * BOARD_COLS);
        for row in &view {
            for &cell in row {
                out.push(char::from(b'0' + cell));
            }
        }
        out
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Clears the board and places a fresh piece of `shape_id`, bypassing
    /// the bag. Keeps tests independent of the shuffle.
    fn game_with_piece(shape_id: usize) -> Game {
        let mut g = Game::new(1);
        g.board = [[0; BOARD_COLS]; BOARD_ROWS];
        g.set_active_shape(shape_id);
        g
    }

    #[test]
    fn test_snapshot_is_200_digits() {
        let g = Game::new(42);
        let snap = g.board_snapshot();
        assert_eq!(snap.len(), 200);
        assert!(snap.chars().all(|c| ('0'..='7').contains(&c)));
        // The freshly spawned piece is visible.
        assert!(snap.chars().any(|c| c != '0'));
    }

    #[test]
    fn test_same_seed_same_piece_sequence() {
        let mut a = Game::new(7);
        let mut b = Game::new(7);
        for _ in 0..40 {
            a.handle_input(Action::Drop);
            b.handle_input(Action::Drop);
            assert_eq!(a.board_snapshot(), b.board_snapshot());
            assert_eq!(a.score(), b.score());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = Game::new(1);
        let mut b = Game::new(2);
        let mut same = true;
        for _ in 0..14 {
            a.handle_input(Action::Drop);
            b.handle_input(Action::Drop);
            if a.board_snapshot() != b.board_snapshot() {
                same = false;
            }
        }
        assert!(!same);
    }

    #[test]
    fn test_first_bag_is_a_permutation_of_all_seven() {
        let mut g = Game::new(99);
        let mut seen = vec![g.piece.shape_id];
        // Bag holds the other six; draining it yields each shape once.
        while !g.bag.is_empty() {
            seen.push(g.bag.pop().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_tick_descends_then_locks() {
        let mut g = game_with_piece(4); // O piece: rows 0-1, cols x..x+2
        let y0 = g.piece.y;
        g.tick();
        assert_eq!(g.piece.y, y0 + 1);

        // Drive it to the floor; the next tick locks and spawns.
        while !g.collides(g.piece.x, g.piece.y + 1) {
            g.piece.y += 1;
        }
        g.tick();
        assert_eq!(g.piece.y, 0, "a fresh piece spawned at the top");
        assert!(g.board[BOARD_ROWS - 1].iter().any(|&c| c == 5));
    }

    #[test]
    fn test_four_line_clear_scores_800() {
        let mut g = game_with_piece(0); // I piece occupies mask column 1
        // Fill the bottom four rows except the column the I will fall into.
        let gap = (g.piece.x + 1) as usize;
        for row in BOARD_ROWS - 4..BOARD_ROWS {
            for col in 0..BOARD_COLS {
                if col != gap {
                    g.board[row][col] = 1;
                }
            }
        }
        g.handle_input(Action::Drop);
        assert_eq!(g.lines_cleared(), 4);
        // 800 for the clear plus 2 per hard-drop row (16 rows of travel).
        assert_eq!(g.score(), 800 + 32);
        // Everything cleared away.
        assert!(g.board[BOARD_ROWS - 1].iter().take(BOARD_COLS).all(|&c| c == 0));
    }

    #[test]
    fn test_single_line_clear_scores_100() {
        let mut g = game_with_piece(0);
        let gap = (g.piece.x + 1) as usize;
        for col in 0..BOARD_COLS {
            if col != gap {
                g.board[BOARD_ROWS - 1][col] = 2;
            }
        }
        g.handle_input(Action::Drop);
        assert_eq!(g.lines_cleared(), 1);
        assert_eq!(g.score(), 100 + 32);
    }

    #[test]
    fn test_soft_drop_scores_one_and_locks_on_contact() {
        let mut g = game_with_piece(4);
        g.handle_input(Action::Down);
        assert_eq!(g.score(), 1);

        while !g.collides(g.piece.x, g.piece.y + 1) {
            g.piece.y += 1;
        }
        let score_before = g.score();
        g.handle_input(Action::Down); // on contact: lock, no point
        assert_eq!(g.score(), score_before);
        assert!(g.board.iter().flatten().any(|&c| c == 5));
    }

    #[test]
    fn test_horizontal_moves_respect_walls() {
        let mut g = game_with_piece(4); // O at cols x..x+2
        for _ in 0..BOARD_COLS {
            g.handle_input(Action::Left);
        }
        assert_eq!(g.piece.x, 0);
        for _ in 0..BOARD_COLS {
            g.handle_input(Action::Right);
        }
        assert_eq!(g.piece.x, BOARD_COLS as i32 - 2);
    }

    #[test]
    fn test_rotate_i_near_right_wall_kicks_left() {
        let mut g = game_with_piece(0);
        g.piece.x = 7; // vertical I in board column 8
        g.handle_input(Action::Rotate);
        // Horizontal I spans mask columns 0..4; the kick shifted it left.
        assert_eq!(g.piece.x, 6);
        assert_eq!(g.piece.cells[1], [1, 1, 1, 1]);
    }

    #[test]
    fn test_rotate_i_at_right_wall_reverts() {
        let mut g = game_with_piece(0);
        g.piece.x = 8; // vertical I in board column 9, flush to the wall
        let before = g.piece.cells;
        g.handle_input(Action::Rotate);
        assert_eq!(g.piece.cells, before);
        assert_eq!(g.piece.x, 8);
    }

    #[test]
    fn test_rotation_round_trips_in_open_space() {
        let mut g = game_with_piece(1); // T
        g.piece.y = 8; // well clear of spawn-row clipping
        let before = g.piece.cells;
        for _ in 0..4 {
            g.handle_input(Action::Rotate);
        }
        assert_eq!(g.piece.cells, before);
    }

    #[test]
    fn test_hold_stashes_then_swaps() {
        let mut g = Game::new(5);
        let first = g.piece.shape_id;
        g.handle_input(Action::Hold);
        assert_eq!(g.hold_shape_id, Some(first));
        let second = g.piece.shape_id;

        // Used this piece: a second hold is ignored.
        g.handle_input(Action::Hold);
        assert_eq!(g.piece.shape_id, second);

        // After the piece locks, hold swaps back to the stash.
        g.handle_input(Action::Drop);
        g.handle_input(Action::Hold);
        assert_eq!(g.piece.shape_id, first);
    }

    #[test]
    fn test_top_out_sets_game_over() {
        let mut g = game_with_piece(4);
        // Occupy the spawn area so the next spawn collides.
        for col in 0..BOARD_COLS {
            g.board[0][col] = 1;
            g.board[1][col] = 1;
        }
        g.spawn_piece();
        assert!(g.is_over());

        // A dead game ignores everything.
        let snap = g.board_snapshot();
        g.tick();
        g.handle_input(Action::Drop);
        assert_eq!(g.board_snapshot(), snap);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("LEFT".parse(), Ok(Action::Left));
        assert_eq!("DROP".parse(), Ok(Action::Drop));
        assert!("left".parse::<Action>().is_err());
        assert!("JUMP".parse::<Action>().is_err());
    }
}
