//! Board representation and win detection
//!
//! The board is a flat, row-major vector of `size * size` cells. Win
//! detection only examines the four line directions through the most
//! recent placement, since any new winning run must pass through it.

use std::fmt;

/// A player symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    /// The other symbol.
    pub fn opponent(self) -> Symbol {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }

    /// Parse a wire/storage token ("X" or "O").
    pub fn from_token(token: &str) -> Option<Symbol> {
        match token {
            "X" => Some(Symbol::X),
            "O" => Some(Symbol::O),
            _ => None,
        }
    }

    /// Stable token form, used in storage rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::X => "X",
            Symbol::O => "O",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A square board of side `size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    size: usize,
    cells: Vec<Option<Symbol>>,
}

impl Board {
    /// Create an empty board with `size * size` cells.
    pub fn empty(size: usize) -> Board {
        Board {
            size,
            cells: vec![None; size * size],
        }
    }

    /// Side length of the board.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Contents of a cell. Index must be within `0..cell_count()`.
    pub fn cell(&self, index: usize) -> Option<Symbol> {
        self.cells[index]
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[Option<Symbol>] {
        &self.cells
    }

    /// Place a symbol. Index must be within bounds; legality checks belong
    /// to `apply_move`.
    pub fn place(&mut self, index: usize, symbol: Symbol) {
        self.cells[index] = Some(symbol);
    }

    /// True once every cell is occupied.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|cell| cell.is_some())
    }

    /// Encode as a storage string: one char per cell, 'X', 'O', or '.'.
    pub fn to_text(&self) -> String {
        self.cells
            .iter()
            .map(|cell| match cell {
                Some(Symbol::X) => 'X',
                Some(Symbol::O) => 'O',
                None => '.',
            })
            .collect()
    }

    /// Decode the storage string form. Returns None if the length does not
    /// match `size * size` or a cell char is unrecognized.
    pub fn from_text(size: usize, text: &str) -> Option<Board> {
        if text.len() != size * size {
            return None;
        }

        let mut cells = Vec::with_capacity(size * size);
        for c in text.chars() {
            match c {
                'X' => cells.push(Some(Symbol::X)),
                'O' => cells.push(Some(Symbol::O)),
                '.' => cells.push(None),
                _ => return None,
            }
        }

        Some(Board { size, cells })
    }

    /// Find a winning run of at least `win_length` through `last_index`.
    ///
    /// Checks the four line directions through the last-played cell:
    /// horizontal, vertical, and both diagonals. For each, walks backward
    /// then forward accumulating contiguous same-symbol cells bounded by the
    /// board edges. Returns the run's cell indices in line-traversal order,
    /// or an empty vector when no direction reaches `win_length`.
    pub fn detect_winning_line(&self, win_length: usize, last_index: usize) -> Vec<usize> {
        let symbol = match self.cells.get(last_index).copied().flatten() {
            Some(symbol) => symbol,
            None => return Vec::new(),
        };

        let size = self.size as i64;
        let row = last_index as i64 / size;
        let col = last_index as i64 % size;

        const DIRECTIONS: [(i64, i64); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

        for (dr, dc) in DIRECTIONS {
            let mut line = Vec::new();

            // Walk backward first, then reverse, so the collected indices
            // read in traversal order along the line.
            let (mut r, mut c) = (row - dr, col - dc);
            while self.holds(r, c, symbol) {
                line.push((r * size + c) as usize);
                r -= dr;
                c -= dc;
            }
            line.reverse();
            line.push(last_index);

            let (mut r, mut c) = (row + dr, col + dc);
            while self.holds(r, c, symbol) {
                line.push((r * size + c) as usize);
                r += dr;
                c += dc;
            }

            if line.len() >= win_length {
                return line;
            }
        }

        Vec::new()
    }

    fn holds(&self, row: i64, col: i64, symbol: Symbol) -> bool {
        let size = self.size as i64;
        row >= 0
            && row < size
            && col >= 0
            && col < size
            && self.cells[(row * size + col) as usize] == Some(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_from(size: usize, text: &str) -> Board {
        Board::from_text(size, text).expect("valid board text")
    }

    #[test]
    fn test_empty_board() {
        let board = Board::empty(3);
        assert_eq!(board.cell_count(), 9);
        assert!(!board.is_full());
        assert_eq!(board.to_text(), ".........");
    }

    #[test]
    fn test_text_roundtrip() {
        let mut board = Board::empty(3);
        board.place(0, Symbol::X);
        board.place(4, Symbol::O);
        assert_eq!(board.to_text(), "X...O....");
        assert_eq!(Board::from_text(3, "X...O...."), Some(board));
    }

    #[test]
    fn test_from_text_rejects_bad_input() {
        assert_eq!(Board::from_text(3, "X...O..."), None); // too short
        assert_eq!(Board::from_text(3, "X...Z...."), None); // bad char
    }

    #[test]
    fn test_horizontal_win_detected() {
        let board = board_from(3, "XXX.OO...");
        assert_eq!(board.detect_winning_line(3, 1), vec![0, 1, 2]);
    }

    #[test]
    fn test_vertical_win_detected() {
        let board = board_from(3, "X.OX.OX..");
        assert_eq!(board.detect_winning_line(3, 6), vec![0, 3, 6]);
    }

    #[test]
    fn test_diagonal_win_detected() {
        let board = board_from(3, "XO..XO..X");
        assert_eq!(board.detect_winning_line(3, 8), vec![0, 4, 8]);
    }

    #[test]
    fn test_anti_diagonal_win_detected() {
        let board = board_from(3, "O.X.X.X.O");
        assert_eq!(board.detect_winning_line(3, 4), vec![2, 4, 6]);
    }

    #[test]
    fn test_anti_diagonal_on_6x6() {
        // X at indices 4, 9, 14, 19, 24; last placement in the middle.
        let mut board = Board::empty(6);
        for index in [4, 9, 19, 24, 14] {
            board.place(index, Symbol::X);
        }
        assert_eq!(board.detect_winning_line(5, 14), vec![4, 9, 14, 19, 24]);
    }

    #[test]
    fn test_run_shorter_than_win_length_is_no_win() {
        let board = board_from(5, "XXX......................");
        assert!(board.detect_winning_line(4, 2).is_empty());
    }

    #[test]
    fn test_run_longer_than_win_length_is_reported_whole() {
        let mut board = Board::empty(5);
        for index in [0, 1, 3, 4, 2] {
            board.place(index, Symbol::O);
        }
        assert_eq!(board.detect_winning_line(4, 2), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_opponent_cells_break_the_run() {
        let board = board_from(5, "XXOXX....................");
        assert!(board.detect_winning_line(3, 3).is_empty());
    }

    #[test]
    fn test_empty_last_cell_is_no_win() {
        let board = board_from(3, "XX.......");
        assert!(board.detect_winning_line(3, 2).is_empty());
    }

    #[test]
    fn test_symbol_tokens() {
        assert_eq!(Symbol::from_token("X"), Some(Symbol::X));
        assert_eq!(Symbol::from_token("O"), Some(Symbol::O));
        assert_eq!(Symbol::from_token("x"), None);
        assert_eq!(Symbol::from_token(""), None);
        assert_eq!(Symbol::X.opponent(), Symbol::O);
        assert_eq!(Symbol::O.opponent(), Symbol::X);
    }
}
