//! Battleship board
//!
//! Two grids per board: the hidden grid knows where ships are, the display
//! grid is what an opponent or spectator may see (hits and misses only).
//! Cells are '.' water, 'S' ship, 'X' hit, 'o' miss.

use rand::Rng;

use crate::config::{BOARD_SIZE, SHIPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    /// Parse the setup dialogue's 'H' / 'V' token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "H" => Some(Self::Horizontal),
            "V" => Some(Self::Vertical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shot {
    Hit,
    Miss,
    AlreadyShot,
}

#[derive(Debug, Clone)]
struct PlacedShip {
    name: &'static str,
    /// Cells not yet hit.
    positions: Vec<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct Board {
    size: usize,
    hidden: Vec<Vec<char>>,
    display: Vec<Vec<char>>,
    ships: Vec<PlacedShip>,
}

impl Board {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            hidden: vec![vec!['.'; size]; size],
            display: vec![vec!['.'; size]; size],
            ships: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether a ship of `len` cells fits at (row, col) without running off
    /// the board or crossing another ship.
    pub fn can_place(&self, row: usize, col: usize, len: usize, orientation: Orientation) -> bool {
        match orientation {
            Orientation::Horizontal => {
                if col + len > self.size {
                    return false;
                }
                (col..col + len).all(|c| self.hidden[row][c] == '.')
            }
            Orientation::Vertical => {
                if row + len > self.size {
                    return false;
                }
                (row..row + len).all(|r| self.hidden[r][col] == '.')
            }
        }
    }

    /// Place a ship, returning the cells it occupies. Callers check
    /// `can_place` first.
    pub fn place(
        &mut self,
        name: &'static str,
        row: usize,
        col: usize,
        len: usize,
        orientation: Orientation,
    ) -> Vec<(usize, usize)> {
        let cells: Vec<(usize, usize)> = match orientation {
            Orientation::Horizontal => (col..col + len).map(|c| (row, c)).collect(),
            Orientation::Vertical => (row..row + len).map(|r| (r, col)).collect(),
        };
        for &(r, c) in &cells {
            self.hidden[r][c] = 'S';
        }
        self.ships.push(PlacedShip {
            name,
            positions: cells.clone(),
        });
        cells
    }

    /// Place every ship still missing from the fixed fleet at random.
    pub fn place_remaining_randomly(&mut self) {
        let mut rng = rand::thread_rng();
        for (name, len) in SHIPS {
            if self.ships.iter().any(|s| s.name == name) {
                continue;
            }
            loop {
                let orientation = if rng.gen_bool(0.5) {
                    Orientation::Horizontal
                } else {
                    Orientation::Vertical
                };
                let row = rng.gen_range(0..self.size);
                let col = rng.gen_range(0..self.size);
                if self.can_place(row, col, len, orientation) {
                    self.place(name, row, col, len, orientation);
                    break;
                }
            }
        }
    }

    /// Names of fleet ships not yet placed, in fleet order.
    pub fn missing_ships(&self) -> Vec<(&'static str, usize)> {
        SHIPS
            .iter()
            .filter(|(name, _)| !self.ships.iter().any(|s| s.name == *name))
            .copied()
            .collect()
    }

    /// Resolve a shot at (row, col).
    pub fn fire_at(&mut self, row: usize, col: usize) -> (Shot, Option<&'static str>) {
        match self.hidden[row][col] {
            'S' => {
                self.hidden[row][col] = 'X';
                self.display[row][col] = 'X';
                (Shot::Hit, self.mark_hit_and_check_sunk(row, col))
            }
            '.' => {
                self.hidden[row][col] = 'o';
                self.display[row][col] = 'o';
                (Shot::Miss, None)
            }
            _ => (Shot::AlreadyShot, None),
        }
    }

    fn mark_hit_and_check_sunk(&mut self, row: usize, col: usize) -> Option<&'static str> {
        for ship in &mut self.ships {
            if let Some(pos) = ship.positions.iter().position(|&p| p == (row, col)) {
                ship.positions.swap_remove(pos);
                if ship.positions.is_empty() {
                    return Some(ship.name);
                }
                return None;
            }
        }
        None
    }

    pub fn all_sunk(&self) -> bool {
        !self.ships.is_empty() && self.ships.iter().all(|s| s.positions.is_empty())
    }

    pub fn is_shot(&self, row: usize, col: usize) -> bool {
        matches!(self.hidden[row][col], 'X' | 'o')
    }

    /// Render the grid block sent over the wire: a column-number header line
    /// then one lettered row per line. `reveal_ships` selects the hidden grid
    /// (own-board view); spectators and opponents always get the scrubbed
    /// display grid.
    pub fn render(&self, reveal_ships: bool) -> String {
        let grid = if reveal_ships { &self.hidden } else { &self.display };
        let mut out = String::new();
        out.push_str("+  ");
        for i in 1..=self.size {
            out.push_str(&i.to_string());
            if i < self.size {
                out.push(' ');
            }
        }
        out.push('\n');
        for (r, row) in grid.iter().enumerate() {
            let label = (b'A' + r as u8) as char;
            out.push(label);
            out.push_str("  ");
            for (c, cell) in row.iter().enumerate() {
                out.push(*cell);
                if c < self.size - 1 {
                    out.push(' ');
                }
            }
            out.push('\n');
        }
        out
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(BOARD_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_respects_bounds() {
        let board = Board::default();
        assert!(board.can_place(0, 6, 4, Orientation::Horizontal));
        assert!(!board.can_place(0, 7, 4, Orientation::Horizontal));
        assert!(board.can_place(6, 0, 4, Orientation::Vertical));
        assert!(!board.can_place(7, 0, 4, Orientation::Vertical));
    }

    #[test]
    fn placement_rejects_overlap() {
        let mut board = Board::default();
        board.place("Cruiser", 2, 2, 3, Orientation::Horizontal);
        assert!(!board.can_place(2, 3, 2, Orientation::Horizontal));
        assert!(!board.can_place(0, 4, 3, Orientation::Vertical));
        assert!(board.can_place(3, 2, 3, Orientation::Horizontal));
    }

    #[test]
    fn fire_resolution() {
        let mut board = Board::default();
        board.place("Destroyer", 0, 0, 2, Orientation::Horizontal);

        assert_eq!(board.fire_at(5, 5), (Shot::Miss, None));
        assert_eq!(board.fire_at(0, 0), (Shot::Hit, None));
        assert_eq!(board.fire_at(0, 0), (Shot::AlreadyShot, None));
        assert_eq!(board.fire_at(5, 5), (Shot::AlreadyShot, None));
        assert!(board.is_shot(0, 0));
        assert!(board.is_shot(5, 5));
        assert!(!board.is_shot(9, 9));
    }

    #[test]
    fn sinking_reports_ship_name() {
        let mut board = Board::default();
        board.place("Carrier", 0, 0, 5, Orientation::Horizontal);

        for col in 0..4 {
            assert_eq!(board.fire_at(0, col), (Shot::Hit, None));
        }
        assert_eq!(board.fire_at(0, 4), (Shot::Hit, Some("Carrier")));
        assert!(board.all_sunk());
    }

    #[test]
    fn all_sunk_needs_every_ship_down() {
        let mut board = Board::default();
        board.place("Destroyer", 0, 0, 2, Orientation::Horizontal);
        board.place("Submarine", 5, 5, 3, Orientation::Vertical);

        board.fire_at(0, 0);
        board.fire_at(0, 1);
        assert!(!board.all_sunk());

        board.fire_at(5, 5);
        board.fire_at(6, 5);
        board.fire_at(7, 5);
        assert!(board.all_sunk());
    }

    #[test]
    fn empty_board_is_not_sunk() {
        assert!(!Board::default().all_sunk());
    }

    #[test]
    fn random_fill_places_whole_fleet() {
        let mut board = Board::default();
        board.place_remaining_randomly();
        assert!(board.missing_ships().is_empty());

        let ship_cells: usize = board
            .hidden
            .iter()
            .flatten()
            .filter(|&&c| c == 'S')
            .count();
        assert_eq!(ship_cells, 5 + 4 + 3 + 3 + 2);
    }

    #[test]
    fn random_fill_skips_already_placed() {
        let mut board = Board::default();
        board.place("Carrier", 0, 0, 5, Orientation::Horizontal);
        board.place_remaining_randomly();
        assert!(board.missing_ships().is_empty());
        // The manually placed carrier is untouched.
        assert!((0..5).all(|c| board.hidden[0][c] == 'S'));
    }

    #[test]
    fn scrubbed_render_hides_ships() {
        let mut board = Board::default();
        board.place("Destroyer", 0, 0, 2, Orientation::Horizontal);
        board.fire_at(0, 0);
        board.fire_at(9, 9);

        let scrubbed = board.render(false);
        assert!(!scrubbed.contains('S'));
        assert!(scrubbed.contains('X'));
        assert!(scrubbed.contains('o'));

        let revealed = board.render(true);
        assert!(revealed.contains('S'));
    }
}
