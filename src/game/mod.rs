//! Game rules: the board, the fixed fleet and coordinate handling.

pub mod board;
pub mod coord;

pub use board::{Board, Orientation, Shot};
pub use coord::{format_coord, parse_coord, CoordError};
