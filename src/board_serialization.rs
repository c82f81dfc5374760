//! Board tensor encoding.
//!
//! A position is encoded as 15 planes of 8x8 occupancy bits, always written
//! from the point of view of the side to move:
//!
//! - planes 0-5: mover pawn, knight, bishop, rook, queen, king
//! - planes 6-11: opponent pieces in the same order
//! - plane 12: en-passant destination square
//! - planes 13-14: unused, always empty
//!
//! When black is to move the board is mirrored vertically, so the mover's
//! pieces always start from ranks 1-2.
//!
//! Cell indexing inside a plane follows square order: a1=0, b1=1, ..., h8=63,
//! i.e. `rank * 8 + file`.

use shakmaty::{Bitboard, Chess, Color, EnPassantMode, Piece, Position, Role, Square};

pub const NUM_PLANES: usize = 15;
pub const PLANE_SIZE: usize = 64;
/// Number of cells in a flattened [`BoardTensor`].
pub const BOARD_CELLS: usize = NUM_PLANES * PLANE_SIZE;

pub const EN_PASSANT_PLANE: usize = 12;

/// 15x8x8 boolean tensor, one bitboard per plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BoardTensor {
    planes: [u64; NUM_PLANES],
}

impl BoardTensor {
    pub fn plane(&self, plane: usize) -> u64 {
        self.planes[plane]
    }

    pub fn get(&self, plane: usize, rank: usize, file: usize) -> bool {
        self.planes[plane] & (1u64 << (rank * 8 + file)) != 0
    }

    fn set_plane(&mut self, plane: usize, bits: Bitboard) {
        self.planes[plane] |= u64::from(bits);
    }

    /// Number of set cells over all planes.
    pub fn count_ones(&self) -> u32 {
        self.planes.iter().map(|p| p.count_ones()).sum()
    }

    /// Flatten into `out` as one 0/1 byte per cell, `plane * 64 + square`.
    pub fn write_cells(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), BOARD_CELLS);
        for (plane, bits) in self.planes.iter().enumerate() {
            let cells = &mut out[plane * PLANE_SIZE..(plane + 1) * PLANE_SIZE];
            for (sq, cell) in cells.iter_mut().enumerate() {
                *cell = ((bits >> sq) & 1) as u8;
            }
        }
    }

    /// Inverse of [`BoardTensor::write_cells`]. Any non-zero byte is a set cell.
    pub fn from_cells(cells: &[u8]) -> Self {
        debug_assert_eq!(cells.len(), BOARD_CELLS);
        let mut planes = [0u64; NUM_PLANES];
        for (plane, bits) in planes.iter_mut().enumerate() {
            for sq in 0..PLANE_SIZE {
                if cells[plane * PLANE_SIZE + sq] != 0 {
                    *bits |= 1u64 << sq;
                }
            }
        }
        BoardTensor { planes }
    }
}

/// Bitboard seen from the mover's side of the board.
fn oriented(bits: Bitboard, mover: Color) -> Bitboard {
    match mover {
        Color::White => bits,
        Color::Black => bits.flip_vertical(),
    }
}

/// Encode the board of `pos` in mover-first orientation.
pub fn serialize_board(pos: &Chess) -> BoardTensor {
    let mover = pos.turn();
    let board = pos.board();
    let mut tensor = BoardTensor::default();

    for (side, color) in [mover, !mover].into_iter().enumerate() {
        for (i, role) in Role::ALL.into_iter().enumerate() {
            let bits = board.by_piece(Piece { color, role });
            tensor.set_plane(side * Role::ALL.len() + i, oriented(bits, mover));
        }
    }

    // Only the capture destination is marked, not the capturing pawn. A
    // pseudo-legal capture is enough, even by a pinned pawn.
    if let Some(sq) = pos.ep_square(EnPassantMode::PseudoLegal) {
        tensor.set_plane(EN_PASSANT_PLANE, oriented(Bitboard::from_square(sq), mover));
    }

    tensor
}

/// Castling rights as `[mover king-side, mover queen-side, opponent king-side,
/// opponent queen-side]`.
pub fn get_castling_rights(pos: &Chess) -> [bool; 4] {
    use shakmaty::CastlingSide;

    let mover = pos.turn();
    let castles = pos.castles();
    [
        castles.has(mover, CastlingSide::KingSide),
        castles.has(mover, CastlingSide::QueenSide),
        castles.has(!mover, CastlingSide::KingSide),
        castles.has(!mover, CastlingSide::QueenSide),
    ]
}

/// Get halfmove clock (for 50-move rule).
pub fn get_halfmove_clock(pos: &Chess) -> u32 {
    pos.halfmoves()
}

/// Square index of `sq` in the mover's orientation.
pub fn oriented_square(sq: Square, mover: Color) -> usize {
    match mover {
        Color::White => sq as usize,
        Color::Black => sq.flip_vertical() as usize,
    }
}
