//! Per-position feature vectors and outcome labels.
//!
//! The scaling constants and sentinels below are part of the dataset format;
//! models trained on earlier stores depend on their exact values.

use crate::board_serialization::{
    get_castling_rights, get_halfmove_clock, serialize_board, BoardTensor,
};
use crate::game::{GameHeaders, GameOutcome, ParsedGame};
use shakmaty::{Chess, Color, Position};

pub const AUX_LEN: usize = 10;
pub const LABEL_LEN: usize = 3;

pub const RATING_SCALE: f32 = 3000.0;
/// Rating used when the tag is missing or not a number.
pub const MISSING_RATING: f32 = -100.0;
/// Clocks are capped at 150 minutes; a missing current clock counts as the cap.
pub const MAX_CLOCK_SECS: f32 = 150.0 * 60.0;
pub const CLOCK_SCALE: f32 = 600.0;
/// Value of the next-clock feature when the following node has no clock.
pub const MISSING_NEXT_CLOCK: f32 = 15.0;
pub const HALFMOVE_SCALE: f32 = 50.0;
pub const INCREMENT_SCALE: f32 = 5.0;

pub type AuxFeatures = [f32; AUX_LEN];

/// One-hot `[win, draw or unknown, loss]` from the mover's point of view.
pub type Label = [u16; LABEL_LEN];

/// One row of the dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedRecord {
    pub board: BoardTensor,
    pub aux: AuxFeatures,
    pub label: Label,
}

/// A main-line node as seen by the encoder.
#[derive(Clone, Copy, Debug)]
pub struct PlyNode<'a> {
    pub position: &'a Chess,
    /// Clock annotation of this node, in seconds.
    pub clock: Option<f32>,
    /// `None` when this is the last node; `Some(None)` when the next node
    /// exists but has no clock annotation.
    pub next_clock: Option<Option<f32>>,
}

fn rating(headers: &GameHeaders, color: Color) -> f32 {
    let key = match color {
        Color::White => "WhiteElo",
        Color::Black => "BlackElo",
    };
    let value = headers
        .get(key)
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(|v| v as f32)
        .unwrap_or(MISSING_RATING);
    value / RATING_SCALE
}

/// Increment of a `"base+increment"` time control, 0 when absent or malformed.
fn increment(headers: &GameHeaders) -> f32 {
    headers
        .get("TimeControl")
        .and_then(|tc| tc.split('+').nth(1))
        .and_then(|inc| inc.trim().parse::<i32>().ok())
        .map(|inc| inc as f32 / INCREMENT_SCALE)
        .unwrap_or(0.0)
}

fn current_clock(clock: Option<f32>) -> f32 {
    // A zero clock is treated like a missing one.
    let secs = match clock {
        Some(c) if c != 0.0 => c,
        _ => MAX_CLOCK_SECS,
    };
    secs.min(MAX_CLOCK_SECS) / CLOCK_SCALE
}

fn next_clock(next: Option<Option<f32>>) -> f32 {
    match next.flatten() {
        Some(c) => c.min(MAX_CLOCK_SECS) / CLOCK_SCALE,
        None => MISSING_NEXT_CLOCK,
    }
}

fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

pub fn aux_features(node: &PlyNode<'_>, headers: &GameHeaders) -> AuxFeatures {
    let pos = node.position;
    let mover = pos.turn();
    let castling = get_castling_rights(pos);

    [
        rating(headers, mover),
        rating(headers, !mover),
        current_clock(node.clock),
        next_clock(node.next_clock),
        flag(castling[0]),
        flag(castling[1]),
        flag(castling[2]),
        flag(castling[3]),
        get_halfmove_clock(pos) as f32 / HALFMOVE_SCALE,
        increment(headers),
    ]
}

/// Re-express the game outcome relative to `mover`.
pub fn label_for(outcome: GameOutcome, mover: Color) -> Label {
    match outcome.winner() {
        Some(winner) if winner == mover => [1, 0, 0],
        None => [0, 1, 0],
        Some(_) => [0, 0, 1],
    }
}

/// Encode one main-line node.
pub fn encode(node: &PlyNode<'_>, headers: &GameHeaders, outcome: GameOutcome) -> EncodedRecord {
    EncodedRecord {
        board: serialize_board(node.position),
        aux: aux_features(node, headers),
        label: label_for(outcome, node.position.turn()),
    }
}

/// Encode every main-line node of `game`, in ply order.
pub fn encode_game(game: &ParsedGame) -> Vec<EncodedRecord> {
    game.nodes
        .iter()
        .enumerate()
        .map(|(i, snapshot)| {
            let node = PlyNode {
                position: &snapshot.position,
                clock: snapshot.clock,
                next_clock: game.nodes.get(i + 1).map(|next| next.clock),
            };
            encode(&node, &game.headers, game.outcome)
        })
        .collect()
}
