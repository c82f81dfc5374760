//! Main-line replay of a single PGN record.
//!
//! A [`GameVisitor`] drives `pgn-reader` over one record and collects every
//! position reached on the main line, together with the clock annotation that
//! follows each move. Variations are skipped.

use crate::comment_parsing::parse_clock;
use log::debug;
use pgn_reader::{KnownOutcome, Outcome, RawComment, RawTag, Reader, SanPlus, Skip, Visitor};
use shakmaty::{fen::Fen, CastlingMode, Chess, Color, Position};
use std::collections::HashMap;
use std::io::Cursor;
use std::ops::ControlFlow;

/// Result of a game, fixed once per record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    FirstPlayerWin,
    Draw,
    SecondPlayerWin,
    Unknown,
}

impl GameOutcome {
    pub fn winner(self) -> Option<Color> {
        match self {
            GameOutcome::FirstPlayerWin => Some(Color::White),
            GameOutcome::SecondPlayerWin => Some(Color::Black),
            GameOutcome::Draw | GameOutcome::Unknown => None,
        }
    }
}

impl From<Outcome> for GameOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Known(KnownOutcome::Decisive { winner }) => match winner {
                Color::White => GameOutcome::FirstPlayerWin,
                Color::Black => GameOutcome::SecondPlayerWin,
            },
            Outcome::Known(KnownOutcome::Draw) => GameOutcome::Draw,
            Outcome::Unknown => GameOutcome::Unknown,
        }
    }
}

/// Header tags of one game.
#[derive(Clone, Debug, Default)]
pub struct GameHeaders(HashMap<String, String>);

impl GameHeaders {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Case-insensitive lookup, used for `FEN` and `Variant`.
    fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl FromIterator<(String, String)> for GameHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        GameHeaders(iter.into_iter().collect())
    }
}

/// One node of the main line: the position after the move that led to it,
/// and the clock annotation attached to that move.
#[derive(Clone, Debug)]
pub struct PositionSnapshot {
    pub position: Chess,
    /// Remaining time in seconds, from a `[%clk]` comment.
    pub clock: Option<f32>,
}

/// A replayed game.
#[derive(Clone, Debug)]
pub struct ParsedGame {
    pub headers: GameHeaders,
    /// Initial position followed by the position after each main-line move.
    /// Empty when the starting position could not be set up.
    pub nodes: Vec<PositionSnapshot>,
    pub outcome: GameOutcome,
    /// First replay error (bad FEN, illegal move), if any.
    pub error: Option<String>,
}

impl ParsedGame {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Visitor collecting the main line of one game.
pub struct GameVisitor {
    pos: Chess,
    valid_moves: bool,
    nodes: Vec<PositionSnapshot>,
    headers: GameHeaders,
    outcome: Option<GameOutcome>,
    error: Option<String>,
}

impl GameVisitor {
    pub fn new() -> Self {
        GameVisitor {
            pos: Chess::default(),
            valid_moves: true,
            nodes: Vec::with_capacity(80),
            headers: GameHeaders::default(),
            outcome: None,
            error: None,
        }
    }

    fn push_node(&mut self) {
        self.nodes.push(PositionSnapshot {
            position: self.pos.clone(),
            clock: None,
        });
    }

    fn set_error(&mut self, msg: String) {
        self.valid_moves = false;
        if self.error.is_none() {
            self.error = Some(msg);
        }
    }

    /// Starting position from the `FEN`/`Variant` headers, if present.
    fn starting_position(&mut self) -> Chess {
        let castling_mode = match self.headers.get_ignore_case("Variant") {
            Some(v) if v.eq_ignore_ascii_case("chess960") => CastlingMode::Chess960,
            _ => CastlingMode::Standard,
        };

        let Some(fen_str) = self.headers.get_ignore_case("FEN").map(str::to_owned) else {
            return Chess::default();
        };

        match fen_str.parse::<Fen>() {
            Ok(fen) => match fen.into_position(castling_mode) {
                Ok(pos) => pos,
                Err(e) => {
                    self.set_error(format!("invalid FEN position: {}", e));
                    Chess::default()
                }
            },
            Err(e) => {
                self.set_error(format!("failed to parse FEN: {}", e));
                Chess::default()
            }
        }
    }

    fn finish(&mut self) -> ParsedGame {
        // Only the movetext terminator counts; the Result header is ignored.
        let outcome = self.outcome.take().unwrap_or(GameOutcome::Unknown);
        ParsedGame {
            headers: std::mem::take(&mut self.headers),
            nodes: std::mem::take(&mut self.nodes),
            outcome,
            error: self.error.take(),
        }
    }
}

impl Default for GameVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Visitor for GameVisitor {
    type Tags = Vec<(String, String)>;
    type Movetext = ();
    type Output = ParsedGame;

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        ControlFlow::Continue(Vec::with_capacity(10))
    }

    fn tag(
        &mut self,
        tags: &mut Self::Tags,
        key: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        let key_str = String::from_utf8_lossy(key).into_owned();
        let value_str = String::from_utf8_lossy(value.as_bytes()).into_owned();
        tags.push((key_str, value_str));
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        self.headers = tags.into_iter().collect();
        self.valid_moves = true;
        self.outcome = None;
        self.error = None;
        self.nodes.clear();

        self.pos = self.starting_position();
        // A game without a usable starting position has no nodes at all.
        if self.valid_moves {
            self.push_node();
        }
        ControlFlow::Continue(())
    }

    fn san(
        &mut self,
        _movetext: &mut Self::Movetext,
        san_plus: SanPlus,
    ) -> ControlFlow<Self::Output> {
        if self.valid_moves {
            match san_plus.san.to_move(&self.pos) {
                Ok(m) => {
                    self.pos.play_unchecked(m);
                    self.push_node();
                }
                Err(err) => {
                    self.set_error(format!("illegal move: {} {}", err, san_plus));
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn comment(
        &mut self,
        _movetext: &mut Self::Movetext,
        comment: RawComment<'_>,
    ) -> ControlFlow<Self::Output> {
        // Comments after an illegal move belong to a node we never reached.
        if self.valid_moves {
            let text = String::from_utf8_lossy(comment.as_bytes());
            if let Some(seconds) = parse_clock(&text) {
                if let Some(node) = self.nodes.last_mut() {
                    node.clock = Some(seconds);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn begin_variation(
        &mut self,
        _movetext: &mut Self::Movetext,
    ) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true)) // Skip variations, stay in mainline
    }

    fn outcome(
        &mut self,
        _movetext: &mut Self::Movetext,
        outcome: Outcome,
    ) -> ControlFlow<Self::Output> {
        self.outcome = Some(GameOutcome::from(outcome));
        ControlFlow::Continue(())
    }

    fn end_game(&mut self, _movetext: Self::Movetext) -> Self::Output {
        self.finish()
    }
}

/// Replay the first game found in `pgn`.
///
/// Returns `None` when the text holds no game or cannot be read at all.
/// Replay errors inside a game are kept on [`ParsedGame::error`]; the nodes
/// reached before the error are still returned.
pub fn parse_game(pgn: &str) -> Option<ParsedGame> {
    let mut reader = Reader::new(Cursor::new(pgn));
    let mut visitor = GameVisitor::new();
    match reader.read_game(&mut visitor) {
        Ok(Some(game)) => {
            if let Some(err) = &game.error {
                debug!("game replay stopped early: {}", err);
            }
            Some(game)
        }
        Ok(None) => None,
        Err(err) => {
            debug!("failed to read game: {}", err);
            None
        }
    }
}
