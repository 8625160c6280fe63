use thiserror::Error;

/// Move-legality taxonomy. Illegal intents are reported to the initiating
/// session only and never mutate any state.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Unknown player")]
    UnknownPlayer,
    #[error("Player not active")]
    NotActive,
    #[error("Player not alive")]
    NotAlive,
    #[error("Cell already uncovered")]
    AlreadyUncovered,
    #[error("Cell is flagged")]
    Flagged,
    #[error("Not adjacent to your cells")]
    NotAdjacent,
    #[error("Can only chord on your uncovered cells")]
    NotOwnedUncovered,
    #[error("No adjacent mines to chord")]
    NoAdjacentMines,
    #[error("Flag count does not match number")]
    FlagCountMismatch,
}

pub type Result<T> = core::result::Result<T, GameError>;
