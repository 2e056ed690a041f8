//! Migration states and progress events.

use crate::error::MigrationError;

/// Outcome of one `finish_migration_if_needed` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Nothing was pending.
    Noop,
    /// A pending temp database is being validated and promoted.
    InProgress,
    /// The temp database replaced the live one and the active key was updated.
    Done,
    /// The pending migration was discarded; live database and keys are untouched.
    Canceled,
}

/// Event emitted on the progress stream.
#[derive(Debug)]
pub enum MigrationProgress {
    /// Work has started ([`MigrationState::InProgress`]).
    Loading,
    /// Terminal state reached.
    Success(MigrationState),
    /// The live database could not be brought back to a known state.
    Failure(MigrationError),
}

impl MigrationProgress {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MigrationProgress::Loading)
    }

    /// The state carried by this event, if any.
    pub fn state(&self) -> Option<MigrationState> {
        match self {
            MigrationProgress::Loading => Some(MigrationState::InProgress),
            MigrationProgress::Success(state) => Some(*state),
            MigrationProgress::Failure(_) => None,
        }
    }
}
