//! CLI Exit Code Registry
//!
//! Single source of truth for `concord` exit codes. Scripts and CI jobs rely
//! on them, so existing values never change meaning.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success                                                  |
//! | 1    | General error (unspecified)                              |
//! | 2    | Usage error (bad arguments; emitted by clap)             |
//! | 3    | Invalid project config or vocabulary table               |
//! | 4    | Runtime failure (unreadable records, IO, serialization)  |
//! | 5    | Run completed but items remain pending adjudication      |

use concord_recon::ReconError;

/// Success - command completed and nothing is pending.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config failed to parse or validate, or a vocabulary table is malformed.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Records, ledger or outputs could not be read or written.
pub const EXIT_RUNTIME: u8 = 4;

/// Outputs were written, but the adjudication queue is not empty.
pub const EXIT_PENDING: u8 = 5;

/// Exit code for an engine error surfaced by a command.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::DuplicateVariable(_)
        | ReconError::RegistrySealed(_)
        | ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::UnknownVocabulary(_) => EXIT_INVALID_CONFIG,
        ReconError::RegistryNotSealed => EXIT_ERROR,
        ReconError::UnknownVariable(_)
        | ReconError::InvalidRecord(_)
        | ReconError::InvalidValue { .. }
        | ReconError::DerivedOverride(_)
        | ReconError::Csv(_)
        | ReconError::Json(_) => EXIT_RUNTIME,
    }
}
