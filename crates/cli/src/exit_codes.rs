//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: cron jobs and scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | config           | Settings, contexts and job files         |
//! | 10-19   | import           | Engine and source failures               |
//! | 20-29   | queue            | Job store and scheduling                 |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use sheetsync_recon::ImportError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Config (3-9)
// =============================================================================

/// settings.toml could not be read or failed validation.
pub const EXIT_CONFIG_SETTINGS: u8 = 3;

/// contexts.toml is unreadable or invalid (unknown target, bad argument).
pub const EXIT_CONFIG_CONTEXTS: u8 = 4;

/// Job file is unreadable, malformed or names unknown properties/arguments.
pub const EXIT_CONFIG_JOB: u8 = 5;

// =============================================================================
// Import (10-19)
// =============================================================================

/// Job does not fit its context: unknown context, column or setter.
pub const EXIT_IMPORT_CONFIGURATION: u8 = 10;

/// Spreadsheet file could not be opened or parsed.
pub const EXIT_IMPORT_SOURCE: u8 = 11;

/// Repository write or flush failed mid-run. Earlier flushes stay committed.
pub const EXIT_IMPORT_PERSISTENCE: u8 = 12;

/// A reference argument names a record that does not exist.
pub const EXIT_IMPORT_REFERENCE: u8 = 13;

/// Preview row failed validation.
pub const EXIT_IMPORT_VALIDATION: u8 = 14;

// =============================================================================
// Queue (20-29)
// =============================================================================

/// Job database could not be opened or queried.
pub const EXIT_QUEUE_STORE: u8 = 20;

/// Another import is still in progress; nothing was started.
pub const EXIT_QUEUE_BUSY: u8 = 21;

/// Map an engine error to its exit code.
pub fn import_exit_code(err: &ImportError) -> u8 {
    match err {
        ImportError::Configuration(_) => EXIT_IMPORT_CONFIGURATION,
        ImportError::SourceRead(_) => EXIT_IMPORT_SOURCE,
        ImportError::Persistence(_) => EXIT_IMPORT_PERSISTENCE,
        ImportError::Reference { .. } => EXIT_IMPORT_REFERENCE,
        ImportError::Validation(_) => EXIT_IMPORT_VALIDATION,
    }
}
