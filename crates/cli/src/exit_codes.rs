//! CLI Exit Code Registry
//!
//! Single source of truth for `custodia` exit codes. Scripts and schedulers
//! branch on them, so codes never change meaning once released.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Reconciled clean                                          |
//! | 1    | Mismatched or unmatched positions found                   |
//! | 2    | Usage or input error (bad args, malformed date)           |
//! | 3    | Configuration error (firm, custodian feed, metric setup)  |
//! | 4    | Data error (no client data, missing metric, duplicates)   |
//! | 5    | Firm adapter logic failed                                 |
//! | 6    | Result could not be written                               |

use custodia_recon::error::ErrorClass;

/// Success - run completed and every position reconciled.
pub const EXIT_SUCCESS: u8 = 0;

/// Run completed but found breaks. Like `diff(1)`, 1 means "differs".
pub const EXIT_RECON_MISMATCH: u8 = 1;

/// Usage error - bad arguments or caller-supplied input.
pub const EXIT_USAGE: u8 = 2;

/// Firm or custodian configuration is wrong or incomplete.
pub const EXIT_RECON_CONFIG: u8 = 3;

/// Upstream data missing or malformed.
pub const EXIT_RECON_DATA: u8 = 4;

/// A firm adapter hook failed.
pub const EXIT_RECON_LOGIC: u8 = 5;

/// Output file or export directory could not be written.
pub const EXIT_OUTPUT: u8 = 6;

pub fn class_exit_code(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::Input => EXIT_USAGE,
        ErrorClass::Configuration => EXIT_RECON_CONFIG,
        ErrorClass::Data => EXIT_RECON_DATA,
        ErrorClass::Logic => EXIT_RECON_LOGIC,
    }
}
