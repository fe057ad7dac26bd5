//! Session file checking.

use crate::commands::common::read_session;
use clap::Args;
use patchbay_config::{ValidationError, validate_session};
use std::path::PathBuf;

/// Validate a session file.
#[derive(Args)]
pub struct ValidateArgs {
    /// Session files (TOML)
    #[arg(required = true)]
    pub sessions: Vec<PathBuf>,
}

/// Run the validate command. Fails if any file is invalid.
pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let mut failed = 0;
    for path in &args.sessions {
        let result = read_session(path)
            .and_then(|session| validate_session(&session).map_err(anyhow::Error::from));
        match result {
            Ok(()) => println!("{}: ok", path.display()),
            Err(err) => {
                failed += 1;
                println!("{}: invalid", path.display());
                match err.downcast_ref::<ValidationError>() {
                    Some(ValidationError::Multiple(errors)) => {
                        for e in errors {
                            println!("  - {e}");
                        }
                    }
                    _ => println!("  - {err:#}"),
                }
            }
        }
    }

    anyhow::ensure!(failed == 0, "{failed} of {} session(s) invalid", args.sessions.len());
    Ok(())
}
