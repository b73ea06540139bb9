use std::process::ExitCode;

use tether::{BROKER_SOCKET_ENV, ErrorKind};

pub type CliResult<T> = anyhow::Result<T>;

/// Convert a CliResult to an ExitCode, printing errors to stderr
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            if let Some(hint) = hint(&e) {
                eprintln!("  hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn hint(err: &anyhow::Error) -> Option<String> {
    let err = err.chain().find_map(|cause| cause.downcast_ref::<tether::Error>())?;
    match err.kind() {
        ErrorKind::Connection => Some(format!(
            "is the broker running? pass --socket or set {BROKER_SOCKET_ENV}"
        )),
        ErrorKind::Capability if matches!(err, tether::Error::NoSuchService(_)) => {
            Some("the broker has no service by that name".to_string())
        }
        _ => None,
    }
}
