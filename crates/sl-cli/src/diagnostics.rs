//! Diagnostic and error reporting utilities

use crate::{CliError, Result};
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme};

/// Set up enhanced error reporting with miette
pub fn setup_error_reporting() -> Result<()> {
    // Install miette as the global error handler
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .map_err(|e| CliError::Config(format!("Failed to setup error reporting: {}", e)))?;

    Ok(())
}

/// Renders `error` with its code, cause chain and help text.
pub fn format_diagnostic(error: &dyn Diagnostic, color: bool) -> Option<String> {
    let handler = if color {
        GraphicalReportHandler::new()
    } else {
        GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor())
    };
    let mut out = String::new();
    handler
        .render_report(&mut out, error)
        .ok()?;
    Some(out)
}

/// Prints a CLI error to stderr. Returns `false` if it could not be
/// rendered, so the caller can fall back to plain logging.
pub fn render_cli_error(error: &CliError) -> bool {
    match format_diagnostic(error, true) {
        Some(rendered) => {
            eprintln!("{}", rendered);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sl_core::error::{FetchError, LoaderError};

    #[test]
    fn load_errors_carry_code_and_cause() {
        let error = CliError::from(LoaderError::FetchFailure {
            key: "/app/missing.js".parse().unwrap(),
            source: FetchError::NotFound,
        });
        assert_eq!(error.code().map(|c| c.to_string()), Some("sl::load".to_string()));

        let rendered = format_diagnostic(&error, false).unwrap();
        assert!(rendered.contains("failed to load unit /app/missing.js"));
        assert!(rendered.contains("unit source not found"));
    }

    #[test]
    fn config_errors_have_help() {
        let error = CliError::Config("bad value".to_string());
        assert!(error.help().is_some());
    }
}
