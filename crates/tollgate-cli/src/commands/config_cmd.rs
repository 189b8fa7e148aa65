//! `tollgate config` -- display and validate resolved configuration.
//!
//! # Examples
//!
//! ```text
//! tollgate config show
//! tollgate config validate --config ./tollgate.json
//! ```

use tollgate_core::validation::{ValidationError, validate_config};
use tollgate_types::config::GovernorConfig;

/// Display the resolved configuration as formatted JSON.
pub fn config_show(config: &GovernorConfig) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
    println!("{json}");
    Ok(())
}

/// Validate the configuration, print every diagnostic and fail if any is
/// an error.
pub fn config_validate(config: &GovernorConfig) -> anyhow::Result<()> {
    let diagnostics = validate_config(config);
    print!("{}", render_diagnostics(&diagnostics));

    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s)");
    }
    Ok(())
}

fn render_diagnostics(diagnostics: &[ValidationError]) -> String {
    if diagnostics.is_empty() {
        return "configuration is valid\n".to_string();
    }
    let mut out = String::new();
    for diagnostic in diagnostics {
        out.push_str(&diagnostic.to_string());
        out.push('\n');
    }
    out
}
