//! Print the effective configuration.

use anyhow::Result;
use std::path::Path;

use crate::config;

/// Run the config command.
pub fn run(explicit: Option<&Path>) -> Result<()> {
    let loaded = config::load(explicit)?;

    match &loaded.source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no configuration file; built-in defaults"),
    }
    print!("{}", config::render(&loaded.config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_with_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nname = \"Desk\"").unwrap();

        assert!(run(Some(file.path())).is_ok());
    }

    #[test]
    fn config_with_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[editor]\ndebounce_ms = \"later\"").unwrap();

        assert!(run(Some(file.path())).is_err());
    }
}
