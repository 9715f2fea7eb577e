//! Embedded templates for shellbox files.

use crate::runtime::FileRecord;

/// Default `shellbox.toml` configuration.
pub const SHELLBOX_TOML: &str = include_str!("shellbox.toml");

/// Vite + React + TypeScript skeleton, relative to the sandbox workdir.
const APP_FILES: &[(&str, &str)] = &[
    ("package.json", include_str!("app/package.json")),
    ("index.html", include_str!("app/index.html")),
    ("vite.config.ts", include_str!("app/vite.config.ts")),
    ("tsconfig.json", include_str!("app/tsconfig.json")),
    ("src/main.tsx", include_str!("app/src/main.tsx")),
    ("src/App.tsx", include_str!("app/src/App.tsx")),
    ("src/index.css", include_str!("app/src/index.css")),
];

/// The application boilerplate as upload records.
pub fn boilerplate() -> Vec<FileRecord> {
    APP_FILES
        .iter()
        .map(|(path, content)| FileRecord::new(*path, *content))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_default_config_template_parses() {
        let config: Config = toml::from_str(SHELLBOX_TOML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sandbox.app_port, 3000);
    }

    #[test]
    fn test_boilerplate_declares_react() {
        let files = boilerplate();
        assert!(files.iter().any(|f| f.path == "src/App.tsx"));
        let package = files.iter().find(|f| f.path == "package.json").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&package.content).unwrap();
        assert_eq!(json["dependencies"]["react"], "^18.2.0");
    }
}
