//! Script engine selection
//!
//! Picks the engine for a script from its file extension.

use std::path::{Path, PathBuf};

use crate::error::ScriptError;
use crate::worker::EngineFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    JavaScript,
}

impl EngineKind {
    /// Determine the engine from the script's extension
    pub fn from_extension(path: &Path) -> Result<Self, ScriptError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ScriptError::new(format!("No file extension found for: {}", path.display())))?;

        match extension {
            "js" | "mjs" => Ok(EngineKind::JavaScript),
            _ => Err(ScriptError::new(format!(
                "Unsupported script type for extension: {}",
                extension
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::JavaScript => "JavaScript",
        }
    }

    /// Factory that loads `path` with this engine on the worker thread
    pub fn factory(self, path: PathBuf) -> Result<EngineFactory, ScriptError> {
        match self {
            #[cfg(feature = "js")]
            EngineKind::JavaScript => Ok(crate::adapters::js_engine_factory(path)),
            #[cfg(not(feature = "js"))]
            EngineKind::JavaScript => Err(ScriptError::new(format!(
                "{} support is not compiled in (enable the `js` feature) for {}",
                self.name(),
                path.display()
            ))),
        }
    }
}

/// Engine factory for a script file, chosen by extension
pub fn engine_factory_for(path: &Path) -> Result<EngineFactory, ScriptError> {
    EngineKind::from_extension(path)?.factory(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(EngineKind::from_extension(Path::new("game.js")).unwrap(), EngineKind::JavaScript);
        assert_eq!(EngineKind::from_extension(Path::new("dir/game.mjs")).unwrap(), EngineKind::JavaScript);
        assert!(EngineKind::from_extension(Path::new("game.lua")).is_err());
        assert!(EngineKind::from_extension(Path::new("game")).is_err());
    }
}
