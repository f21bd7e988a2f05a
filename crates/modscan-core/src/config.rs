//! Scanner configuration file.
//!
//! Every field is optional; a missing file section falls back to defaults.
//!
//! ```json
//! {
//!   "policy": { "threshold": 0.7, "override_ceiling": 0.98 },
//!   "limits": { "max_entry_bytes": 16777216 },
//!   "decompiler": { "program": "java", "args": ["-jar", "cfr.jar", "{input}", "--outputdir", "{output}"] }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive::WalkLimits;
use crate::decompile::CommandDecompiler;
use crate::error::{Result, ScanError};
use crate::verdict::DecisionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    pub policy: DecisionPolicy,
    pub limits: WalkLimits,
    pub decompiler: Option<CommandDecompiler>,
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.limits.max_entries == 0 {
            return Err(ScanError::config("limits.max_entries must be positive"));
        }
        if self.limits.max_entry_bytes == 0 || self.limits.max_total_bytes == 0 {
            return Err(ScanError::config("byte limits must be positive"));
        }
        if let Some(d) = &self.decompiler {
            if d.program.trim().is_empty() {
                return Err(ScanError::config("decompiler.program is empty"));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<ScannerConfig> {
    let data = fs::read_to_string(path)?;
    let config: ScannerConfig = serde_json::from_str(&data)
        .map_err(|e| ScanError::config(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
