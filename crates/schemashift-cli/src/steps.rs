//! Loading step specs from a JSON file.

use schemashift_core::StepSpec;
use std::path::Path;

/// Read a steps file: a JSON array of step specs.
pub fn load_steps(path: &Path) -> Result<Vec<StepSpec>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let specs: Vec<StepSpec> = serde_json::from_str(&content)
        .map_err(|e| format!("invalid steps file {}: {}", path.display(), e))?;
    Ok(specs)
}
