/// Machine/fault catalog: the built-in data set, loading from a JSON file, and validation.
///
/// A catalog file is a JSON array of machine types:
///
/// ```json
/// [{"code": "EX", "name": "Excavator", "aliases": ["digger"],
///   "errors": [{"code": "H1234", "description": "...", "symptoms": ["..."], "steps": ["..."]}]}]
/// ```
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::AppError;
use crate::model::{ErrorEntry, MachineType};

struct StaticError {
    code: &'static str,
    description: &'static str,
    symptoms: &'static [&'static str],
    steps: &'static [&'static str],
}

struct StaticMachine {
    code: &'static str,
    name: &'static str,
    aliases: &'static [&'static str],
    errors: &'static [StaticError],
}

const BUILTIN_MACHINES: &[StaticMachine] = &[StaticMachine {
    code: "EX",
    name: "Excavator",
    aliases: &["excavator", "digger", "EX machine"],
    errors: &[
        StaticError {
            code: "H1234",
            description: "Hydraulic Pressure Too Low",
            symptoms: &[
                "Slow or unresponsive hydraulic operations",
                "Unusual noises from the hydraulic pump",
                "Visible leaks in the hydraulic lines or connections",
                "Reduced lifting capacity",
            ],
            steps: &[
                "Inspect Hydraulic Fluid Levels",
                "Check for Leaks",
                "Test Hydraulic Pump",
                "Inspect Relief Valves",
                "Check Hydraulic Filters",
                "Clear the DTC Code",
            ],
        },
        StaticError {
            code: "E5678",
            description: "Engine Overheating",
            symptoms: &[
                "Temperature gauge reading consistently high",
                "Engine warning light activated",
                "Loss of power or stalling",
                "Steam or coolant leaks from the engine compartment",
            ],
            steps: &[
                "Inspect Coolant Levels",
                "Check for Coolant Leaks",
                "Examine the Radiator Fan",
                "Inspect the Thermostat",
                "Check the Water Pump",
                "Clear the DTC Code",
            ],
        },
        StaticError {
            code: "M8910",
            description: "Motor Stalling Under Load",
            symptoms: &[
                "Motor stalls or hesitates during operation",
                "Reduced power output",
                "Unusual vibrations or noises from the motor",
            ],
            steps: &[
                "Inspect Electrical Connections",
                "Test the Motor Windings",
                "Examine the Load",
                "Inspect the Drive Belt or Coupling",
                "Test the Motor Controller",
                "Clear the DTC Code",
            ],
        },
        StaticError {
            code: "H9012",
            description: "Hydraulic Cylinder Malfunction",
            symptoms: &[
                "Erratic or uneven cylinder movement",
                "Hydraulic fluid seeping from the cylinder seals",
                "Reduced load capacity or failure to extend/retract properly",
            ],
            steps: &[
                "Inspect Cylinder Seals",
                "Check Hydraulic Lines",
                "Test Cylinder Operation",
                "Inspect Control Valves",
                "Perform System Calibration",
                "Clear the DTC Code",
            ],
        },
    ],
}];

/// The catalog shipped with the binary.
pub fn builtin_catalog() -> Vec<MachineType> {
    BUILTIN_MACHINES
        .iter()
        .map(|m| MachineType {
            code: m.code.to_string(),
            name: m.name.to_string(),
            aliases: m.aliases.iter().map(|a| a.to_string()).collect(),
            errors: m
                .errors
                .iter()
                .map(|e| ErrorEntry {
                    code: e.code.to_string(),
                    description: e.description.to_string(),
                    symptoms: to_strings(e.symptoms),
                    steps: to_strings(e.steps),
                })
                .collect(),
        })
        .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Read and validate a catalog from a JSON file.
pub fn load_from_file(path: &Path) -> Result<Vec<MachineType>, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::Catalog(format!("failed to read {}: {e}", path.display())))?;
    let machines: Vec<MachineType> = serde_json::from_str(&content)
        .map_err(|e| AppError::Catalog(format!("invalid catalog {}: {e}", path.display())))?;
    validate(&machines)?;
    Ok(machines)
}

/// Reject catalogs the indices cannot represent faithfully: duplicate machine codes, a
/// name or alias claimed by two machines, or one code listed twice under one machine.
pub fn validate(machines: &[MachineType]) -> Result<(), AppError> {
    let mut codes = HashSet::new();
    let mut names: HashMap<String, &str> = HashMap::new();

    for machine in machines {
        if machine.code.trim().is_empty() {
            return Err(AppError::Catalog(format!(
                "machine '{}' has an empty code",
                machine.name
            )));
        }
        if !codes.insert(machine.code.as_str()) {
            return Err(AppError::Catalog(format!(
                "duplicate machine code '{}'",
                machine.code
            )));
        }

        for key in std::iter::once(&machine.name).chain(machine.aliases.iter()) {
            let folded = key.to_lowercase();
            match names.get(&folded) {
                Some(owner) if *owner != machine.code => {
                    return Err(AppError::Catalog(format!(
                        "name '{key}' maps to both '{owner}' and '{}'",
                        machine.code
                    )));
                }
                _ => {
                    names.insert(folded, machine.code.as_str());
                }
            }
        }

        let mut error_codes = HashSet::new();
        for error in &machine.errors {
            if !error_codes.insert(error.code.as_str()) {
                return Err(AppError::Catalog(format!(
                    "error code '{}' listed twice for machine '{}'",
                    error.code, machine.code
                )));
            }
        }
    }
    Ok(())
}
