/// Error knowledge graph: the catalog plus two derived indices.
///
/// - name index: lowercased machine name/alias -> machine code
/// - error index: error code -> set of machine codes that list it
///
/// Both are built once in [`ErrorGraph::new`] and never mutated, so one instance can be
/// shared across tasks behind an `Arc` without locking.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::error::KgError;
use crate::model::{ErrorDetails, ErrorEntry, MachineType, SearchCandidate};

pub struct ErrorGraph {
    machines: BTreeMap<String, MachineType>,
    name_index: HashMap<String, String>,
    error_index: HashMap<String, BTreeSet<String>>,
}

impl ErrorGraph {
    pub fn new(catalog: Vec<MachineType>) -> Self {
        let machines: BTreeMap<String, MachineType> = catalog
            .into_iter()
            .map(|m| (m.code.clone(), m))
            .collect();
        let name_index = build_name_index(machines.values());
        let error_index = build_error_index(machines.values());
        debug!(
            machines = machines.len(),
            names = name_index.len(),
            error_codes = error_index.len(),
            "error graph built"
        );
        Self {
            machines,
            name_index,
            error_index,
        }
    }

    /// Machine types ordered by code.
    pub fn machines(&self) -> impl Iterator<Item = &MachineType> {
        self.machines.values()
    }

    pub fn machine(&self, code: &str) -> Option<&MachineType> {
        self.machines.get(code)
    }

    /// Exact, case-insensitive match of a name or alias. No trimming, no fuzzy matching.
    pub fn resolve_machine(&self, name: &str) -> Result<&str, KgError> {
        self.name_index
            .get(&name.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| KgError::MachineNotFound {
                machine: name.to_string(),
            })
    }

    /// Look up `error_code` on a specific machine. A code that only exists for another
    /// machine type is reported as not found.
    pub fn lookup_error(&self, machine_name: &str, error_code: &str) -> Result<ErrorDetails, KgError> {
        let machine_code = self.resolve_machine(machine_name)?;

        let linked = self
            .error_index
            .get(error_code)
            .is_some_and(|machines| machines.contains(machine_code));
        if !linked {
            return Err(KgError::ErrorCodeNotFound {
                code: error_code.to_string(),
                machine: Some(machine_name.to_string()),
            });
        }

        self.get_details(error_code, None)
    }

    /// Catalog read by code. `similarity` is attached verbatim when given.
    pub fn get_details(&self, code: &str, similarity: Option<f64>) -> Result<ErrorDetails, KgError> {
        let not_found = || KgError::ErrorCodeNotFound {
            code: code.to_string(),
            machine: None,
        };
        let machine_codes = self.error_index.get(code).ok_or_else(not_found)?;

        let entry = machine_codes
            .iter()
            .find_map(|mc| self.entry(mc, code))
            .ok_or_else(not_found)?;

        let machines = machine_codes
            .iter()
            .filter_map(|mc| self.machines.get(mc))
            .map(|m| m.name.clone())
            .collect();

        Ok(ErrorDetails {
            code: entry.code.clone(),
            description: entry.description.clone(),
            symptoms: entry.symptoms.clone(),
            steps: entry.steps.clone(),
            machines,
            similarity,
        })
    }

    /// Whether `code` is one of the errors registered for `machine_code`.
    pub fn has_error(&self, machine_code: &str, code: &str) -> bool {
        self.entry(machine_code, code).is_some()
    }

    /// One candidate per error of the machine, in catalog order.
    pub fn candidates(&self, machine_code: &str) -> Vec<SearchCandidate> {
        self.machines
            .get(machine_code)
            .map(|m| m.errors.iter().map(SearchCandidate::from_entry).collect())
            .unwrap_or_default()
    }

    fn entry(&self, machine_code: &str, code: &str) -> Option<&ErrorEntry> {
        self.machines
            .get(machine_code)?
            .errors
            .iter()
            .find(|e| e.code == code)
    }
}

/// Last write wins on duplicate keys; `catalog::validate` rejects such catalogs up front.
fn build_name_index<'a>(machines: impl Iterator<Item = &'a MachineType>) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for machine in machines {
        index.insert(machine.name.to_lowercase(), machine.code.clone());
        for alias in &machine.aliases {
            index.insert(alias.to_lowercase(), machine.code.clone());
        }
    }
    index
}

fn build_error_index<'a>(
    machines: impl Iterator<Item = &'a MachineType>,
) -> HashMap<String, BTreeSet<String>> {
    let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
    for machine in machines {
        for error in &machine.errors {
            index
                .entry(error.code.clone())
                .or_default()
                .insert(machine.code.clone());
        }
    }
    index
}
