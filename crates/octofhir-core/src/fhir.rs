use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::error::CoreError;

/// FHIR version enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FhirVersion {
    #[serde(rename = "4.1.0")]
    R4,
    #[serde(rename = "4.3.0")]
    R4B,
    #[serde(rename = "5.0.0")]
    R5,
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FhirVersion::R4B => write!(f, "4.3.0"),
            FhirVersion::R5 => write!(f, "5.0.0"),
            &FhirVersion::R4 => write!(f, "4.1.0"),
        }
    }
}

impl FromStr for FhirVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4.1.0" | "R4" => Ok(FhirVersion::R4),
            "4.3.0" | "R4B" => Ok(FhirVersion::R4B),
            "5.0.0" | "R5" => Ok(FhirVersion::R5),
            _ => Err(CoreError::invalid_resource_type(format!("Unknown FHIR version: {}", s))),
        }
    }
}

impl Default for FhirVersion {
    fn default() -> Self {
        FhirVersion::R4B
    }
}

/// Common FHIR resource types for MVP
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Practitioner,
    Organization,
    Encounter,
    Observation,
    Condition,
    DiagnosticReport,
    Medication,
    MedicationRequest,
    Procedure,
    Specimen,
    DocumentReference,
    Bundle,
    CapabilityStatement,
    StructureDefinition,
    ValueSet,
    CodeSystem,
    SearchParameter,
    OperationOutcome,
    #[serde(untagged)]
    Custom(String),
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Patient => write!(f, "Patient"),
            ResourceType::Practitioner => write!(f, "Practitioner"),
            ResourceType::Organization => write!(f, "Organization"),
            ResourceType::Encounter => write!(f, "Encounter"),
            ResourceType::Observation => write!(f, "Observation"),
            ResourceType::Condition => write!(f, "Condition"),
            ResourceType::DiagnosticReport => write!(f, "DiagnosticReport"),
            ResourceType::Medication => write!(f, "Medication"),
            ResourceType::MedicationRequest => write!(f, "MedicationRequest"),
            ResourceType::Procedure => write!(f, "Procedure"),
            ResourceType::Specimen => write!(f, "Specimen"),
            ResourceType::DocumentReference => write!(f, "DocumentReference"),
            ResourceType::Bundle => write!(f, "Bundle"),
            ResourceType::CapabilityStatement => write!(f, "CapabilityStatement"),
            ResourceType::StructureDefinition => write!(f, "StructureDefinition"),
            ResourceType::ValueSet => write!(f, "ValueSet"),
            ResourceType::CodeSystem => write!(f, "CodeSystem"),
            ResourceType::SearchParameter => write!(f, "SearchParameter"),
            ResourceType::OperationOutcome => write!(f, "OperationOutcome"),
            ResourceType::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for ResourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Patient" => Ok(ResourceType::Patient),
            "Practitioner" => Ok(ResourceType::Practitioner),
            "Organization" => Ok(ResourceType::Organization),
            "Encounter" => Ok(ResourceType::Encounter),
            "Observation" => Ok(ResourceType::Observation),
            "Condition" => Ok(ResourceType::Condition),
            "DiagnosticReport" => Ok(ResourceType::DiagnosticReport),
            "Medication" => Ok(ResourceType::Medication),
            "MedicationRequest" => Ok(ResourceType::MedicationRequest),
            "Procedure" => Ok(ResourceType::Procedure),
            "Specimen" => Ok(ResourceType::Specimen),
            "DocumentReference" => Ok(ResourceType::DocumentReference),
            "Bundle" => Ok(ResourceType::Bundle),
            "CapabilityStatement" => Ok(ResourceType::CapabilityStatement),
            "StructureDefinition" => Ok(ResourceType::StructureDefinition),
            "ValueSet" => Ok(ResourceType::ValueSet),
            "CodeSystem" => Ok(ResourceType::CodeSystem),
            "SearchParameter" => Ok(ResourceType::SearchParameter),
            "OperationOutcome" => Ok(ResourceType::OperationOutcome),
            name => {
                // Validate custom resource type name matches FHIR requirements
                if is_valid_resource_type_name(name) {
                    Ok(ResourceType::Custom(name.to_string()))
                } else {
                    Err(CoreError::invalid_resource_type(name.to_string()))
                }
            }
        }
    }
}

/// Validate if a string is a valid FHIR resource type name
pub fn is_valid_resource_type_name(name: &str) -> bool {
    // FHIR resource type names must start with uppercase letter and contain only letters
    !name.is_empty() &&
    name.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false) &&
    name.chars().all(|c| c.is_ascii_alphabetic())
}

/// The interaction types the guard (§4.3), storage engine (§4.6), and
/// conformance generator (§4.10) all key off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interaction {
    Read,
    #[serde(rename = "vread")]
    VRead,
    Create,
    Update,
    Patch,
    Delete,
    Search,
    History,
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::VRead => write!(f, "vread"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Patch => write!(f, "patch"),
            Self::Delete => write!(f, "delete"),
            Self::Search => write!(f, "search"),
            Self::History => write!(f, "history"),
        }
    }
}

impl FromStr for Interaction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "vread" => Ok(Self::VRead),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "patch" => Ok(Self::Patch),
            "delete" => Ok(Self::Delete),
            "search" => Ok(Self::Search),
            "history" => Ok(Self::History),
            other => Err(CoreError::interaction_not_allowed(format!(
                "unknown interaction '{other}'"
            ))),
        }
    }
}
