use serde::{Deserialize, Serialize};
use std::fmt;

/// FHIR R4B SearchParameter type enumeration
/// See: https://hl7.org/fhir/R4B/search.html#table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

/// Supported search modifiers (subset per FHIR R4B)
/// Applied as suffix to parameter name: `name:modifier`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModifier {
    Exact,
    Contains,
    Text,
    In,
    NotIn,
    Below,
    Above,
    Not,
    Identifier,   // for reference parameters
    Type(String), // e.g., subject:Patient
    Missing,      // value should be boolean (handled during parsing)
    OfType,       // identifier type filtering: type|system|value
}

/// Prefixes for number/date search values
/// e.g., `ge2020-01-01`, `lt5.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa, // starts after
    Eb, // ends before
    Ap, // approximately
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
            SearchPrefix::Ap => "ap",
        };
        f.write_str(s)
    }
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }
}

/// A hint about the shape of the JSON element a search parameter's
/// expression points at, beyond what `SearchParameterType` alone conveys.
/// Drives the GIN-containment fast paths and array-vs-scalar handling in
/// the per-type predicate builders (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ElementTypeHint {
    #[default]
    Unknown,
    /// The expression resolves to a JSON array of the named element type.
    Array(String),
    /// `HumanName` (family/given/text all searched together).
    HumanName,
    /// A plain code string (e.g. `Patient.gender`), not a `CodeableConcept`/`Coding`.
    SimpleCode,
    /// `Identifier` (system|value pair).
    Identifier,
    /// `Period` (start/end pair).
    Period,
}

impl ElementTypeHint {
    #[must_use]
    pub fn is_human_name(&self) -> bool {
        matches!(self, Self::HumanName)
    }

    #[must_use]
    pub fn is_identifier(&self) -> bool {
        matches!(self, Self::Identifier)
    }

    #[must_use]
    pub fn is_period(&self) -> bool {
        matches!(self, Self::Period)
    }
}

/// One component of a composite search parameter's definition (§4.6 `composite`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParameterComponent {
    /// The referenced component's FHIRPath expression, relative to the match.
    pub expression: String,
    /// Canonical URL of the component `SearchParameter` (informational).
    pub definition: Option<String>,
}

impl SearchParameterComponent {
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            definition: None,
        }
    }
}

/// A single search parameter, as loaded into the registry (C2, §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParameter {
    /// The search code, e.g. `name`, `_id`.
    pub code: String,
    /// Canonical URL, e.g. `http://hl7.org/fhir/SearchParameter/Patient-name`.
    pub url: String,
    pub param_type: SearchParameterType,
    /// Resource types this parameter applies to. `"Resource"` or
    /// `"DomainResource"` marks it as common (applies to every type, §4.2).
    pub base: Vec<String>,
    pub expression: Option<String>,
    pub description: Option<String>,
    pub element_type_hint: ElementTypeHint,
    /// Reference target resource types (reference-typed parameters only).
    pub target: Vec<String>,
    /// Component definitions (composite-typed parameters only).
    pub component: Vec<SearchParameterComponent>,
}

impl SearchParameter {
    pub fn new<C: Into<String>, U: Into<String>>(
        code: C,
        url: U,
        param_type: SearchParameterType,
        base: Vec<String>,
    ) -> Self {
        Self {
            code: code.into(),
            url: url.into(),
            param_type,
            base,
            expression: None,
            description: None,
            element_type_hint: ElementTypeHint::Unknown,
            target: Vec::new(),
            component: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_element_type_hint(mut self, hint: ElementTypeHint) -> Self {
        self.element_type_hint = hint;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: Vec<String>) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: Vec<SearchParameterComponent>) -> Self {
        self.component = component;
        self
    }

    /// A parameter is "common" when its base includes `Resource` or
    /// `DomainResource` — it applies to every resource type (§4.2).
    #[must_use]
    pub fn is_common(&self) -> bool {
        self.base
            .iter()
            .any(|b| b == "Resource" || b == "DomainResource")
    }
}

/// A single search parameter definition (metadata), used by the
/// conformance generator (C11) for the summary (code + type + description)
/// view of a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SearchParameterType,
    pub description: Option<String>,
}

impl SearchParameterDefinition {
    pub fn new<N: Into<String>>(name: N, kind: SearchParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Container for parameter definitions
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameters {
    pub params: Vec<SearchParameterDefinition>,
}

impl SearchParameters {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn with_param(mut self, def: SearchParameterDefinition) -> Self {
        self.params.push(def);
        self
    }
}

impl From<&SearchParameter> for SearchParameterDefinition {
    fn from(param: &SearchParameter) -> Self {
        let mut def = SearchParameterDefinition::new(param.code.clone(), param.param_type);
        if let Some(desc) = &param.description {
            def = def.with_description(desc.clone());
        }
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_base_detected() {
        let p = SearchParameter::new(
            "_id",
            "http://hl7.org/fhir/SearchParameter/Resource-id",
            SearchParameterType::Token,
            vec!["Resource".to_string()],
        );
        assert!(p.is_common());

        let p = SearchParameter::new(
            "name",
            "http://hl7.org/fhir/SearchParameter/Patient-name",
            SearchParameterType::String,
            vec!["Patient".to_string()],
        );
        assert!(!p.is_common());
    }

    #[test]
    fn element_type_hint_predicates() {
        assert!(ElementTypeHint::HumanName.is_human_name());
        assert!(ElementTypeHint::Identifier.is_identifier());
        assert!(ElementTypeHint::Period.is_period());
        assert!(!ElementTypeHint::Unknown.is_human_name());
    }

    #[test]
    fn definition_view_carries_code_and_type() {
        let p = SearchParameter::new(
            "name",
            "http://hl7.org/fhir/SearchParameter/Patient-name",
            SearchParameterType::String,
            vec!["Patient".to_string()],
        )
        .with_description("A patient's name");
        let def = SearchParameterDefinition::from(&p);
        assert_eq!(def.name, "name");
        assert_eq!(def.kind, SearchParameterType::String);
        assert_eq!(def.description.as_deref(), Some("A patient's name"));
    }
}
