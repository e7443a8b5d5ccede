//! Search parameter registry (C2, §4.2) and search translator (C7, §4.6).
//!
//! [`registry::SearchParameterRegistry`] answers "is this code allowed for
//! this type, and what does it mean"; [`translate::translate`] turns a raw
//! query string into a parameterized SQL predicate a storage backend embeds
//! in its `SELECT`. [`parser`] and [`types`] are the pieces translate.rs
//! composes: query-string parsing and per-FHIR-type predicate building.

pub mod common;
pub mod loader;
pub mod parameters;
pub mod parser;
pub mod registry;
pub mod sql_builder;
pub mod translate;
pub mod types;

pub use common::register_common_parameters;
pub use loader::{LoaderError, build_registry, load_bundle, parse_search_parameter};
pub use parameters::{
    ElementTypeHint, SearchModifier, SearchParameter, SearchParameterComponent,
    SearchParameterDefinition, SearchParameterType, SearchParameters,
};
pub use parser::{
    ParsedParam, ParsedParameters, ParsedValue, SearchParameterParser, SearchValidationError,
};
pub use registry::SearchParameterRegistry;
pub use sql_builder::{
    SqlBuilder, SqlBuilderError, SqlParam, build_jsonb_accessor, fhirpath_to_jsonb_path,
};
pub use translate::{TranslateError, TranslatedSearch, translate};
pub use types::{
    DateRange, build_date_search, build_human_name_search, build_identifier_search,
    build_number_search, build_period_search, build_quantity_search, build_string_search,
    build_token_search, dispatch_search, parse_date_range, parse_token_value,
};
