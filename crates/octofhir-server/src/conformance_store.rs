//! Conformance Artifact Store (C12, §4.11): a read-only, content-addressed
//! registry of `StructureDefinition`/`SearchParameter`/`OperationDefinition`
//! documents, loaded once at startup and never mutated (§5 "the conformance
//! artifact store [is] populated at startup and treated as immutable").

use std::collections::HashMap;
use std::sync::Arc;

use octofhir_core::FhirVersion;
use serde_json::Value;

/// The three document kinds this store holds (§3 "Conformance Artifact").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    StructureDefinition,
    SearchParameter,
    OperationDefinition,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructureDefinition => "StructureDefinition",
            Self::SearchParameter => "SearchParameter",
            Self::OperationDefinition => "OperationDefinition",
        }
    }
}

/// One stored document, identified by (`fhir_version`, `kind`, `id`) with a
/// canonical `url` (§3).
#[derive(Debug, Clone)]
pub struct ConformanceArtifact {
    pub fhir_version: FhirVersion,
    pub kind: ArtifactKind,
    pub id: String,
    pub url: String,
    pub name: Option<String>,
    pub status: Option<String>,
    /// Resource types the artifact applies to (meaningful for
    /// `SearchParameter`'s `base` filter, §4.11).
    pub base: Vec<String>,
    pub document: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub name: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub base: Option<String>,
}

impl ArtifactFilter {
    fn matches(&self, artifact: &ConformanceArtifact) -> bool {
        if let Some(name) = &self.name
            && artifact.name.as_deref() != Some(name.as_str())
        {
            return false;
        }
        if let Some(url) = &self.url
            && artifact.url != *url
        {
            return false;
        }
        if let Some(status) = &self.status
            && artifact.status.as_deref() != Some(status.as_str())
        {
            return false;
        }
        if let Some(base) = &self.base
            && !artifact.base.iter().any(|b| b == base)
        {
            return false;
        }
        true
    }
}

/// Pagination hints for a search response envelope (§4.11 "self, first,
/// previous, next, last").
#[derive(Debug, Clone)]
pub struct PageLinks {
    pub self_link: String,
    pub first: String,
    pub previous: Option<String>,
    pub next: Option<String>,
    pub last: String,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub documents: Vec<Value>,
    pub total: usize,
    pub links: PageLinks,
}

fn page_query(kind: ArtifactKind, count: usize, offset: usize) -> String {
    format!("?kind={}&_count={count}&_offset={offset}", kind.as_str())
}

/// C12: the artifact store itself. Construct once via
/// [`ConformanceArtifactStore::from_artifacts`], then share behind an `Arc`.
#[derive(Debug, Default)]
pub struct ConformanceArtifactStore {
    by_key: HashMap<(FhirVersion, ArtifactKind, String), Arc<ConformanceArtifact>>,
    by_kind: HashMap<(FhirVersion, ArtifactKind), Vec<Arc<ConformanceArtifact>>>,
}

impl ConformanceArtifactStore {
    #[must_use]
    pub fn from_artifacts(artifacts: impl IntoIterator<Item = ConformanceArtifact>) -> Self {
        let mut by_key = HashMap::new();
        let mut by_kind: HashMap<(FhirVersion, ArtifactKind), Vec<Arc<ConformanceArtifact>>> = HashMap::new();
        for artifact in artifacts {
            let artifact = Arc::new(artifact);
            by_key.insert((artifact.fhir_version, artifact.kind, artifact.id.clone()), artifact.clone());
            by_kind.entry((artifact.fhir_version, artifact.kind)).or_default().push(artifact);
        }
        Self { by_key, by_kind }
    }

    #[must_use]
    pub fn get(&self, version: FhirVersion, kind: ArtifactKind, id: &str) -> Option<Arc<ConformanceArtifact>> {
        self.by_key.get(&(version, kind, id.to_string())).cloned()
    }

    /// Filters, paginates, and builds link hints for a listing request
    /// (§4.11). `count` is clamped to at least 1; results are ordered by
    /// `id` for a stable, deterministic page boundary.
    #[must_use]
    pub fn search(&self, version: FhirVersion, kind: ArtifactKind, filter: &ArtifactFilter, count: usize, offset: usize) -> SearchPage {
        let count = count.max(1);
        let mut matched: Vec<&Arc<ConformanceArtifact>> = self
            .by_kind
            .get(&(version, kind))
            .into_iter()
            .flatten()
            .filter(|artifact| filter.matches(artifact))
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));

        let total = matched.len();
        let documents = matched.into_iter().skip(offset).take(count).map(|a| a.document.clone()).collect();

        let last_offset = total.saturating_sub(1) / count * count;
        let links = PageLinks {
            self_link: page_query(kind, count, offset),
            first: page_query(kind, count, 0),
            previous: (offset > 0).then(|| page_query(kind, count, offset.saturating_sub(count))),
            next: (offset + count < total).then(|| page_query(kind, count, offset + count)),
            last: page_query(kind, count, last_offset),
        };

        SearchPage { documents, total, links }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(id: &str, name: &str) -> ConformanceArtifact {
        ConformanceArtifact {
            fhir_version: FhirVersion::R4B,
            kind: ArtifactKind::SearchParameter,
            id: id.to_string(),
            url: format!("http://example.org/SearchParameter/{id}"),
            name: Some(name.to_string()),
            status: Some("active".to_string()),
            base: vec!["Patient".to_string()],
            document: json!({"id": id, "resourceType": "SearchParameter"}),
        }
    }

    #[test]
    fn get_finds_by_exact_key() {
        let store = ConformanceArtifactStore::from_artifacts(vec![artifact("a", "name")]);
        assert!(store.get(FhirVersion::R4B, ArtifactKind::SearchParameter, "a").is_some());
        assert!(store.get(FhirVersion::R4B, ArtifactKind::SearchParameter, "missing").is_none());
        assert!(store.get(FhirVersion::R5, ArtifactKind::SearchParameter, "a").is_none());
    }

    #[test]
    fn search_filters_by_name() {
        let store = ConformanceArtifactStore::from_artifacts(vec![artifact("a", "name"), artifact("b", "other")]);
        let filter = ArtifactFilter { name: Some("name".to_string()), ..Default::default() };
        let page = store.search(FhirVersion::R4B, ArtifactKind::SearchParameter, &filter, 20, 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0]["id"], "a");
    }

    #[test]
    fn search_paginates_deterministically() {
        let artifacts: Vec<_> = (0..5).map(|i| artifact(&format!("id{i}"), "name")).collect();
        let store = ConformanceArtifactStore::from_artifacts(artifacts);
        let page = store.search(FhirVersion::R4B, ArtifactKind::SearchParameter, &ArtifactFilter::default(), 2, 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.documents.len(), 2);
        assert_eq!(page.documents[0]["id"], "id2");
        assert!(page.links.previous.is_some());
        assert!(page.links.next.is_some());
    }

    #[test]
    fn last_page_has_no_next_link() {
        let artifacts: Vec<_> = (0..3).map(|i| artifact(&format!("id{i}"), "name")).collect();
        let store = ConformanceArtifactStore::from_artifacts(artifacts);
        let page = store.search(FhirVersion::R4B, ArtifactKind::SearchParameter, &ArtifactFilter::default(), 2, 2);
        assert!(page.links.next.is_none());
    }
}
