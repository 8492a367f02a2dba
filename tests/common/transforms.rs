//! Test transforms for `github__orgs` and `github__repos`

use graphline::{
    CorrelationContext, CorrelationKey, DestinationEntry, RawRecord, StreamId, Transform,
    TransformError, TransformRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn orgs_stream() -> StreamId {
    StreamId::new("github", "orgs").unwrap()
}

pub fn repos_stream() -> StreamId {
    StreamId::new("github", "repos").unwrap()
}

/// Emits one `vcs_Organization` per org record.
pub struct OrgsTransform {
    types: Vec<String>,
}

impl OrgsTransform {
    pub fn new() -> Self {
        Self {
            types: vec!["vcs_Organization".to_string()],
        }
    }
}

impl Transform for OrgsTransform {
    fn id(&self) -> &str {
        "github_orgs"
    }

    fn destination_types(&self) -> &[String] {
        &self.types
    }

    fn convert(
        &self,
        record: &RawRecord,
        _context: &CorrelationContext,
    ) -> Result<Vec<DestinationEntry>, TransformError> {
        let login = record
            .field("login")
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::MissingField("login".into()))?;
        Ok(vec![DestinationEntry::of_type("vcs_Organization")
            .with_field("uid", login.to_lowercase())
            .with_field("source", "GitHub")])
    }
}

/// Emits one `vcs_Repository` per repo record, referencing its organization
/// when the org was seen earlier in the run.
pub struct ReposTransform {
    types: Vec<String>,
    deps: Vec<StreamId>,
}

impl ReposTransform {
    pub fn new() -> Self {
        Self {
            types: vec!["vcs_Repository".to_string()],
            deps: vec![orgs_stream()],
        }
    }
}

impl Transform for ReposTransform {
    fn id(&self) -> &str {
        "github_repos"
    }

    fn destination_types(&self) -> &[String] {
        &self.types
    }

    fn dependencies(&self) -> &[StreamId] {
        &self.deps
    }

    fn convert(
        &self,
        record: &RawRecord,
        context: &CorrelationContext,
    ) -> Result<Vec<DestinationEntry>, TransformError> {
        let name = record
            .field("name")
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::MissingField("name".into()))?;

        let mut entry = DestinationEntry::of_type("vcs_Repository").with_field("name", name);

        let org = record
            .field("org_id")
            .and_then(CorrelationKey::from_value)
            .and_then(|key| context.get(&orgs_stream(), &key));
        if let Some(login) = org.and_then(|o| o.field("login")).and_then(Value::as_str) {
            entry = entry.with_field("organization", json!({"uid": login.to_lowercase()}));
        }
        Ok(vec![entry])
    }
}

/// Registry with both test transforms registered explicitly.
pub fn registry() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry.register(orgs_stream(), Arc::new(OrgsTransform::new()));
    registry.register(repos_stream(), Arc::new(ReposTransform::new()));
    registry
}
