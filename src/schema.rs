//! Per-record-type schema: the field table and merge policy.
//!
//! A [`Schema`] is built once at startup with [`SchemaBuilder`] and shared by
//! reference (usually `Arc<Schema>`) with every [`Bucket`](crate::Bucket)
//! that stores that record type. It replaces per-class registries: each field
//! is an explicit [`FieldSpec`] consulted by the generic get/merge/validate
//! logic.
//!
//! ```
//! use concord::{Resolver, Schema, FieldSpec};
//! use serde_json::json;
//!
//! let schema = Schema::builder("users")
//!     .allow_mult(true)
//!     .value("ids", FieldSpec::new().default_value(json!([])).resolve_with(Resolver::Union))
//!     .value("score", FieldSpec::new().resolve_with(Resolver::Max))
//!     .build();
//! assert_eq!(schema.fields().count(), 2);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::hooks::{Hooks, NoHooks};
use crate::merge::MergeError;
use crate::record::{Record, ValidationErrors};
use crate::resolver::Resolver;
use crate::value::ValueKind;

/// Whole-record merge override. Receives the schema so it can delegate to
/// [`Schema::merge_fields`] before adjusting the result.
pub type MergeFn = dyn Fn(&Schema, Vec<Record>) -> Result<Record, MergeError> + Send + Sync;

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// Declaration of one field.
#[derive(Clone, Debug, Default)]
pub struct FieldSpec {
    /// Expected kind; checked on save. Inferred from `default` when unset.
    pub kind: Option<ValueKind>,
    /// Value used when the field is absent on a new or loaded record.
    pub default: Value,
    /// Resolver applied when siblings disagree. `None` leaves the field to
    /// the base sibling.
    pub resolver: Option<Resolver>,
}

impl FieldSpec {
    /// An untyped field with no default and no resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default value.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    /// Set the merge resolver.
    #[must_use]
    pub fn resolve_with(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the expected kind explicitly.
    #[must_use]
    pub const fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Immutable description of a record type.
pub struct Schema {
    bucket: String,
    allow_mult: bool,
    fields: BTreeMap<String, FieldSpec>,
    merge_override: Option<Arc<MergeFn>>,
    hooks: Arc<dyn Hooks>,
}

impl Schema {
    /// Start declaring a record type stored in `bucket`.
    #[must_use]
    pub fn builder(bucket: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            bucket: bucket.into(),
            allow_mult: false,
            fields: BTreeMap::new(),
            merge_override: None,
            hooks: Arc::new(NoHooks),
        }
    }

    /// Bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Whether the bucket must keep siblings.
    #[must_use]
    pub const fn allow_mult(&self) -> bool {
        self.allow_mult
    }

    /// Declared fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Declaration of `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Lifecycle hooks.
    #[must_use]
    pub fn hooks(&self) -> &dyn Hooks {
        self.hooks.as_ref()
    }

    pub(crate) fn merge_override(&self) -> Option<&MergeFn> {
        self.merge_override.as_deref()
    }

    /// A new record keyed `key` with every default filled in.
    #[must_use]
    pub fn new_record(&self, key: impl Into<String>) -> Record {
        let mut record = Record::with_key(key);
        self.apply_defaults(&mut record);
        record
    }

    /// Fill absent fields with their declared defaults.
    pub fn apply_defaults(&self, record: &mut Record) {
        let values = record.values_mut();
        for (name, spec) in &self.fields {
            if !spec.default.is_null() && !values.contains_key(name) {
                values.insert(name.clone(), spec.default.clone());
            }
        }
    }

    /// Check the record against the declared field kinds and the hooks.
    #[must_use]
    pub fn validate(&self, record: &Record) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if record.key().is_none() {
            errors.add("key", "is missing");
        }
        for (name, spec) in &self.fields {
            if let (Some(kind), Some(value)) = (spec.kind, record.get(name)) {
                let found = ValueKind::of(value);
                if found != kind {
                    errors.add(name.clone(), format!("expected {kind}, got {found}"));
                }
            }
        }
        self.hooks.validate(record, &mut errors);
        errors
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("bucket", &self.bucket)
            .field("allow_mult", &self.allow_mult)
            .field("fields", &self.fields)
            .field("merge_override", &self.merge_override.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SchemaBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Schema`].
pub struct SchemaBuilder {
    bucket: String,
    allow_mult: bool,
    fields: BTreeMap<String, FieldSpec>,
    merge_override: Option<Arc<MergeFn>>,
    hooks: Arc<dyn Hooks>,
}

impl SchemaBuilder {
    /// Require the bucket to keep concurrent writes as siblings.
    #[must_use]
    pub const fn allow_mult(mut self, allow: bool) -> Self {
        self.allow_mult = allow;
        self
    }

    /// Declare a field. Redeclaring a name replaces the earlier spec.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, mut spec: FieldSpec) -> Self {
        if spec.kind.is_none() && !spec.default.is_null() {
            spec.kind = Some(ValueKind::of(&spec.default));
        }
        self.fields.insert(name.into(), spec);
        self
    }

    /// Replace the whole-record merge step.
    #[must_use]
    pub fn merge_with<F>(mut self, merge: F) -> Self
    where
        F: Fn(&Schema, Vec<Record>) -> Result<Record, MergeError> + Send + Sync + 'static,
    {
        self.merge_override = Some(Arc::new(merge));
        self
    }

    /// Install lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl Hooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Finish the declaration.
    #[must_use]
    pub fn build(self) -> Schema {
        Schema {
            bucket: self.bucket,
            allow_mult: self.allow_mult,
            fields: self.fields,
            merge_override: self.merge_override,
            hooks: self.hooks,
        }
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder("things")
            .value("tags", FieldSpec::new().default_value(json!([])).resolve_with(Resolver::Union))
            .value("count", FieldSpec::new().kind(ValueKind::Number))
            .value("note", FieldSpec::new())
            .build()
    }

    #[test]
    fn kind_is_inferred_from_default() {
        let s = schema();
        assert_eq!(s.field("tags").unwrap().kind, Some(ValueKind::Array));
        assert_eq!(s.field("note").unwrap().kind, None);
    }

    #[test]
    fn new_record_has_defaults() {
        let r = schema().new_record("a");
        assert_eq!(r.get("tags"), Some(&json!([])));
        assert!(r.get("count").is_none());
    }

    #[test]
    fn validate_reports_missing_key_and_kind() {
        let s = schema();
        let mut r = Record::new();
        r.set("count", json!("three"));
        r.set("note", json!(42));
        let errs = s.validate(&r);
        assert_eq!(errs.get("key"), ["is missing".to_owned()]);
        assert_eq!(errs.get("count"), ["expected number, got string".to_owned()]);
        assert!(errs.get("note").is_empty());
    }

    #[derive(Debug)]
    struct RequireOwner;

    impl Hooks for RequireOwner {
        fn validate(&self, record: &Record, errors: &mut ValidationErrors) {
            if record.get("owner").is_none() {
                errors.add("owner", "is required");
            }
        }
    }

    #[test]
    fn hook_validation_runs() {
        let s = Schema::builder("b").hooks(RequireOwner).build();
        let errs = s.validate(&Record::with_key("k"));
        assert_eq!(errs.get("owner"), ["is required".to_owned()]);
    }
}
