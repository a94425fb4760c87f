//! Autonomous Data Warehouse
//!
//! Synchronizer and attribute codec for autonomous data warehouses. Declared
//! attributes are explicit `Option`s: `None` means "not set by the caller"
//! and is never sent.

use super::registry::{require_resource, ResourceDef};
use crate::engine::{
    LifecycleState, Mutation, Observation, Operation, Outcome, RemoteCall, ResourceId, Status,
    SyncError, Synchronizer, TimeoutOverrides, Transition, Transitions,
};
use crate::remote::ControlPlaneClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub const RESOURCE_KEY: &str = "autonomous-data-warehouse";

pub type FreeformTags = BTreeMap<String, String>;
pub type DefinedTags = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseModel {
    LicenseIncluded,
    BringYourOwnLicense,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStrings {
    #[serde(default)]
    pub high: Option<String>,
    #[serde(default)]
    pub low: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
}

/// Declared state: caller-set attributes plus computed ones written back
/// after a successful operation
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdwDeclared {
    pub admin_password: Option<String>,
    /// Changing this requires replacing the warehouse
    pub compartment_id: Option<String>,
    pub cpu_core_count: Option<u32>,
    pub data_storage_size_in_tbs: Option<u32>,
    /// Changing this requires replacing the warehouse
    pub db_name: Option<String>,
    pub display_name: Option<String>,
    /// Changing this requires replacing the warehouse
    pub license_model: Option<LicenseModel>,
    pub freeform_tags: Option<FreeformTags>,
    pub defined_tags: Option<DefinedTags>,

    // Computed
    pub id: Option<ResourceId>,
    pub state: Option<LifecycleState>,
    pub lifecycle_details: Option<String>,
    pub service_console_url: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
    pub connection_strings: Option<ConnectionStrings>,
}

impl fmt::Debug for AdwDeclared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdwDeclared")
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .field("compartment_id", &self.compartment_id)
            .field("cpu_core_count", &self.cpu_core_count)
            .field("data_storage_size_in_tbs", &self.data_storage_size_in_tbs)
            .field("db_name", &self.db_name)
            .field("display_name", &self.display_name)
            .field("license_model", &self.license_model)
            .field("freeform_tags", &self.freeform_tags)
            .field("defined_tags", &self.defined_tags)
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Remote representation returned by create, get and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdwSnapshot {
    pub id: String,
    pub lifecycle_state: String,
    #[serde(default)]
    pub compartment_id: Option<String>,
    #[serde(default)]
    pub lifecycle_details: Option<String>,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub cpu_core_count: Option<u32>,
    #[serde(default, rename = "dataStorageSizeInTBs")]
    pub data_storage_size_in_tbs: Option<u32>,
    #[serde(default)]
    pub license_model: Option<LicenseModel>,
    #[serde(default)]
    pub service_console_url: Option<String>,
    #[serde(default)]
    pub connection_strings: Option<ConnectionStrings>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub freeform_tags: FreeformTags,
    #[serde(default)]
    pub defined_tags: DefinedTags,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDetails<'a> {
    admin_password: &'a str,
    compartment_id: &'a str,
    cpu_core_count: u32,
    #[serde(rename = "dataStorageSizeInTBs")]
    data_storage_size_in_tbs: u32,
    db_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    license_model: Option<LicenseModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_tags: Option<&'a FreeformTags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defined_tags: Option<&'a DefinedTags>,
}

/// Attributes an update sends; unchanged ones stay `None` and are omitted
#[derive(Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdwPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_core_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "dataStorageSizeInTBs")]
    pub data_storage_size_in_tbs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeform_tags: Option<FreeformTags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defined_tags: Option<DefinedTags>,
}

impl AdwPatch {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the attributes this patch changes
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.admin_password.is_some() {
            fields.push("admin_password");
        }
        if self.cpu_core_count.is_some() {
            fields.push("cpu_core_count");
        }
        if self.data_storage_size_in_tbs.is_some() {
            fields.push("data_storage_size_in_tbs");
        }
        if self.display_name.is_some() {
            fields.push("display_name");
        }
        if self.freeform_tags.is_some() {
            fields.push("freeform_tags");
        }
        if self.defined_tags.is_some() {
            fields.push("defined_tags");
        }
        fields
    }
}

impl fmt::Debug for AdwPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AdwPatch").field(&self.fields()).finish()
    }
}

/// `Some(desired)` when the caller set a value that differs from `prior`
fn changed<T: Clone + PartialEq>(prior: &Option<T>, desired: &Option<T>) -> Option<T> {
    match desired {
        Some(value) if prior.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}

/// Like [`changed`], but only the namespaces and keys the caller declared
/// count; the service adds namespaces of its own.
fn defined_tags_changed(
    prior: &Option<DefinedTags>,
    desired: &Option<DefinedTags>,
) -> Option<DefinedTags> {
    let desired = desired.as_ref()?;
    let differs = desired.iter().any(|(namespace, tags)| {
        let observed = prior.as_ref().and_then(|prior| prior.get(namespace));
        tags.iter()
            .any(|(key, value)| observed.and_then(|observed| observed.get(key)) != Some(value))
    });
    differs.then(|| desired.clone())
}

/// Synchronizer for one autonomous data warehouse
pub struct AutonomousDataWarehouseSync {
    client: ControlPlaneClient,
    def: &'static ResourceDef,
    transitions: Transitions,
    id: Option<ResourceId>,
}

impl AutonomousDataWarehouseSync {
    /// Synchronizer for a warehouse that does not exist yet
    pub fn new(client: ControlPlaneClient) -> Result<Self, SyncError> {
        let def = require_resource(RESOURCE_KEY)?;
        let transitions = def.transitions()?;
        tracing::debug!(
            "{} ({} service) synchronizer at {}",
            def.display_name,
            def.service,
            client.endpoint()
        );

        Ok(Self {
            client,
            def,
            transitions,
            id: None,
        })
    }

    /// Synchronizer for an existing warehouse
    pub fn with_identity(mut self, id: ResourceId) -> Self {
        self.id = Some(id);
        self
    }

    fn collection_url(&self) -> String {
        self.client.collection_url(&self.def.collection_path)
    }

    fn resource_url(&self, operation: Operation) -> Result<String, SyncError> {
        let id = self.id.as_ref().ok_or_else(|| SyncError::MissingIdentity {
            resource_type: RESOURCE_KEY.to_string(),
            operation,
        })?;
        Ok(self.client.resource_url(&self.def.collection_path, id))
    }

    fn decode(&self, value: Value) -> Result<AdwSnapshot, SyncError> {
        serde_json::from_value(value).map_err(|e| SyncError::Codec {
            resource_type: RESOURCE_KEY.to_string(),
            message: e.to_string(),
        })
    }

    /// Adopt the snapshot's identity
    fn remember(&mut self, snapshot: AdwSnapshot) -> Result<Status<AdwSnapshot>, SyncError> {
        let id = ResourceId::new(snapshot.id.clone()).ok_or_else(|| SyncError::Codec {
            resource_type: RESOURCE_KEY.to_string(),
            message: "response carries an empty id".to_string(),
        })?;
        self.id = Some(id);

        Ok(Status {
            state: LifecycleState::new(&snapshot.lifecycle_state),
            snapshot,
        })
    }

    fn required<'a, T: ?Sized>(
        value: Option<&'a T>,
        attribute: &'static str,
    ) -> Result<&'a T, SyncError> {
        value.ok_or(SyncError::MissingAttribute {
            resource_type: RESOURCE_KEY.to_string(),
            operation: Operation::Create,
            attribute,
        })
    }
}

#[async_trait]
impl Synchronizer for AutonomousDataWarehouseSync {
    type Declared = AdwDeclared;
    type Snapshot = AdwSnapshot;
    type Patch = AdwPatch;

    fn resource_type(&self) -> &str {
        RESOURCE_KEY
    }

    fn identity(&self) -> Option<&ResourceId> {
        self.id.as_ref()
    }

    fn transition(&self, mutation: Mutation) -> &Transition {
        self.transitions.get(mutation)
    }

    fn timeout_overrides(&self) -> Option<&TimeoutOverrides> {
        self.def.timeouts.as_ref()
    }

    async fn create(
        &mut self,
        declared: &AdwDeclared,
        call: &RemoteCall<'_>,
    ) -> Result<(), SyncError> {
        let details = CreateDetails {
            admin_password: Self::required(declared.admin_password.as_deref(), "admin_password")?,
            compartment_id: Self::required(declared.compartment_id.as_deref(), "compartment_id")?,
            cpu_core_count: *Self::required(declared.cpu_core_count.as_ref(), "cpu_core_count")?,
            data_storage_size_in_tbs: *Self::required(
                declared.data_storage_size_in_tbs.as_ref(),
                "data_storage_size_in_tbs",
            )?,
            db_name: Self::required(declared.db_name.as_deref(), "db_name")?,
            display_name: declared.display_name.as_deref(),
            license_model: declared.license_model,
            freeform_tags: declared.freeform_tags.as_ref(),
            defined_tags: declared.defined_tags.as_ref(),
        };
        let body = serde_json::to_value(&details).map_err(|e| SyncError::Codec {
            resource_type: RESOURCE_KEY.to_string(),
            message: e.to_string(),
        })?;

        // One token for every attempt so retries cannot create twice
        let retry_token = Uuid::new_v4().to_string();
        let url = self.collection_url();
        let client = &self.client;

        let outcome = call
            .run("create", || client.post(&url, &body, &retry_token))
            .await?;
        let response = match outcome {
            Outcome::Completed(response) => response,
            Outcome::NotFound => {
                return Err(SyncError::NotFound {
                    resource_type: RESOURCE_KEY.to_string(),
                    operation: Operation::Create,
                    attempts: 1,
                })
            }
        };

        let snapshot = self.decode(response)?;
        self.remember(snapshot)?;
        Ok(())
    }

    async fn fetch_status(
        &mut self,
        call: &RemoteCall<'_>,
    ) -> Result<Observation<AdwSnapshot>, SyncError> {
        let url = self.resource_url(call.operation())?;
        let client = &self.client;

        let outcome = call.run("get", || client.get(&url)).await?;
        match outcome {
            Outcome::Completed(response) => {
                let snapshot = self.decode(response)?;
                Ok(Observation::Found(self.remember(snapshot)?))
            }
            Outcome::NotFound => Ok(Observation::Gone),
        }
    }

    fn diff(
        &self,
        prior: &AdwDeclared,
        desired: &AdwDeclared,
    ) -> Result<Option<AdwPatch>, SyncError> {
        let mut replaced = Vec::new();
        if changed(&prior.compartment_id, &desired.compartment_id).is_some() {
            replaced.push("compartment_id".to_string());
        }
        if changed(&prior.db_name, &desired.db_name).is_some() {
            replaced.push("db_name".to_string());
        }
        if changed(&prior.license_model, &desired.license_model).is_some() {
            replaced.push("license_model".to_string());
        }
        if !replaced.is_empty() {
            return Err(SyncError::RequiresReplacement {
                resource_type: RESOURCE_KEY.to_string(),
                fields: replaced,
            });
        }

        let patch = AdwPatch {
            admin_password: changed(&prior.admin_password, &desired.admin_password),
            cpu_core_count: changed(&prior.cpu_core_count, &desired.cpu_core_count),
            data_storage_size_in_tbs: changed(
                &prior.data_storage_size_in_tbs,
                &desired.data_storage_size_in_tbs,
            ),
            display_name: changed(&prior.display_name, &desired.display_name),
            freeform_tags: changed(&prior.freeform_tags, &desired.freeform_tags),
            defined_tags: defined_tags_changed(&prior.defined_tags, &desired.defined_tags),
        };

        // The service refuses a password change combined with scaling
        if patch.admin_password.is_some() {
            let mut fields: Vec<String> = Vec::new();
            if patch.cpu_core_count.is_some() {
                fields.push("cpu_core_count".to_string());
            }
            if patch.data_storage_size_in_tbs.is_some() {
                fields.push("data_storage_size_in_tbs".to_string());
            }
            if !fields.is_empty() {
                fields.insert(0, "admin_password".to_string());
                return Err(SyncError::MutuallyExclusive {
                    resource_type: RESOURCE_KEY.to_string(),
                    fields,
                });
            }
        }

        if patch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(patch))
        }
    }

    async fn update(&mut self, patch: &AdwPatch, call: &RemoteCall<'_>) -> Result<(), SyncError> {
        let url = self.resource_url(Operation::Update)?;
        let body = serde_json::to_value(patch).map_err(|e| SyncError::Codec {
            resource_type: RESOURCE_KEY.to_string(),
            message: e.to_string(),
        })?;
        let client = &self.client;

        let outcome = call.run("update", || client.put(&url, &body)).await?;
        match outcome {
            Outcome::Completed(response) => {
                let snapshot = self.decode(response)?;
                self.remember(snapshot)?;
                Ok(())
            }
            Outcome::NotFound => Err(SyncError::NotFound {
                resource_type: RESOURCE_KEY.to_string(),
                operation: Operation::Update,
                attempts: 1,
            }),
        }
    }

    async fn delete(&mut self, call: &RemoteCall<'_>) -> Result<Outcome<()>, SyncError> {
        let url = self.resource_url(Operation::Delete)?;
        let client = &self.client;

        let outcome = call.run("delete", || client.delete(&url)).await?;
        if outcome.is_not_found() {
            return Ok(Outcome::NotFound);
        }
        Ok(Outcome::Completed(()))
    }

    fn materialize(&self, snapshot: &AdwSnapshot, out: &mut AdwDeclared) {
        if snapshot.compartment_id.is_some() {
            out.compartment_id = snapshot.compartment_id.clone();
        }
        if snapshot.cpu_core_count.is_some() {
            out.cpu_core_count = snapshot.cpu_core_count;
        }
        if snapshot.data_storage_size_in_tbs.is_some() {
            out.data_storage_size_in_tbs = snapshot.data_storage_size_in_tbs;
        }
        if snapshot.db_name.is_some() {
            out.db_name = snapshot.db_name.clone();
        }
        if snapshot.display_name.is_some() {
            out.display_name = snapshot.display_name.clone();
        }
        if snapshot.license_model.is_some() {
            out.license_model = snapshot.license_model;
        }
        if !snapshot.defined_tags.is_empty() {
            out.defined_tags = Some(snapshot.defined_tags.clone());
        }
        out.freeform_tags = Some(snapshot.freeform_tags.clone());

        out.id = ResourceId::new(snapshot.id.clone());
        out.state = Some(LifecycleState::new(&snapshot.lifecycle_state));
        out.lifecycle_details = snapshot.lifecycle_details.clone();
        out.service_console_url = snapshot.service_console_url.clone();
        out.time_created = snapshot.time_created;
        out.connection_strings = snapshot.connection_strings.clone();
    }
}
