//! Typed deployment settings parsed from the merged document.
//!
//! The shape follows the ECS setting file: an `ECS` block with a task
//! definition and an optional service, plus an optional `ELB` block. Keys
//! are PascalCase, matching the AWS API input shapes. Blocks handed through
//! to the deployment collaborator untouched are kept as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Tag used for images with no tag, and the default override.
pub const DEFAULT_TAG: &str = "latest";

/// Tag token replaced by the override tag.
pub const TAG_PLACEHOLDER: &str = "$tag";

/// Top-level deployment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<f64>,

    /// Load balancer definition (opaque)
    #[serde(rename = "ELB", default, skip_serializing_if = "Option::is_none")]
    pub elb: Option<Value>,

    #[serde(rename = "ECS")]
    pub ecs: EcsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct EcsSettings {
    /// Service definition (opaque)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Value>,

    pub task_definition: TaskDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskDefinition {
    pub family: String,

    pub container_definitions: Vec<ContainerDefinition>,

    /// Remaining task definition parameters, passed through
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDefinition {
    pub name: String,

    /// Image reference, `repository[:tag]`
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<KeyValuePair>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortMapping {
    pub container_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

/// Decode the merged document into [`Settings`].
///
/// # Errors
///
/// Returns [`Error::Parse`] on invalid JSON, unknown top-level or `ECS`
/// members, missing required fields, or mistyped values.
pub fn parse(merged: &str) -> Result<Settings> {
    serde_json::from_str(merged).map_err(Error::Parse)
}

/// Resolve image tags across every container definition.
///
/// - `repo:$tag` becomes `repo:<override_tag>`
/// - `repo` or `repo:` becomes `repo:latest`
/// - any other tag is left untouched
///
/// Order-preserving; no container is added or removed.
pub fn normalize_image_tags(mut settings: Settings, override_tag: &str) -> Settings {
    for container in &mut settings.ecs.task_definition.container_definitions {
        container.image = normalize_image(&container.image, override_tag);
    }
    settings
}

/// Resolve the tag of a single image reference.
pub fn normalize_image(image: &str, override_tag: &str) -> String {
    // Digest references pin an exact image.
    if image.contains('@') {
        return image.to_string();
    }

    let (repository, tag) = split_image(image);
    match tag {
        Some(TAG_PLACEHOLDER) => format!("{}:{}", repository, override_tag),
        None | Some("") => format!("{}:{}", repository, DEFAULT_TAG),
        Some(_) => image.to_string(),
    }
}

/// Split `repository[:tag]`.
///
/// A colon followed by a path (`registry:5000/app`) is a registry port, not
/// a tag.
fn split_image(image: &str) -> (&str, Option<&str>) {
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag)),
        _ => (image, None),
    }
}
