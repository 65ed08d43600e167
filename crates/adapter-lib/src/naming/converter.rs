//! Mapping between series labels and Kubernetes resources

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::mapper::ResourceMapper;
use super::template::{Template, TemplateData, Value};
use crate::client::Series;
use crate::config::ResourceMapping;
use crate::error::{ConfigError, ResolutionError};
use crate::models::GroupResource;

/// Converts between label names and the resources they identify
pub trait ResourceConverter: Send + Sync {
    /// Resources identified by the labels of a series, and whether any of
    /// them is the namespace resource
    fn resources_for_series(&self, series: &Series) -> (Vec<GroupResource>, bool);

    /// Label that holds names of the given resource
    fn label_for_resource(&self, resource: &GroupResource) -> Result<String, ResolutionError>;
}

/// `.`/`-` are not valid in label names
fn sanitize_group(group: &str) -> String {
    group.replace(['.', '-'], "_")
}

/// Arguments of a resource label template: `<<.Group>>` and `<<.Resource>>`
struct LabelTemplateArgs<'a> {
    group: &'a str,
    resource: &'a str,
}

impl TemplateData for LabelTemplateArgs<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "Group" => Some(Value::Str(self.group.to_string())),
            "Resource" => Some(Value::Str(self.resource.to_string())),
            _ => None,
        }
    }
}

const GROUP_MARKER: &str = "\u{0}group\u{0}";
const RESOURCE_MARKER: &str = "\u{0}resource\u{0}";

/// Inverse of a label template: pulls group and resource back out of a label
#[derive(Debug)]
struct LabelExtractor {
    regex: Regex,
}

impl LabelExtractor {
    fn new(template: &Template) -> Result<Self, ConfigError> {
        let matcher_error = |reason: String| ConfigError::LabelMatcher {
            template: template.source().to_string(),
            reason,
        };

        let rendered = template
            .render(&LabelTemplateArgs {
                group: GROUP_MARKER,
                resource: RESOURCE_MARKER,
            })
            .map_err(|e| matcher_error(e.to_string()))?;
        if rendered.is_empty() {
            return Err(matcher_error("empty template".into()));
        }
        if !rendered.contains(RESOURCE_MARKER) {
            return Err(matcher_error(
                "must include at least `<<.Resource>>` in the label template".into(),
            ));
        }

        // Capture names must be unique, so repeated placeholders only match
        let pattern = regex::escape(&rendered)
            .replacen(GROUP_MARKER, "(?P<group>.*?)", 1)
            .replace(GROUP_MARKER, "(?:.*?)")
            .replacen(RESOURCE_MARKER, "(?P<resource>.+?)", 1)
            .replace(RESOURCE_MARKER, "(?:.+?)");

        let regex = Regex::new(&format!("^{}$", pattern)).map_err(|e| matcher_error(e.to_string()))?;
        Ok(Self { regex })
    }

    fn group_resource_for_label(&self, label: &str) -> Option<GroupResource> {
        let captures = self.regex.captures(label)?;
        let group = captures.name("group").map_or("", |m| m.as_str());
        let resource = captures.name("resource")?.as_str();
        Some(GroupResource::new(group, resource))
    }
}

#[derive(Debug, Default)]
struct LabelCache {
    label_to_resource: HashMap<String, GroupResource>,
    resource_to_label: HashMap<GroupResource, String>,
}

/// [`ResourceConverter`] driven by a label template and static overrides.
///
/// Resolved pairs are memoized for the lifetime of the converter and never
/// replaced once recorded.
pub struct LabelResourceConverter {
    cache: RwLock<LabelCache>,
    extractor: Option<LabelExtractor>,
    label_template: Option<Template>,
    mapper: Arc<dyn ResourceMapper>,
}

impl LabelResourceConverter {
    pub fn new(
        mapping: &ResourceMapping,
        mapper: Arc<dyn ResourceMapper>,
    ) -> Result<Self, ConfigError> {
        let mut label_template = None;
        let mut extractor = None;
        if let Some(source) = mapping.template.as_deref().filter(|t| !t.is_empty()) {
            let template = Template::parse(source).map_err(|e| ConfigError::Template {
                template: source.to_string(),
                source: e,
            })?;
            extractor = Some(LabelExtractor::new(&template)?);
            label_template = Some(template);
        }

        let mut cache = LabelCache::default();
        for (label, resource) in &mapping.overrides {
            let resource = mapper
                .normalize(resource)
                .map_err(|e| ConfigError::Override {
                    label: label.clone(),
                    source: e,
                })?;
            cache.label_to_resource.insert(label.clone(), resource.clone());
            cache.resource_to_label.insert(resource, label.clone());
        }

        Ok(Self {
            cache: RwLock::new(cache),
            extractor,
            label_template,
            mapper,
        })
    }

    fn cached_label(&self, resource: &GroupResource) -> Option<String> {
        self.cache.read().resource_to_label.get(resource).cloned()
    }

    fn make_label_for_resource(&self, resource: &GroupResource) -> Result<String, ResolutionError> {
        let template = self
            .label_template
            .as_ref()
            .ok_or(ResolutionError::NoLabelTemplate)?;

        let singular = self.mapper.singularize(&resource.resource)?;
        let group = sanitize_group(&resource.group);
        let label = template
            .render(&LabelTemplateArgs {
                group: &group,
                resource: &singular,
            })
            .map_err(|e| ResolutionError::Template {
                resource: resource.clone(),
                source: e,
            })?;
        if label.is_empty() {
            return Err(ResolutionError::EmptyLabel(resource.clone()));
        }

        // A concurrent caller may have won the race; keep whatever was recorded first
        let mut cache = self.cache.write();
        let label = cache
            .resource_to_label
            .entry(resource.clone())
            .or_insert(label)
            .clone();
        cache
            .label_to_resource
            .entry(label.clone())
            .or_insert_with(|| resource.clone());
        Ok(label)
    }
}

impl ResourceConverter for LabelResourceConverter {
    fn resources_for_series(&self, series: &Series) -> (Vec<GroupResource>, bool) {
        let mut resources = Vec::new();
        let mut updates = Vec::new();
        let mut namespaced = false;

        {
            let cache = self.cache.read();
            for label in series.labels.keys() {
                let resource = match cache.label_to_resource.get(label) {
                    Some(resource) => resource.clone(),
                    None => {
                        let Some(candidate) = self
                            .extractor
                            .as_ref()
                            .and_then(|e| e.group_resource_for_label(label))
                        else {
                            continue;
                        };
                        match self.mapper.normalize(&candidate) {
                            Ok(resource) => {
                                updates.push((label.clone(), resource.clone()));
                                resource
                            }
                            Err(e) => {
                                debug!(
                                    label = %label,
                                    resource = %candidate,
                                    error = %e,
                                    "Unable to normalize resource from label, skipping"
                                );
                                continue;
                            }
                        }
                    }
                };

                if resource.is_namespace() {
                    namespaced = true;
                }
                resources.push(resource);
            }
        }

        if !updates.is_empty() {
            let mut cache = self.cache.write();
            for (label, resource) in updates {
                cache.label_to_resource.entry(label).or_insert(resource);
            }
        }

        (resources, namespaced)
    }

    fn label_for_resource(&self, resource: &GroupResource) -> Result<String, ResolutionError> {
        if let Some(label) = self.cached_label(resource) {
            return Ok(label);
        }

        let canonical = self.mapper.normalize(resource)?;
        if canonical != *resource {
            if let Some(label) = self.cached_label(&canonical) {
                return Ok(label);
            }
        }

        self.make_label_for_resource(&canonical)
    }
}
