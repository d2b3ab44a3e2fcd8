//! Topic Addressing: hierarchical topic strings shared by gateways and the registry
//!
//! Grammar (every topic starts with BASE_TOPIC):
//! - `<base><project>/Online`
//! - `<base><project>/Client/#` and `<base><project>/Client/<name>`
//! - `<base><project>/Status/#` and `<base><project>/Status/<gatewayId>`
//! - `<base><project>/Data/#` and `<base><project>/Data/<gatewayId>/<deviceId>`
//!
//! Builders return `None` when a required argument is empty.
//! `parse` never fails loudly: malformed topics give `None`.

use std::fmt;

pub const BASE_TOPIC: &str = "PRECISE/OpenICElite/";

const WILDCARD: &str = "#";

// ========================================
// CATEGORY
// ========================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    Online,
    Client,
    Status,
    Data,
}

impl TopicCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicCategory::Online => "Online",
            TopicCategory::Client => "Client",
            TopicCategory::Status => "Status",
            TopicCategory::Data => "Data",
        }
    }

    // Only addressable categories can appear in a parsed topic
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "Data" => Some(TopicCategory::Data),
            "Status" => Some(TopicCategory::Status),
            "Client" => Some(TopicCategory::Client),
            _ => None,
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// ADDRESS
// ========================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicAddress {
    pub category: TopicCategory,
    pub project: String,
    pub gateway_id: String,
    /// Present only for Data topics
    pub device_id: Option<String>,
}

// ========================================
// BUILDERS
// ========================================

fn build(project: &str, category: TopicCategory, rest: &[&str]) -> Option<String> {
    if project.is_empty() || rest.iter().any(|part| part.is_empty()) {
        return None;
    }

    let mut topic = format!("{}{}/{}", BASE_TOPIC, project, category);
    for part in rest {
        topic.push('/');
        topic.push_str(part);
    }
    Some(topic)
}

pub fn online_topic(project: &str) -> Option<String> {
    build(project, TopicCategory::Online, &[])
}

pub fn client_base_topic(project: &str) -> Option<String> {
    build(project, TopicCategory::Client, &[WILDCARD])
}

pub fn client_topic(project: &str, name: &str) -> Option<String> {
    build(project, TopicCategory::Client, &[name])
}

pub fn status_base_topic(project: &str) -> Option<String> {
    build(project, TopicCategory::Status, &[WILDCARD])
}

pub fn status_topic(project: &str, gateway_id: &str) -> Option<String> {
    build(project, TopicCategory::Status, &[gateway_id])
}

pub fn data_base_topic(project: &str) -> Option<String> {
    build(project, TopicCategory::Data, &[WILDCARD])
}

pub fn data_topic(project: &str, gateway_id: &str, device_id: &str) -> Option<String> {
    build(project, TopicCategory::Data, &[gateway_id, device_id])
}

/// Strips the trailing wildcard of a base topic, leaving the prefix every concrete topic shares.
/// `PRECISE/OpenICElite/P/Status/#` -> `PRECISE/OpenICElite/P/Status/`
pub fn base_prefix(base_topic: &str) -> &str {
    base_topic.strip_suffix(WILDCARD).unwrap_or(base_topic)
}

// ========================================
// PARSER
// ========================================

/// Decomposes a concrete topic into its address.
/// Segment layout after the base: [project, category, gatewayId, deviceId?]
pub fn parse(topic: &str) -> Option<TopicAddress> {
    if topic.is_empty() {
        return None;
    }

    let relative = topic.strip_prefix(BASE_TOPIC).unwrap_or(topic);
    let segments: Vec<&str> = relative.split('/').collect();
    if segments.len() < 4 {
        return None;
    }

    let category = TopicCategory::from_segment(segments[1])?;
    let project = segments[0];
    let gateway_id = segments[2];
    if project.is_empty() || gateway_id.is_empty() {
        return None;
    }

    let device_id = match category {
        TopicCategory::Data => {
            let device = segments[3];
            if device.is_empty() {
                return None;
            }
            Some(device.to_string())
        }
        _ => None,
    };

    Some(TopicAddress {
        category,
        project: project.to_string(),
        gateway_id: gateway_id.to_string(),
        device_id,
    })
}
