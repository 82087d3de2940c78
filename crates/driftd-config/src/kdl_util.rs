//! Small helpers over the `kdl` crate's node/entry accessors, shared by
//! [`crate::system`] and [`crate::repos`].

use kdl::KdlNode;

use crate::{ConfigError, ConfigResult};

pub fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?.nodes().iter().find(|n| n.name().value() == name)
}

pub fn first_arg_str(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

pub fn first_arg_bool(node: &KdlNode) -> Option<bool> {
    node.entries().iter().find(|e| e.name().is_none()).and_then(|e| e.value().as_bool())
}

pub fn args_str(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(str::to_string)
        .collect()
}

pub fn prop_str(node: &KdlNode, name: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(name))
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

pub fn required_str(node: &KdlNode, field: &str) -> ConfigResult<String> {
    first_arg_str(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

pub fn required_int(node: &KdlNode, field: &str) -> ConfigResult<i64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .map(|i| i as i64)
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))
}
