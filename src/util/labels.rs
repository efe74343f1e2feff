//! # Labels
//!
//! Label builders for ActiveGate owned objects.

use std::collections::BTreeMap;

pub const LABEL_DYNATRACE: &str = "dynatrace";
pub const LABEL_ACTIVEGATE: &str = "activegate";

/// Merge label maps, later maps win
pub fn merge_labels(maps: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    maps.iter()
        .flat_map(|m| m.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Match labels of the ActiveGate pods of a DynaKube
pub fn activegate_labels(dynakube_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DYNATRACE.to_string(), LABEL_ACTIVEGATE.to_string()),
        (LABEL_ACTIVEGATE.to_string(), dynakube_name.to_string()),
    ])
}

/// Label selector string for [`activegate_labels`]
pub fn activegate_selector(dynakube_name: &str) -> String {
    activegate_labels(dynakube_name)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Join the alphanumeric runs of `value` with `-`
pub fn sanitize_label(value: &str) -> String {
    value
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
