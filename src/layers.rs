// SPDX-License-Identifier: MIT
//! Content-addressed data layers
//!
//! Each layer is a JSON value identified by id and hashed with SHA-256 over
//! its canonical (key-sorted) JSON encoding. Adding a layer whose content is
//! already present records the new id as an alias of the existing layer, so
//! identical payloads are stored once.
//!
//! Key paths use dots for nested objects (`user.name`); keys that themselves
//! contain dots are not addressable by path.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{ContainerError, Result};

/// Default similarity threshold for grouping
pub const DEFAULT_SIMILARITY: f64 = 0.7;

const KEY_WEIGHT: f64 = 0.4;
const CONTENT_WEIGHT: f64 = 0.6;

/// SHA-256 of the canonical JSON encoding, hex encoded
pub fn content_hash(data: &Value) -> String {
    // serde_json's default map is ordered, so this encoding is key-sorted
    let mut hasher = Sha256::new();
    hasher.update(data.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A single JSON data layer
#[derive(Debug, Clone, PartialEq)]
pub struct DataLayer {
    id: String,
    data: Value,
    content_hash: String,
    size_bytes: usize,
}

impl DataLayer {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        let content_hash = content_hash(&data);
        let size_bytes = data.to_string().len();
        Self {
            id: id.into(),
            data,
            content_hash,
            size_bytes,
        }
    }

    /// Layer whose id is derived from its content
    pub fn from_content(data: Value) -> Self {
        let hash = content_hash(&data);
        Self::new(&hash[..16], data)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// All key paths, recursing into objects and into containers inside arrays
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        collect_keys(&self.data, "", &mut keys);
        keys
    }

    /// Look up a dotted key path
    pub fn get_value(&self, key_path: &str) -> Option<&Value> {
        key_path
            .split('.')
            .try_fold(&self.data, |value, key| value.as_object()?.get(key))
    }

    /// Similarity in `[0, 1]`: weighted key Jaccard index and shared-value matches
    pub fn similarity(&self, other: &DataLayer) -> f64 {
        let keys = self.keys();
        let other_keys = other.keys();

        let union = keys.union(&other_keys).count();
        if union == 0 {
            return 0.0;
        }
        let shared: Vec<&String> = keys.intersection(&other_keys).collect();
        let key_similarity = shared.len() as f64 / union as f64;
        if shared.is_empty() {
            return key_similarity;
        }

        let matches = shared
            .iter()
            .filter(|key| self.get_value(key) == other.get_value(key))
            .count();
        let content_similarity = matches as f64 / shared.len() as f64;

        KEY_WEIGHT * key_similarity + CONTENT_WEIGHT * content_similarity
    }
}

fn collect_keys(value: &Value, prefix: &str, keys: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                if child.is_object() || child.is_array() {
                    collect_keys(child, &path, keys);
                }
                keys.insert(path);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                if item.is_object() || item.is_array() {
                    collect_keys(item, &format!("{}[{}]", prefix, idx), keys);
                }
            }
        }
        _ => {}
    }
}

/// Structural difference between two JSON values, keyed by dotted path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerDiff {
    pub modified: BTreeMap<String, Value>,
    pub added: BTreeMap<String, Value>,
    pub removed: BTreeMap<String, Value>,
}

impl LayerDiff {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Size of the compact JSON encoding
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

/// Compute the diff that turns `base` into `target`
///
/// Arrays and scalars are compared as a whole. A root-level change is
/// recorded under the empty path.
pub fn diff_values(base: &Value, target: &Value) -> LayerDiff {
    let mut diff = LayerDiff::default();
    diff_into(base, target, "", &mut diff);
    diff
}

fn diff_into(base: &Value, target: &Value, path: &str, diff: &mut LayerDiff) {
    match (base, target) {
        (Value::Object(base_map), Value::Object(target_map)) => {
            for (key, target_value) in target_map {
                let child_path = join_path(path, key);
                match base_map.get(key) {
                    None => {
                        diff.added.insert(child_path, target_value.clone());
                    }
                    Some(base_value) if base_value != target_value => {
                        diff_into(base_value, target_value, &child_path, diff);
                    }
                    Some(_) => {}
                }
            }
            for (key, base_value) in base_map {
                if !target_map.contains_key(key) {
                    diff.removed.insert(join_path(path, key), base_value.clone());
                }
            }
        }
        _ if base != target => {
            diff.modified.insert(path.to_string(), target.clone());
        }
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Apply a diff to a copy of `base`
pub fn apply_diff(base: &Value, diff: &LayerDiff) -> Value {
    let mut result = base.clone();
    for (path, value) in diff.modified.iter().chain(diff.added.iter()) {
        set_path(&mut result, path, value.clone());
    }
    for path in diff.removed.keys() {
        delete_path(&mut result, path);
    }
    result
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        *root = value;
        return;
    }

    let mut keys: Vec<&str> = path.split('.').collect();
    let last = keys.pop().unwrap_or_default();
    let mut current = root;
    for key in keys {
        current = ensure_object(current)
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert(last.to_string(), value);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn delete_path(root: &mut Value, path: &str) {
    let mut keys: Vec<&str> = path.split('.').collect();
    let Some(last) = keys.pop() else {
        return;
    };
    let mut current = root;
    for key in keys {
        match current.get_mut(key) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(last);
    }
}

/// On-disk representation of one layer id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLayer {
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
}

/// Layers section payload: a JSON object whose keys keep insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredLayers(pub Vec<(String, StoredLayer)>);

impl StoredLayers {
    pub fn get(&self, id: &str) -> Option<&StoredLayer> {
        self.0.iter().find(|(key, _)| key == id).map(|(_, layer)| layer)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(|(id, _)| id.as_str())
    }
}

impl Serialize for StoredLayers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, layer) in &self.0 {
            map.serialize_entry(id, layer)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StoredLayers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StoredLayersVisitor;

        impl<'de> Visitor<'de> for StoredLayersVisitor {
            type Value = StoredLayers;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of data layer id to stored layer")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                let mut seen = HashSet::new();
                while let Some((id, layer)) = map.next_entry::<String, StoredLayer>()? {
                    if !seen.insert(id.clone()) {
                        return Err(de::Error::custom(format!("duplicate data layer id {}", id)));
                    }
                    entries.push((id, layer));
                }
                Ok(StoredLayers(entries))
            }
        }

        deserializer.deserialize_map(StoredLayersVisitor)
    }
}

/// Savings estimate from differential storage of similar layers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationStats {
    pub original_size: usize,
    pub optimized_size: usize,
    pub reduction_bytes: i64,
    pub reduction_percent: f64,
    pub total_layers: usize,
    pub groups: usize,
    pub differential_groups: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerStats {
    /// Every registered id, aliases included
    pub total_layers: usize,
    pub unique_content: usize,
    pub duplicate_count: usize,
    /// Stored bytes of unique content
    pub total_size: usize,
    pub average_size: f64,
    pub deduplication_percent: f64,
}

/// Collection of layers with content deduplication
#[derive(Debug, Clone)]
pub struct DataLayerManager {
    deduplicate: bool,
    layers: HashMap<String, DataLayer>,
    aliases: HashMap<String, String>,
    by_hash: HashMap<String, String>,
    order: Vec<String>,
}

impl Default for DataLayerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLayerManager {
    pub fn new() -> Self {
        Self::with_deduplication(true)
    }

    pub fn with_deduplication(deduplicate: bool) -> Self {
        Self {
            deduplicate,
            layers: HashMap::new(),
            aliases: HashMap::new(),
            by_hash: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Register `data` under `id` and return the id that stores the content
    ///
    /// Re-adding an id with identical content is a no-op; reusing an id for
    /// different content is a validation error.
    pub fn add_layer(&mut self, id: impl Into<String>, data: Value) -> Result<String> {
        self.add(DataLayer::new(id, data))
    }

    /// Register a layer under its content-derived id
    pub fn add_content(&mut self, data: Value) -> Result<String> {
        self.add(DataLayer::from_content(data))
    }

    fn add(&mut self, layer: DataLayer) -> Result<String> {
        if layer.id.is_empty() {
            return Err(ContainerError::validation("Data layer id must not be empty"));
        }

        if let Some(existing) = self.get(&layer.id) {
            if existing.content_hash == layer.content_hash {
                return Ok(existing.id.clone());
            }
            return Err(ContainerError::validation(format!(
                "Data layer id {} already holds different content",
                layer.id
            )));
        }

        if self.deduplicate {
            if let Some(canonical) = self.by_hash.get(&layer.content_hash).cloned() {
                tracing::debug!("Data layer {} deduplicated onto {}", layer.id, canonical);
                self.order.push(layer.id.clone());
                self.aliases.insert(layer.id, canonical.clone());
                return Ok(canonical);
            }
        }

        let id = layer.id.clone();
        self.by_hash
            .entry(layer.content_hash.clone())
            .or_insert_with(|| id.clone());
        self.order.push(id.clone());
        self.layers.insert(id.clone(), layer);
        Ok(id)
    }

    /// Resolve an id (alias or canonical) to its layer
    pub fn get(&self, id: &str) -> Option<&DataLayer> {
        let canonical = self.aliases.get(id).map(String::as_str).unwrap_or(id);
        self.layers.get(canonical)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Canonical id for `id`, if registered
    pub fn canonical_id(&self, id: &str) -> Option<&str> {
        self.get(id).map(DataLayer::id)
    }

    /// Every registered id, in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    /// Layers holding unique content, in insertion order
    pub fn layers(&self) -> impl Iterator<Item = &DataLayer> + '_ {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    /// Remove an id; removing a canonical layer promotes its first alias
    pub fn remove(&mut self, id: &str) -> bool {
        if self.aliases.remove(id).is_some() {
            self.order.retain(|other| other != id);
            return true;
        }

        let Some(mut layer) = self.layers.remove(id) else {
            return false;
        };
        self.order.retain(|other| other != id);

        let successor = self
            .order
            .iter()
            .find(|other| self.aliases.get(*other).map(String::as_str) == Some(id))
            .cloned();

        match successor {
            Some(successor) => {
                self.aliases.remove(&successor);
                for canonical in self.aliases.values_mut() {
                    if *canonical == id {
                        *canonical = successor.clone();
                    }
                }
                self.by_hash
                    .insert(layer.content_hash.clone(), successor.clone());
                layer.id = successor.clone();
                self.layers.insert(successor, layer);
            }
            None => {
                self.by_hash.remove(&layer.content_hash);
            }
        }
        true
    }

    /// Layers at least `min_similarity` similar to `id`, most similar first
    pub fn find_similar(&self, id: &str, min_similarity: f64) -> Vec<(String, f64)> {
        let Some(reference) = self.get(id) else {
            return Vec::new();
        };

        let mut similar: Vec<(String, f64)> = self
            .layers()
            .filter(|other| other.id != reference.id)
            .map(|other| (other.id.clone(), reference.similarity(other)))
            .filter(|(_, score)| *score >= min_similarity)
            .collect();
        similar.sort_by(|a, b| b.1.total_cmp(&a.1));
        similar
    }

    /// Greedy grouping; the first member of each group is its base
    pub fn group_similar(&self, min_similarity: f64) -> Vec<Vec<String>> {
        let mut processed = BTreeSet::new();
        let mut groups = Vec::new();

        for layer in self.layers() {
            if processed.contains(&layer.id) {
                continue;
            }
            processed.insert(layer.id.clone());

            let mut group = vec![layer.id.clone()];
            for (similar_id, _) in self.find_similar(&layer.id, min_similarity) {
                if processed.insert(similar_id.clone()) {
                    group.push(similar_id);
                }
            }
            groups.push(group);
        }

        groups
    }

    /// Diff between two registered layers
    pub fn compute_diff(&self, base_id: &str, target_id: &str) -> Option<LayerDiff> {
        let base = self.get(base_id)?;
        let target = self.get(target_id)?;
        Some(diff_values(&base.data, &target.data))
    }

    /// Rebuild a value by applying `diff` to a registered layer
    pub fn apply_diff(&self, base_id: &str, diff: &LayerDiff) -> Option<Value> {
        self.get(base_id).map(|base| apply_diff(&base.data, diff))
    }

    /// Estimate storage if similar layers were kept as base + diffs
    pub fn optimize(&self) -> OptimizationStats {
        let original_size: usize = self.layers().map(DataLayer::size_bytes).sum();
        let groups = self.group_similar(DEFAULT_SIMILARITY);

        let mut optimized_size = 0;
        let mut differential_groups = 0;
        for group in &groups {
            let Some((base_id, targets)) = group.split_first() else {
                continue;
            };
            optimized_size += self.get(base_id).map(DataLayer::size_bytes).unwrap_or(0);
            if !targets.is_empty() {
                differential_groups += 1;
            }
            for target_id in targets {
                optimized_size += self
                    .compute_diff(base_id, target_id)
                    .map(|diff| diff.encoded_size())
                    .unwrap_or(0);
            }
        }

        let reduction_bytes = original_size as i64 - optimized_size as i64;
        OptimizationStats {
            original_size,
            optimized_size,
            reduction_bytes,
            reduction_percent: if original_size > 0 {
                reduction_bytes as f64 / original_size as f64 * 100.0
            } else {
                0.0
            },
            total_layers: self.layers.len(),
            groups: groups.len(),
            differential_groups,
        }
    }

    pub fn statistics(&self) -> LayerStats {
        if self.is_empty() {
            return LayerStats::default();
        }

        let unique_content = self.layers.len();
        let total_size: usize = self.layers().map(DataLayer::size_bytes).sum();
        let duplicate_count = self.len() - unique_content;
        LayerStats {
            total_layers: self.len(),
            unique_content,
            duplicate_count,
            total_size,
            average_size: total_size as f64 / unique_content.max(1) as f64,
            deduplication_percent: duplicate_count as f64 / self.len() as f64 * 100.0,
        }
    }

    /// Section representation in insertion order: each id maps to its data or to an alias
    pub fn to_stored(&self) -> StoredLayers {
        let entries = self
            .ids()
            .filter_map(|id| {
                let layer = self.get(id)?;
                let stored = if layer.id == id {
                    StoredLayer {
                        content_hash: layer.content_hash.clone(),
                        data: Some(layer.data.clone()),
                        alias_of: None,
                    }
                } else {
                    StoredLayer {
                        content_hash: layer.content_hash.clone(),
                        data: None,
                        alias_of: Some(layer.id.clone()),
                    }
                };
                Some((id.to_string(), stored))
            })
            .collect();
        StoredLayers(entries)
    }

    /// Rebuild from a decoded section, verifying hashes and alias targets
    ///
    /// Ids keep the section's order; an alias may precede its target.
    pub fn from_stored(stored: StoredLayers) -> Result<Self> {
        let mut manager = Self::new();
        let mut aliases = Vec::new();
        let mut seen = HashSet::new();

        for (id, entry) in stored.0 {
            if !seen.insert(id.clone()) {
                return Err(ContainerError::format(format!("Duplicate data layer id {}", id)));
            }
            manager.order.push(id.clone());
            match (entry.data, entry.alias_of) {
                (Some(data), None) => {
                    let layer = DataLayer::new(id.clone(), data);
                    if layer.content_hash != entry.content_hash {
                        return Err(ContainerError::format(format!(
                            "Data layer {} content hash mismatch",
                            id
                        )));
                    }
                    manager.by_hash.entry(layer.content_hash.clone()).or_insert(id.clone());
                    manager.layers.insert(id, layer);
                }
                (None, Some(target)) => aliases.push((id, target, entry.content_hash)),
                _ => {
                    return Err(ContainerError::format(format!(
                        "Data layer {} must hold either data or an alias",
                        id
                    )))
                }
            }
        }

        for (id, target, hash) in aliases {
            match manager.layers.get(&target) {
                Some(layer) if layer.content_hash == hash => {
                    manager.aliases.insert(id, target);
                }
                Some(_) => {
                    return Err(ContainerError::format(format!(
                        "Data layer alias {} does not match {}",
                        id, target
                    )))
                }
                None => {
                    return Err(ContainerError::format(format!(
                        "Data layer alias {} points to unknown layer {}",
                        id, target
                    )))
                }
            }
        }

        Ok(manager)
    }
}
