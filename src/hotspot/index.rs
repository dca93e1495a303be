// SPDX-License-Identifier: MIT
//! Uniform-grid spatial index over hotspots
//!
//! Every hotspot id is recorded in each grid cell its bounding box touches,
//! so a point query only inspects the ids of a single cell. Hotspots whose
//! bounding box covers more than [`MAX_CELLS_PER_HOTSPOT`] cells are kept in
//! a separate list that every query scans instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use super::{BoundingBox, Hotspot, Shape};
use crate::error::{ContainerError, Result};

/// Default grid cell edge length in pixels
pub const DEFAULT_CELL_SIZE: f64 = 50.0;

/// Area below which a hotspot is reported as very small
const SMALL_AREA: f64 = 100.0;

/// Most grid cells a single hotspot is recorded in
pub const MAX_CELLS_PER_HOTSPOT: u128 = 1024;

type CellKey = (i64, i64);

/// Sort order for [`SpatialIndex::optimize_layout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOrder {
    /// Highest priority first
    Priority,
    /// Largest area first
    Size,
    /// Top-left to bottom-right
    Position,
}

/// Summary numbers for a hotspot collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HotspotStats {
    pub total_hotspots: usize,
    pub total_area: f64,
    pub average_area: f64,
    pub coverage_percent: f64,
    pub shapes: BTreeMap<&'static str, usize>,
    pub lazy_load_count: usize,
    pub overlapping_count: usize,
}

/// Grid-backed hotspot collection
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<String>>,
    /// Hotspots too large for the grid, in insertion order
    oversized: Vec<String>,
    hotspots: HashMap<String, Hotspot>,
    /// Insertion sequence number per id; breaks ties between grid and oversized hits
    ranks: HashMap<String, u64>,
    next_rank: u64,
    order: Vec<String>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::with_cell_size(DEFAULT_CELL_SIZE)
    }

    /// Non-positive or non-finite sizes fall back to the default
    pub fn with_cell_size(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            cells: HashMap::new(),
            oversized: Vec::new(),
            hotspots: HashMap::new(),
            ranks: HashMap::new(),
            next_rank: 0,
            order: Vec::new(),
        }
    }

    /// Build an index from decoded hotspots, keeping their ids
    pub fn from_hotspots<I>(hotspots: I) -> Result<Self>
    where
        I: IntoIterator<Item = Hotspot>,
    {
        let mut index = Self::new();
        for hotspot in hotspots {
            index.insert(hotspot)?;
        }
        Ok(index)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Create a hotspot with a generated id and default flags
    pub fn add(&mut self, shape: Shape, data: Value) -> Result<String> {
        let hotspot = Hotspot::new(shape, data).layer(self.len() as u32);
        let id = hotspot.id.clone();
        self.insert(hotspot)?;
        Ok(id)
    }

    /// Insert a fully specified hotspot; its id must be unused
    pub fn insert(&mut self, hotspot: Hotspot) -> Result<()> {
        hotspot.validate()?;
        if self.hotspots.contains_key(&hotspot.id) {
            return Err(ContainerError::validation(format!(
                "Duplicate hotspot id: {}",
                hotspot.id
            )));
        }

        let bbox = hotspot.bounding_box();
        if self.span_len(&bbox) > MAX_CELLS_PER_HOTSPOT {
            tracing::debug!("Hotspot {} spans too many cells, kept outside the grid", hotspot.id);
            self.oversized.push(hotspot.id.clone());
        } else {
            for key in self.cells_for(&bbox) {
                self.cells.entry(key).or_default().push(hotspot.id.clone());
            }
        }
        self.ranks.insert(hotspot.id.clone(), self.next_rank);
        self.next_rank += 1;
        self.order.push(hotspot.id.clone());
        self.hotspots.insert(hotspot.id.clone(), hotspot);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Hotspot> {
        self.hotspots.get(id)
    }

    /// Remove a hotspot from the id map and every grid cell
    pub fn remove(&mut self, id: &str) -> Option<Hotspot> {
        let hotspot = self.hotspots.remove(id)?;
        if let Some(position) = self.oversized.iter().position(|other| other == id) {
            self.oversized.remove(position);
        } else {
            for key in self.cells_for(&hotspot.bounding_box()) {
                if let Some(ids) = self.cells.get_mut(&key) {
                    ids.retain(|other| other != id);
                    if ids.is_empty() {
                        self.cells.remove(&key);
                    }
                }
            }
        }
        self.ranks.remove(id);
        self.order.retain(|other| other != id);
        Some(hotspot)
    }

    /// Hotspots in layer order
    pub fn hotspots(&self) -> impl Iterator<Item = &Hotspot> + '_ {
        self.order.iter().filter_map(|id| self.hotspots.get(id))
    }

    pub fn into_hotspots(mut self) -> Vec<Hotspot> {
        self.order
            .iter()
            .filter_map(|id| self.hotspots.remove(id))
            .collect()
    }

    /// First hotspot (insertion order) that contains the point
    pub fn point_query(&self, x: f64, y: f64) -> Option<&Hotspot> {
        self.cell_candidates(x, y)
            .filter(|h| h.contains_point(x, y))
            .min_by_key(|h| self.rank(&h.id))
    }

    /// Every hotspot containing the point, highest priority first
    pub fn point_query_all(&self, x: f64, y: f64) -> Vec<&Hotspot> {
        let mut matches: Vec<&Hotspot> = self
            .cell_candidates(x, y)
            .filter(|h| h.contains_point(x, y))
            .collect();
        matches.sort_by_key(|h| (std::cmp::Reverse(h.priority), self.rank(&h.id)));
        matches
    }

    /// Hotspots whose bounding box intersects the region, in layer order
    pub fn region_query(&self, region: &BoundingBox) -> Vec<&Hotspot> {
        // Regions spanning more cells than are occupied: a linear scan is cheaper
        if self.span_len(region) > self.cells.len() as u128 {
            return self
                .hotspots()
                .filter(|h| h.bounding_box().intersects(region))
                .collect();
        }

        let candidates: HashSet<&str> = self
            .cells_for(region)
            .iter()
            .filter_map(|key| self.cells.get(key))
            .flatten()
            .chain(&self.oversized)
            .map(String::as_str)
            .collect();
        self.hotspots()
            .filter(|h| candidates.contains(h.id.as_str()) && h.bounding_box().intersects(region))
            .collect()
    }

    /// Hotspots overlapping the one with `id`
    pub fn overlapping(&self, id: &str) -> Vec<&Hotspot> {
        let Some(target) = self.hotspots.get(id) else {
            return Vec::new();
        };
        self.hotspots()
            .filter(|other| other.id != target.id && target.overlaps(other))
            .collect()
    }

    /// Reorder hotspots and rewrite their layer indices
    pub fn optimize_layout(&mut self, order: LayoutOrder) {
        let hotspots = &self.hotspots;
        match order {
            LayoutOrder::Priority => self
                .order
                .sort_by(|a, b| hotspots[b].priority.cmp(&hotspots[a].priority)),
            LayoutOrder::Size => self.order.sort_by(|a, b| {
                hotspots[b]
                    .shape
                    .area()
                    .total_cmp(&hotspots[a].shape.area())
            }),
            LayoutOrder::Position => self.order.sort_by(|a, b| {
                let (ba, bb) = (hotspots[a].bounding_box(), hotspots[b].bounding_box());
                ba.min_y
                    .total_cmp(&bb.min_y)
                    .then(ba.min_x.total_cmp(&bb.min_x))
            }),
        }

        for (layer_index, id) in self.order.iter().enumerate() {
            if let Some(hotspot) = self.hotspots.get_mut(id) {
                hotspot.layer_index = layer_index as u32;
            }
        }
        tracing::debug!("Reordered {} hotspots by {:?}", self.order.len(), order);
    }

    /// Soft checks against the image size; returns human-readable warnings
    pub fn validate_against(&self, image_width: u32, image_height: u32) -> Vec<String> {
        let (width, height) = (image_width as f64, image_height as f64);
        let mut warnings = Vec::new();

        for (position, hotspot) in self.hotspots().enumerate() {
            let label = format!(
                "Hotspot {} ({})",
                position + 1,
                hotspot.id.chars().take(8).collect::<String>()
            );

            let bbox = hotspot.bounding_box();
            if bbox.min_x < 0.0 || bbox.min_y < 0.0 || bbox.max_x > width || bbox.max_y > height {
                warnings.push(format!("{} extends outside image bounds", label));
            }

            let area = hotspot.shape.area();
            if area < SMALL_AREA {
                warnings.push(format!("{} is very small ({:.0}px²)", label, area));
            }

            let overlaps = self.overlapping(&hotspot.id).len();
            if overlaps > 0 {
                warnings.push(format!(
                    "{} overlaps with {} other hotspot(s)",
                    label, overlaps
                ));
            }
        }

        warnings
    }

    /// Aggregate statistics; coverage is relative to the given image size
    pub fn statistics(&self, image_width: u32, image_height: u32) -> HotspotStats {
        if self.is_empty() {
            return HotspotStats::default();
        }

        let total_area: f64 = self.hotspots().map(|h| h.shape.area()).sum();
        let image_area = image_width as f64 * image_height as f64;
        let mut shapes = BTreeMap::new();
        for hotspot in self.hotspots() {
            *shapes.entry(hotspot.shape.kind()).or_insert(0) += 1;
        }

        HotspotStats {
            total_hotspots: self.len(),
            total_area,
            average_area: total_area / self.len() as f64,
            coverage_percent: if image_area > 0.0 {
                total_area * 100.0 / image_area
            } else {
                0.0
            },
            shapes,
            lazy_load_count: self.hotspots().filter(|h| h.lazy_load).count(),
            overlapping_count: self
                .hotspots()
                .filter(|h| !self.overlapping(&h.id).is_empty())
                .count(),
        }
    }

    #[inline]
    fn cell_of(&self, x: f64, y: f64) -> CellKey {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    fn cell_span(&self, bbox: &BoundingBox) -> (CellKey, CellKey) {
        (
            self.cell_of(bbox.min_x, bbox.min_y),
            self.cell_of(bbox.max_x, bbox.max_y),
        )
    }

    /// Number of cells the bounding box touches, saturating instead of overflowing
    fn span_len(&self, bbox: &BoundingBox) -> u128 {
        let ((x1, y1), (x2, y2)) = self.cell_span(bbox);
        let columns = x2.saturating_sub(x1).max(0) as u128 + 1;
        let rows = y2.saturating_sub(y1).max(0) as u128 + 1;
        columns.saturating_mul(rows)
    }

    /// Callers bound the span first; see [`Self::span_len`]
    fn cells_for(&self, bbox: &BoundingBox) -> Vec<CellKey> {
        let ((x1, y1), (x2, y2)) = self.cell_span(bbox);
        (x1..=x2)
            .flat_map(|gx| (y1..=y2).map(move |gy| (gx, gy)))
            .collect()
    }

    fn cell_candidates(&self, x: f64, y: f64) -> impl Iterator<Item = &Hotspot> + '_ {
        self.cells
            .get(&self.cell_of(x, y))
            .into_iter()
            .flatten()
            .chain(&self.oversized)
            .filter_map(|id| self.hotspots.get(id))
    }

    fn rank(&self, id: &str) -> u64 {
        self.ranks.get(id).copied().unwrap_or(u64::MAX)
    }
}
