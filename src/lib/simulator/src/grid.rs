//! 3D structured grids of elements, decomposed per formation, with local
//! index ranges (spec.md §3 "MeshGrids"/"Element"/"Subdomain").
//!
//! A worker owns a contiguous `(I, J)` tile of the map decomposition; each
//! formation's elements over that tile live on that worker (spec.md §5).
//! This crate models that single worker's local tile; `global_i`/`global_j`
//! carry the offset into the full domain for bookkeeping and for face
//! lookups that would, in a distributed build, cross a worker boundary.

use serde::{Deserialize, Serialize};

/// The six faces of a hexahedral element (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Face {
    Shallow,
    Deep,
    Front,
    Back,
    Left,
    Right,
}

pub const ALL_FACES: [Face; 6] = [
    Face::Shallow,
    Face::Deep,
    Face::Front,
    Face::Back,
    Face::Left,
    Face::Right,
];

/// Local (i, j, k) index triple within a formation's element grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementIndex {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl ElementIndex {
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        ElementIndex { i, j, k }
    }
}

/// A single hexahedral element: local (i,j,k), global (I,J,K), its
/// lithology column reference, and the scalars that make it "active"
/// or degenerate (spec.md §3 "Element").
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Element {
    pub local: ElementIndex,
    pub global_i: usize,
    pub global_j: usize,
    pub global_k: usize,
    /// Index into the formation's lithology table; `None` when this
    /// element's column has no defined lithology.
    pub lithology_id: Option<usize>,
    /// Element volume, m³. Non-positive/non-finite means degenerate.
    pub volume_m3: f64,
    /// Depth of the top and bottom face centres, m (used to detect
    /// collapsed hexahedra, spec.md §7).
    pub z_top: f64,
    pub z_bottom: f64,
}

/// Degenerate-element threshold (spec.md §7): a collapsed hexahedron has
/// `|z_top - z_bottom| < 1e-3`.
pub const DEGENERATE_THICKNESS_M: f64 = 1e-3;

impl Element {
    /// An element is active when its lithology column is defined and its
    /// geometry is non-degenerate (spec.md §3).
    pub fn is_active(&self) -> bool {
        self.lithology_id.is_some()
            && self.volume_m3.is_finite()
            && self.volume_m3 > 0.0
            && !self.is_degenerate()
    }

    pub fn is_degenerate(&self) -> bool {
        (self.z_top - self.z_bottom).abs() < DEGENERATE_THICKNESS_M
    }

    pub fn thickness_m(&self) -> f64 {
        (self.z_top - self.z_bottom).abs()
    }
}

/// A formation: an ordered (top-to-bottom) slab of the subdomain with its
/// own 3D element grid over the shared `(I, J)` map decomposition and a
/// local vertical range (spec.md §3 "Subdomain").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Formation {
    pub name: String,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Cell size in the horizontal directions, m.
    pub dx: f64,
    pub dy: f64,
    pub elements: Vec<Element>,
    /// True once all elements on the top surface with
    /// `validElementsOnSurface` policy have been filled from the layer
    /// below them (spec.md §9 "fill from below").
    pub top_filled_from_below: bool,
}

impl Formation {
    pub fn new(name: impl Into<String>, nx: usize, ny: usize, nz: usize, dx: f64, dy: f64) -> Self {
        let n = nx * ny * nz;
        Formation {
            name: name.into(),
            nx,
            ny,
            nz,
            dx,
            dy,
            elements: vec![
                Element {
                    local: ElementIndex::new(0, 0, 0),
                    global_i: 0,
                    global_j: 0,
                    global_k: 0,
                    lithology_id: None,
                    volume_m3: 0.0,
                    z_top: 0.0,
                    z_bottom: 0.0,
                };
                n
            ],
            top_filled_from_below: false,
        }
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.nx * self.ny) + (j * self.nx) + i
    }

    #[inline]
    pub fn element(&self, i: usize, j: usize, k: usize) -> &Element {
        &self.elements[self.index(i, j, k)]
    }

    #[inline]
    pub fn element_mut(&mut self, i: usize, j: usize, k: usize) -> &mut Element {
        let idx = self.index(i, j, k);
        &mut self.elements[idx]
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Applies the "fill from below" degenerate-top policy: any element
    /// at k=0 whose geometry is degenerate copies the lithology id and
    /// thickness bounds of the first valid layer beneath it, rather than
    /// being interpolated some other way (spec.md §9, explicitly
    /// resolved open question — do not substitute a different scheme).
    pub fn fill_degenerate_top_from_below(&mut self) {
        if self.nz < 2 {
            return;
        }
        for j in 0..self.ny {
            for i in 0..self.nx {
                if !self.element(i, j, 0).is_degenerate() {
                    continue;
                }
                let mut donor_k = None;
                for k in 1..self.nz {
                    if !self.element(i, j, k).is_degenerate() {
                        donor_k = Some(k);
                        break;
                    }
                }
                if let Some(k) = donor_k {
                    let donor = *self.element(i, j, k);
                    let top = self.element_mut(i, j, 0);
                    top.lithology_id = donor.lithology_id;
                    top.z_top = donor.z_top;
                    top.z_bottom = donor.z_bottom;
                    top.volume_m3 = donor.volume_m3;
                }
            }
        }
        self.top_filled_from_below = true;
    }

    /// The up-to-six active neighbours of an element, `None` at domain
    /// boundaries or where the neighbour is inactive (spec.md §3).
    pub fn neighbours(&self, i: usize, j: usize, k: usize) -> [Option<ElementIndex>; 6] {
        let mut out = [None; 6];
        let candidates: [Option<(usize, usize, usize)>; 6] = [
            if k > 0 { Some((i, j, k - 1)) } else { None },
            if k + 1 < self.nz {
                Some((i, j, k + 1))
            } else {
                None
            },
            if j > 0 { Some((i, j - 1, k)) } else { None },
            if j + 1 < self.ny {
                Some((i, j + 1, k))
            } else {
                None
            },
            if i > 0 { Some((i - 1, j, k)) } else { None },
            if i + 1 < self.nx {
                Some((i + 1, j, k))
            } else {
                None
            },
        ];
        for (idx, candidate) in candidates.into_iter().enumerate() {
            if let Some((ci, cj, ck)) = candidate {
                if self.element(ci, cj, ck).is_active() {
                    out[idx] = Some(ElementIndex::new(ci, cj, ck));
                }
            }
        }
        out
    }
}

/// Ordered sequence of active formations from top to bottom
/// (spec.md §3 "Subdomain").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subdomain {
    pub formations: Vec<Formation>,
}

impl Subdomain {
    pub fn new(formations: Vec<Formation>) -> Self {
        Subdomain { formations }
    }

    pub fn total_elements(&self) -> usize {
        self.formations.iter().map(Formation::num_elements).sum()
    }

    /// Visits formations in deposition order (top to bottom) at the
    /// current snapshot (spec.md §3 "active layer iterator").
    pub fn active_layers(&self) -> impl Iterator<Item = &Formation> {
        self.formations.iter()
    }

    pub fn active_layers_mut(&mut self) -> impl Iterator<Item = &mut Formation> {
        self.formations.iter_mut()
    }

    /// Walks reverse-active layers from bottom to top, used by the
    /// vertical dof numbering for nodal saturation scatter
    /// (spec.md §4.9).
    pub fn reverse_active_layers(&self) -> impl Iterator<Item = &Formation> {
        self.formations.iter().rev()
    }

    pub fn source_rock_is_active(&self) -> bool {
        !self.formations.is_empty()
    }
}
