//! Batched molecular-graph representation.
//!
//! A [`GraphBatch`] packs a set of variable-size molecular graphs into
//! fixed-shape tensors the fingerprint network can consume:
//!
//! - one atom-feature matrix and one bond-feature matrix, shared by the
//!   whole batch;
//! - neighbor index tables bucketed by atom degree, so every gather in
//!   the message-passing step has a rectangular shape;
//! - a sparse substance membership map, materialized as a dense pooling
//!   matrix for the readout step.
//!
//! Each bucket records which original atom sits in each of its rows
//! (`members`). The batch precomputes the inverse permutation that maps
//! per-bucket concatenation order back to original atom order, so layer
//! outputs never depend on bucket traversal order.
//!
//! Batches are scoped to a single forward pass and hold no learnable
//! state. All structural validation happens at construction; the
//! networks can assume a well-formed batch.

use crate::error::{Error, Result};
use candle_core::{Device, Tensor};

/// One degree bucket as provided by the molecule-parsing collaborator.
///
/// Row `i` of the two neighbor tables describes the neighborhood of
/// atom `members[i]`; both tables are `members.len()` rows of exactly
/// `degree` indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegreeTable {
    /// Atom degree this bucket covers.
    pub degree: usize,
    /// Original atom index for each row.
    pub members: Vec<usize>,
    /// Neighbor atom indices, one row per member.
    pub atom_neighbors: Vec<Vec<usize>>,
    /// Incident bond indices, one row per member.
    pub bond_neighbors: Vec<Vec<usize>>,
}

/// A degree bucket with its gather indices uploaded to the device.
#[derive(Debug)]
pub(crate) struct Bucket {
    pub(crate) degree: usize,
    pub(crate) count: usize,
    /// Flattened `[count * degree]` u32 indices into the atom matrix.
    /// Empty for degree 0.
    pub(crate) atom_gather: Option<Tensor>,
    /// Flattened `[count * degree]` u32 indices into the bond matrix.
    pub(crate) bond_gather: Option<Tensor>,
}

/// A batch of molecular graphs in tensor form.
#[derive(Debug)]
pub struct GraphBatch {
    atom_features: Tensor,
    bond_features: Tensor,
    buckets: Vec<Bucket>,
    /// Inverse permutation: original atom order from bucket-concat order.
    scatter: Tensor,
    /// Dense `[n_substances, n_atoms]` membership matrix.
    pooling: Tensor,
    substance_atoms: Vec<Vec<usize>>,
    n_atoms: usize,
    n_bonds: usize,
    n_substances: usize,
    atom_width: usize,
    bond_width: usize,
    max_degree: usize,
}

impl GraphBatch {
    /// Build a batch from pre-bucketed degree tables.
    ///
    /// `bond_width` must be given explicitly because a batch may contain
    /// no bonds at all. The atom feature width is taken from the first
    /// atom row (a batch must contain at least one atom).
    ///
    /// Validates that feature rows are rectangular, each degree appears
    /// in at most one table, table rows match their bucket's degree,
    /// every atom appears in exactly one bucket, and all neighbor and
    /// membership indices are in range.
    pub fn from_tables(
        atom_features: &[Vec<f32>],
        bond_features: &[Vec<f32>],
        bond_width: usize,
        tables: &[DegreeTable],
        substance_atoms: &[Vec<usize>],
        device: &Device,
    ) -> Result<Self> {
        let n_atoms = atom_features.len();
        if n_atoms == 0 {
            return Err(Error::InvalidBatch("batch contains no atoms".into()));
        }
        let atom_width = atom_features[0].len();
        if atom_width == 0 {
            return Err(Error::InvalidBatch("atom feature width is zero".into()));
        }
        for (i, row) in atom_features.iter().enumerate() {
            if row.len() != atom_width {
                return Err(Error::InvalidBatch(format!(
                    "atom {i} has {} features, expected {atom_width}",
                    row.len()
                )));
            }
        }

        let n_bonds = bond_features.len();
        for (i, row) in bond_features.iter().enumerate() {
            if row.len() != bond_width {
                return Err(Error::InvalidBatch(format!(
                    "bond {i} has {} features, expected {bond_width}",
                    row.len()
                )));
            }
        }

        // Exactly-once coverage of atoms by buckets.
        let mut owner = vec![false; n_atoms];
        let mut seen_degrees = Vec::new();
        for table in tables {
            if seen_degrees.contains(&table.degree) {
                return Err(Error::InvalidBatch(format!(
                    "degree {} appears in more than one table",
                    table.degree
                )));
            }
            seen_degrees.push(table.degree);

            if table.atom_neighbors.len() != table.members.len()
                || table.bond_neighbors.len() != table.members.len()
            {
                return Err(Error::InvalidBatch(format!(
                    "degree-{} table rows do not match member count",
                    table.degree
                )));
            }
            for (&atom, (atom_row, bond_row)) in table
                .members
                .iter()
                .zip(table.atom_neighbors.iter().zip(table.bond_neighbors.iter()))
            {
                if atom >= n_atoms {
                    return Err(Error::InvalidBatch(format!(
                        "bucket member {atom} out of range ({n_atoms} atoms)"
                    )));
                }
                if owner[atom] {
                    return Err(Error::InvalidBatch(format!(
                        "atom {atom} appears in more than one bucket"
                    )));
                }
                owner[atom] = true;
                if atom_row.len() != table.degree || bond_row.len() != table.degree {
                    return Err(Error::InvalidBatch(format!(
                        "atom {atom} has a row of width {} in the degree-{} table",
                        atom_row.len().max(bond_row.len()),
                        table.degree
                    )));
                }
                if let Some(&bad) = atom_row.iter().find(|&&n| n >= n_atoms) {
                    return Err(Error::InvalidBatch(format!(
                        "neighbor atom index {bad} out of range ({n_atoms} atoms)"
                    )));
                }
                if let Some(&bad) = bond_row.iter().find(|&&b| b >= n_bonds) {
                    return Err(Error::InvalidBatch(format!(
                        "neighbor bond index {bad} out of range ({n_bonds} bonds)"
                    )));
                }
            }
        }
        if let Some(orphan) = owner.iter().position(|&covered| !covered) {
            return Err(Error::InvalidBatch(format!(
                "atom {orphan} is missing from every degree bucket"
            )));
        }

        for (s, atoms) in substance_atoms.iter().enumerate() {
            if let Some(&bad) = atoms.iter().find(|&&a| a >= n_atoms) {
                return Err(Error::InvalidBatch(format!(
                    "substance {s} references atom {bad} out of range ({n_atoms} atoms)"
                )));
            }
        }

        // Upload feature matrices.
        let atom_data: Vec<f32> = atom_features.iter().flatten().copied().collect();
        let atom_features_t = Tensor::from_vec(atom_data, (n_atoms, atom_width), device)?;
        let bond_data: Vec<f32> = bond_features.iter().flatten().copied().collect();
        let bond_features_t = Tensor::from_vec(bond_data, (n_bonds, bond_width), device)?;

        // Buckets in canonical (ascending-degree) order, empty ones
        // dropped; the scatter permutation below encodes whatever order
        // is left, so the networks never rely on it implicitly.
        let mut sorted: Vec<&DegreeTable> = tables.iter().filter(|t| !t.members.is_empty()).collect();
        sorted.sort_by_key(|t| t.degree);

        let mut buckets = Vec::with_capacity(sorted.len());
        let mut inverse = vec![0u32; n_atoms];
        let mut flat_pos = 0u32;
        let mut max_degree = 0;
        for table in &sorted {
            max_degree = max_degree.max(table.degree);
            for &atom in &table.members {
                inverse[atom] = flat_pos;
                flat_pos += 1;
            }
            let (atom_gather, bond_gather) = if table.degree == 0 {
                (None, None)
            } else {
                let atom_idx: Vec<u32> = table
                    .atom_neighbors
                    .iter()
                    .flatten()
                    .map(|&n| n as u32)
                    .collect();
                let bond_idx: Vec<u32> = table
                    .bond_neighbors
                    .iter()
                    .flatten()
                    .map(|&b| b as u32)
                    .collect();
                (
                    Some(Tensor::from_vec(atom_idx, table.members.len() * table.degree, device)?),
                    Some(Tensor::from_vec(bond_idx, table.members.len() * table.degree, device)?),
                )
            };
            buckets.push(Bucket {
                degree: table.degree,
                count: table.members.len(),
                atom_gather,
                bond_gather,
            });
        }
        let scatter = Tensor::from_vec(inverse, n_atoms, device)?;

        // Dense pooling matrix from the sparse membership lists.
        let n_substances = substance_atoms.len();
        let mut pool = vec![0f32; n_substances * n_atoms];
        for (s, atoms) in substance_atoms.iter().enumerate() {
            for &a in atoms {
                pool[s * n_atoms + a] = 1.0;
            }
        }
        let pooling = Tensor::from_vec(pool, (n_substances, n_atoms), device)?;

        Ok(Self {
            atom_features: atom_features_t,
            bond_features: bond_features_t,
            buckets,
            scatter,
            pooling,
            substance_atoms: substance_atoms.to_vec(),
            n_atoms,
            n_bonds,
            n_substances,
            atom_width,
            bond_width,
            max_degree,
        })
    }

    /// Build a batch from per-atom neighbor lists.
    ///
    /// `neighbors[i]` lists the `(neighbor_atom, bond)` pairs incident
    /// to atom `i`; its length defines the atom's degree. Atoms are
    /// partitioned into degree buckets here, which keeps the
    /// atom-to-(bucket, row) bookkeeping inside the batch.
    pub fn from_adjacency(
        atom_features: &[Vec<f32>],
        bond_features: &[Vec<f32>],
        bond_width: usize,
        neighbors: &[Vec<(usize, usize)>],
        substance_atoms: &[Vec<usize>],
        device: &Device,
    ) -> Result<Self> {
        if neighbors.len() != atom_features.len() {
            return Err(Error::InvalidBatch(format!(
                "{} neighbor lists for {} atoms",
                neighbors.len(),
                atom_features.len()
            )));
        }

        let max_degree = neighbors.iter().map(Vec::len).max().unwrap_or(0);
        let mut tables: Vec<DegreeTable> = (0..=max_degree)
            .map(|degree| DegreeTable {
                degree,
                members: Vec::new(),
                atom_neighbors: Vec::new(),
                bond_neighbors: Vec::new(),
            })
            .collect();
        for (atom, pairs) in neighbors.iter().enumerate() {
            let table = &mut tables[pairs.len()];
            table.members.push(atom);
            table.atom_neighbors.push(pairs.iter().map(|&(a, _)| a).collect());
            table.bond_neighbors.push(pairs.iter().map(|&(_, b)| b).collect());
        }

        Self::from_tables(
            atom_features,
            bond_features,
            bond_width,
            &tables,
            substance_atoms,
            device,
        )
    }

    /// Atom feature matrix, `[n_atoms, atom_width]`.
    pub fn atom_features(&self) -> &Tensor {
        &self.atom_features
    }

    /// Bond feature matrix, `[n_bonds, bond_width]`.
    pub fn bond_features(&self) -> &Tensor {
        &self.bond_features
    }

    /// Dense substance membership matrix, `[n_substances, n_atoms]`.
    pub fn pooling(&self) -> &Tensor {
        &self.pooling
    }

    /// Inverse permutation restoring original atom order after the
    /// per-bucket concatenation.
    pub(crate) fn scatter(&self) -> &Tensor {
        &self.scatter
    }

    pub(crate) fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Per-substance atom index lists (the sparse membership relation).
    pub fn substance_atoms(&self) -> &[Vec<usize>] {
        &self.substance_atoms
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    pub fn n_bonds(&self) -> usize {
        self.n_bonds
    }

    pub fn n_substances(&self) -> usize {
        self.n_substances
    }

    pub fn atom_width(&self) -> usize {
        self.atom_width
    }

    pub fn bond_width(&self) -> usize {
        self.bond_width
    }

    /// Highest atom degree present in the batch.
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    /// Three atoms in a path (0 - 1 - 2), two bonds, one substance.
    fn path_batch() -> GraphBatch {
        let atom_features = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let bond_features = vec![vec![0.5], vec![0.25]];
        let neighbors = vec![
            vec![(1, 0)],
            vec![(0, 0), (2, 1)],
            vec![(1, 1)],
        ];
        GraphBatch::from_adjacency(
            &atom_features,
            &bond_features,
            1,
            &neighbors,
            &[vec![0, 1, 2]],
            &device(),
        )
        .unwrap()
    }

    #[test]
    fn test_adjacency_bucketing() {
        let batch = path_batch();
        assert_eq!(batch.n_atoms(), 3);
        assert_eq!(batch.n_bonds(), 2);
        assert_eq!(batch.max_degree(), 2);
        // Degree-1 bucket holds atoms 0 and 2, degree-2 bucket holds atom 1.
        let degrees: Vec<(usize, usize)> =
            batch.buckets().iter().map(|b| (b.degree, b.count)).collect();
        assert_eq!(degrees, vec![(1, 2), (2, 1)]);
    }

    #[test]
    fn test_scatter_restores_atom_order() {
        let batch = path_batch();
        // Concat order is [atom 0, atom 2, atom 1]; the inverse
        // permutation must map it back to [0, 1, 2].
        let inv = batch.scatter().to_vec1::<u32>().unwrap();
        assert_eq!(inv, vec![0, 2, 1]);
    }

    #[test]
    fn test_pooling_matrix() {
        let atom_features = vec![vec![1.0], vec![2.0], vec![3.0]];
        let batch = GraphBatch::from_adjacency(
            &atom_features,
            &[],
            1,
            &[vec![], vec![], vec![]],
            &[vec![0], vec![1, 2], vec![]],
            &device(),
        )
        .unwrap();
        let pool = batch.pooling().to_vec2::<f32>().unwrap();
        assert_eq!(pool[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(pool[1], vec![0.0, 1.0, 1.0]);
        // A substance with zero atoms pools to an all-zero row.
        assert_eq!(pool[2], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_atom_rejected() {
        let tables = vec![DegreeTable {
            degree: 0,
            members: vec![0],
            atom_neighbors: vec![vec![]],
            bond_neighbors: vec![vec![]],
        }];
        let err = GraphBatch::from_tables(
            &[vec![1.0], vec![2.0]],
            &[],
            1,
            &tables,
            &[vec![0, 1]],
            &device(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
    }

    #[test]
    fn test_double_bucketed_atom_rejected() {
        let tables = vec![
            DegreeTable {
                degree: 0,
                members: vec![0],
                atom_neighbors: vec![vec![]],
                bond_neighbors: vec![vec![]],
            },
            DegreeTable {
                degree: 1,
                members: vec![0],
                atom_neighbors: vec![vec![0]],
                bond_neighbors: vec![vec![0]],
            },
        ];
        let err = GraphBatch::from_tables(
            &[vec![1.0]],
            &[vec![1.0]],
            1,
            &tables,
            &[vec![0]],
            &device(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
    }

    #[test]
    fn test_out_of_range_neighbor_rejected() {
        let neighbors = vec![vec![(5, 0)]];
        let err = GraphBatch::from_adjacency(
            &[vec![1.0]],
            &[vec![1.0]],
            1,
            &neighbors,
            &[vec![0]],
            &device(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
    }

    #[test]
    fn test_ragged_atom_features_rejected() {
        let err = GraphBatch::from_adjacency(
            &[vec![1.0, 2.0], vec![1.0]],
            &[],
            1,
            &[vec![], vec![]],
            &[vec![0, 1]],
            &device(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err =
            GraphBatch::from_adjacency(&[], &[], 1, &[], &[], &device()).unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
    }
}
