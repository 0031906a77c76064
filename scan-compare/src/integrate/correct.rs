use super::Anchor;
use crate::nn::knn_between;
use log::info;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

/// Move every query cell of `embedding` by a weighted blend of the displacements
/// (reference - query position) of its `k_weight` nearest anchors.
///
/// Anchors are located by their query cell. An anchor at distance `d` gets the weight
/// `1 - exp(-(1 - d / d_k) * score * (sd_weight / 2)^2)`, with `d_k` the distance to the
/// farthest of the anchors considered, and the weights of each cell are normalized to sum to
/// one. If they are all zero (e.g. a single anchor) the anchors are averaged uniformly.
/// Reference cells, and everything when there are no anchors, are returned unchanged.
pub fn correct_embedding(
    embedding: &ArrayView2<f64>,
    query_cells: &[usize],
    anchors: &[Anchor],
    k_weight: usize,
    sd_weight: f64,
) -> Array2<f64> {
    let mut out = embedding.to_owned();
    if anchors.is_empty() || query_cells.is_empty() {
        return out;
    }

    let anchor_query = anchors.iter().map(|a| a.query_cell).collect::<Vec<_>>();
    let anchor_ref = anchors.iter().map(|a| a.reference_cell).collect::<Vec<_>>();
    let displacement = &embedding.select(Axis(0), &anchor_ref) - &embedding.select(Axis(0), &anchor_query);
    let anchor_pos = embedding.select(Axis(0), &anchor_query);
    let query_pos = embedding.select(Axis(0), query_cells);

    let nn = knn_between(&query_pos.view(), &anchor_pos.view(), k_weight.min(anchors.len()));
    let bandwidth = (sd_weight / 2.0).powi(2);

    let shifts = (0..query_cells.len())
        .into_par_iter()
        .map(|i| {
            let idx = nn.indices.row(i);
            let dist = nn.distances.row(i);
            let dk = dist[dist.len() - 1];
            let mut w = idx
                .iter()
                .zip(dist.iter())
                .map(|(&a, &d)| {
                    let near = if dk > 0.0 { 1.0 - d / dk } else { 1.0 };
                    1.0 - (-(near * anchors[a].score) * bandwidth).exp()
                })
                .collect::<Vec<_>>();
            let mut total = w.iter().sum::<f64>();
            if !(total > 0.0) {
                w.iter_mut().for_each(|x| *x = 1.0);
                total = w.len() as f64;
            }

            let mut shift = Array1::zeros(displacement.ncols());
            for (&a, &wa) in idx.iter().zip(&w) {
                shift.scaled_add(wa / total, &displacement.row(a));
            }
            shift
        })
        .collect::<Vec<_>>();

    for (&c, shift) in query_cells.iter().zip(&shifts) {
        let mut row = out.row_mut(c);
        row += shift;
    }
    info!(
        "corrected {} cells from {} anchors ({} per cell)",
        query_cells.len(),
        anchors.len(),
        nn.k()
    );
    out
}
