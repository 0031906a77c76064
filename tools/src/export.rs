//! CSV and JSON outputs of an analysis run

use anyhow::{Context, Error};
use diff_exp::{ConservedTable, DeTable};
use log::info;
use scan_compare::context::{INTEGRATED, PCA};
use scan_compare::integrate::Anchor;
use scan_compare::ComparativeReport;
use scan_types::{CellMetadata, Embedding};
use serde::Serialize;
use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::Path;

fn writer(path: &Path) -> Result<csv::Writer<File>, Error> {
    csv::Writer::from_path(path).with_context(|| path.display().to_string())
}

/// Cells x components table with a `cell` column followed by `{prefix}_1 .. {prefix}_n`
pub fn write_embedding(path: &Path, embedding: &Embedding, cell_ids: &[String], prefix: &str) -> Result<(), Error> {
    let mut w = writer(path)?;
    let mut header = vec!["cell".to_string()];
    header.extend((1..=embedding.dims()).map(|i| format!("{prefix}_{i}")));
    w.write_record(&header)?;
    for (cell, row) in cell_ids.iter().zip(embedding.coords.rows()) {
        let mut record = vec![cell.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

/// One row per cell: condition and the label of every stored clustering
pub fn write_clusters(path: &Path, metadata: &CellMetadata) -> Result<(), Error> {
    let mut w = writer(path)?;
    let mut header = vec!["cell".to_string(), "condition".to_string()];
    header.extend(metadata.clusterings.keys().cloned());
    w.write_record(&header)?;
    for (c, cell) in metadata.cell_ids.iter().enumerate() {
        let mut record = vec![cell.clone(), metadata.conditions[c].clone()];
        record.extend(metadata.clusterings.values().map(|l| l.labels[c].to_string()));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct QcRecord<'a> {
    cell: &'a str,
    condition: &'a str,
    total_counts: u64,
    n_features: u32,
    percent_mito: f64,
}

/// Per-cell QC metrics
pub fn write_qc(path: &Path, metadata: &CellMetadata) -> Result<(), Error> {
    let mut w = writer(path)?;
    for c in 0..metadata.total_counts.len() {
        w.serialize(QcRecord {
            cell: &metadata.cell_ids[c],
            condition: &metadata.conditions[c],
            total_counts: metadata.total_counts[c],
            n_features: metadata.n_features[c],
            percent_mito: metadata.percent_mito[c],
        })?;
    }
    w.flush()?;
    Ok(())
}

/// Rows of a differential expression table, in table order
pub fn write_de_table(path: &Path, table: &DeTable) -> Result<(), Error> {
    let mut w = writer(path)?;
    for row in &table.rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

/// Conserved markers of every cluster, with p-value, adjusted p-value and fold change of each group
pub fn write_conserved(path: &Path, tables: &[ConservedTable]) -> Result<(), Error> {
    let groups = tables
        .iter()
        .flat_map(|t| t.rows.iter())
        .flat_map(|r| r.per_group.keys().cloned())
        .collect::<std::collections::BTreeSet<_>>();

    let mut w = writer(path)?;
    let mut header = vec!["gene", "cluster", "max_adj_p_value", "min_p_value"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    for g in &groups {
        header.push(format!("{g}_p_value"));
        header.push(format!("{g}_adj_p_value"));
        header.push(format!("{g}_log2_fold_change"));
    }
    w.write_record(&header)?;

    for row in tables.iter().flat_map(|t| t.rows.iter()) {
        let mut record = vec![
            row.gene.clone(),
            row.cluster.clone(),
            row.max_adj_p_value.to_string(),
            row.min_p_value.to_string(),
        ];
        for g in &groups {
            match row.per_group.get(g) {
                Some(r) => {
                    record.push(r.p_value.to_string());
                    record.push(r.adj_p_value.to_string());
                    record.push(r.log2_fold_change.to_string());
                }
                None => record.extend([String::new(), String::new(), String::new()]),
            }
        }
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct AnchorRecord<'a> {
    reference_cell: &'a str,
    query_cell: &'a str,
    score: f64,
}

/// Anchors with cell ids in place of row indices
pub fn write_anchors(path: &Path, anchors: &[Anchor], cell_ids: &[String]) -> Result<(), Error> {
    let mut w = writer(path)?;
    for a in anchors {
        w.serialize(AnchorRecord {
            reference_cell: &cell_ids[a.reference_cell],
            query_cell: &cell_ids[a.query_cell],
            score: a.score,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// Pretty-printed JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// Write every table of a run into `out_dir`
pub fn write_report(out_dir: &Path, report: &ComparativeReport) -> Result<(), Error> {
    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    let ctx = &report.context;
    let cells = &ctx.metadata.cell_ids;

    write_qc(&out_dir.join("qc_metrics.csv"), &ctx.metadata)?;
    write_embedding(&out_dir.join("pca.csv"), ctx.embedding(PCA)?, cells, "PC")?;
    write_embedding(&out_dir.join("integrated.csv"), ctx.embedding(INTEGRATED)?, cells, "INT")?;
    write_clusters(&out_dir.join("clusters.csv"), &ctx.metadata)?;

    write_de_table(&out_dir.join("de_condition.csv"), &report.de.condition)?;
    write_de_table(&out_dir.join("de_condition_per_cluster.csv"), &report.de.condition_per_cluster)?;
    write_de_table(&out_dir.join("markers.csv"), &report.de.markers)?;
    write_conserved(&out_dir.join("conserved_markers.csv"), &report.de.conserved)?;

    if let Some(integration) = &ctx.integration {
        write_anchors(&out_dir.join("anchors.csv"), &integration.anchors, cells)?;
        write_json(&out_dir.join("integration.json"), integration)?;
    }
    write_json(&out_dir.join("diagnostics.json"), &report.diagnostics)?;
    info!("wrote outputs to {}", out_dir.display());
    Ok(())
}
