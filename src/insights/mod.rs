//! Agronomic insight feed and plot urgency ranking.
//!
//! `detectors` holds pure heuristics over plain data, `engine` loads that
//! data and merges detector output into a ranked feed, and `ranking` scores
//! plots by how urgently they need attention.

pub mod detectors;
pub mod engine;
pub mod ranking;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

pub use engine::{generate_insights, merge_insights, InsightContext};
pub use ranking::{top_critical_plots, PlotUrgencyScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Warning,
    Recommendation,
    Alert,
    Info,
}

/// One entry of the insight feed. `priority` runs from 1 (lowest) to 5.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub affected_plot_ids: BTreeSet<String>,
    pub priority: u8,
    pub actions: Vec<String>,
    pub explanation: String,
    pub evidence: BTreeMap<String, serde_json::Value>,
}
