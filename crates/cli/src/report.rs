//! Plain-text IRR report (`irr_report.txt`).

use std::fmt::Write;

use concord_recon::ReconResult;

use crate::util::{display_width, pad_right};

const VARIABLE_WIDTH: usize = 28;
const SCOPE_WIDTH: usize = 22;
const METRIC_WIDTH: usize = 28;
const VALUE_WIDTH: usize = 30;

fn rule(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "-".repeat(display_width(title)));
}

pub fn render(result: &ReconResult) -> String {
    let mut out = String::new();
    let meta = &result.meta;
    let _ = writeln!(out, "Inter-rater reliability report: {}", meta.config_name);
    let _ = writeln!(
        out,
        "run {} (concord-recon {})",
        meta.run_at, meta.engine_version
    );
    let _ = writeln!(
        out,
        "raters: {}   entities: {}   variables: {}",
        meta.raters.join(", "),
        meta.entities,
        meta.variables
    );

    rule(&mut out, "Agreement");
    let _ = writeln!(
        out,
        "{}{}{}{}{}",
        pad_right("variable", VARIABLE_WIDTH),
        pad_right("scope", SCOPE_WIDTH),
        pad_right("metric", METRIC_WIDTH),
        pad_right("value", VALUE_WIDTH),
        "n (excluded)"
    );
    for r in &result.agreement.results {
        let mut metric = r.metric.to_string();
        if r.primary {
            metric.push_str(" *");
        }
        let mut value = r.statistic.to_string();
        if let Some(label) = r.interpretation() {
            let _ = write!(value, " {label}");
        }
        let _ = writeln!(
            out,
            "{}{}{}{}{} ({})",
            pad_right(&r.variable, VARIABLE_WIDTH),
            pad_right(&r.scope.to_string(), SCOPE_WIDTH),
            pad_right(&metric, METRIC_WIDTH),
            pad_right(&value, VALUE_WIDTH),
            r.n_entities,
            r.n_excluded
        );
    }
    let _ = writeln!(out, "* primary statistic for the variable and scope");

    let summary = &result.agreement.summary;
    if !summary.means.is_empty() {
        rule(&mut out, "Means across variables");
        for m in &summary.means {
            let _ = writeln!(
                out,
                "{}{}{:.4}{} over {} variable(s)",
                pad_right(&m.scope.to_string(), SCOPE_WIDTH),
                pad_right(m.metric.name(), METRIC_WIDTH),
                m.mean,
                m.interpretation.map(|l| format!(" {l}")).unwrap_or_default(),
                m.n_variables
            );
        }
    }

    if !summary.low_agreement.is_empty() {
        rule(&mut out, "Low agreement");
        for low in &summary.low_agreement {
            let _ = writeln!(
                out,
                "{}{}{:.1}%",
                pad_right(&low.variable, VARIABLE_WIDTH),
                pad_right(&low.scope.to_string(), SCOPE_WIDTH),
                low.agreement * 100.0
            );
        }
    }

    let disagreements = &result.agreement.disagreements;
    if !disagreements.is_empty() {
        rule(&mut out, "Disagreements");
        for d in disagreements {
            let _ = writeln!(
                out,
                "{}{}{}={} vs {}={}",
                pad_right(&d.variable, VARIABLE_WIDTH),
                pad_right(&d.entity_id, SCOPE_WIDTH),
                d.left_rater,
                d.left_value,
                d.right_rater,
                d.right_value
            );
        }
    }

    rule(&mut out, "Consensus");
    let consensus = &result.summary;
    let _ = writeln!(out, "records: {}", consensus.total_records);
    for (provenance, count) in &consensus.by_provenance {
        let _ = writeln!(out, "  {}{count}", pad_right(provenance, 16));
    }
    let _ = writeln!(out, "pending adjudication: {}", consensus.pending);

    if !result.issues.is_empty() {
        rule(&mut out, "Data issues");
        for (kind, count) in &consensus.issues_by_kind {
            let _ = writeln!(out, "  {}{count}", pad_right(kind, 28));
        }
    }

    if !consensus.unmapped_tokens.is_empty() {
        rule(&mut out, "Unmapped vocabulary labels");
        for (vocabulary, labels) in &consensus.unmapped_tokens {
            let _ = writeln!(out, "{vocabulary}:");
            for (label, count) in labels {
                let _ = writeln!(out, "  {}{count}", pad_right(label, 32));
            }
        }
    }

    out
}
