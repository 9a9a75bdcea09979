//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the engine code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::dynamics::PhaseSummary;
use crate::models::ModelRegistry;
use crate::scenario::{ComparisonTable, ScenarioDescription};

/// Phase table of one scenario.
pub fn format_phase_summary(scenario: &str, rows: &[PhaseSummary]) -> String {
    let mut out = String::new();
    let Some(first) = rows.first() else {
        out.push_str(&format!("=== {scenario} ===\n(no phases)\n"));
        return out;
    };

    out.push_str(&format!("=== {scenario} ({}) ===\n", first.ode));
    let names: Vec<&str> = first.params.iter().map(|(n, _)| n.as_str()).collect();

    let mut header = format!("{:<6} {:<10} {:<10} {:<9} {:>7}", "phase", "start", "end", "type", "Rt");
    let mut rule = format!("{:-<6} {:-<10} {:-<10} {:-<9} {:-<7}", "", "", "", "", "");
    for name in &names {
        header.push_str(&format!(" {:>9}", truncate(name, 9)));
        rule.push_str(&format!(" {:-<9}", ""));
    }
    header.push_str(&format!(" {:>10}", "score"));
    rule.push_str(&format!(" {:-<10}", ""));
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(rule.trim_end());
    out.push('\n');

    for r in rows {
        let mut line = format!(
            "{:<6} {:<10} {:<10} {:<9} {:>7}",
            r.name,
            r.start,
            r.end,
            r.tag.label(),
            fmt_opt(r.rt, 2),
        );
        for (_, value) in &r.params {
            line.push_str(&format!(" {:>9}", fmt_opt(*value, 5)));
        }
        let score = match (&r.quality, r.score) {
            (Some(q), Some(s)) if q.confidence == crate::domain::Confidence::Low => format!("{s:.4}!"),
            (_, s) => fmt_opt(s, 4),
        };
        line.push_str(&format!(" {score:>10}"));
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Comparison table, printing every `every`-th date plus the last one.
pub fn format_comparison(table: &ComparisonTable, every: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("Comparison: {}\n", table.metric));

    let mut header = format!("{:<10}", "date");
    let mut rule = format!("{:-<10}", "");
    for name in &table.scenarios {
        header.push_str(&format!(" {:>14}", truncate(name, 14)));
        rule.push_str(&format!(" {:-<14}", ""));
    }
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(rule.trim_end());
    out.push('\n');

    let step = every.max(1);
    let last = table.rows.len().saturating_sub(1);
    for (i, row) in table.rows.iter().enumerate() {
        if i % step != 0 && i != last {
            continue;
        }
        let mut line = format!("{:<10}", row.date);
        for value in &row.values {
            line.push_str(&format!(" {:>14}", fmt_value(*value)));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

pub fn format_descriptions(rows: &[ScenarioDescription]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<14} {:>14} {:<10} {:>14} {:>12} {:>7}\n",
            "scenario", "max infected", "peak", "confirmed", "fatal", "Rt"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<14} {:-<14} {:-<10} {:-<14} {:-<12} {:-<7}", "", "", "", "", "", "").trim_end());
    out.push('\n');
    for r in rows {
        out.push_str(
            format!(
                "{:<14} {:>14.0} {:<10} {:>14.0} {:>12.0} {:>7.2}",
                truncate(&r.name, 14),
                r.max_infected,
                r.max_date,
                r.final_confirmed,
                r.final_fatal,
                r.final_rt,
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Registered models with their parameter schema.
pub fn format_models(models: &ModelRegistry) -> String {
    let mut out = String::new();
    for model in models.iter() {
        out.push_str(&format!("{} [{}]\n", model.name(), model.variables().join(", ")));
        for p in model.parameters() {
            out.push_str(&format!(
                "  {:<8} [{}, {}]{}\n",
                p.name,
                p.lower,
                p.upper,
                if p.rate { " per day" } else { "" }
            ));
        }
    }
    out
}

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    match v {
        Some(x) => format!("{x:.digits$}"),
        None => "-".to_string(),
    }
}

fn fmt_value(v: Option<f64>) -> String {
    match v {
        Some(x) if x.abs() >= 1_000.0 => format!("{x:.0}"),
        Some(x) => format!("{x:.4}"),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::PhaseTag;
    use crate::scenario::{CompareMetric, ComparisonRow};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 4, day).unwrap()
    }

    #[test]
    fn phase_table_lists_parameters_and_placeholders() {
        let rows = vec![PhaseSummary {
            name: "0th".to_string(),
            start: d(1),
            end: d(10),
            population: Some(1e6),
            ode: "SIR".to_string(),
            rt: None,
            params: vec![("rho".to_string(), None), ("sigma".to_string(), Some(0.1))],
            day_params: Vec::new(),
            tag: PhaseTag::Past,
            score: None,
            quality: None,
        }];
        let text = format_phase_summary("Baseline", &rows);
        assert!(text.starts_with("=== Baseline (SIR) ==="));
        assert!(text.contains("rho"));
        assert!(text.contains("0.10000"));
        let last = text.lines().last().unwrap();
        assert!(last.starts_with("0th"));
        assert!(last.contains("Past"));
        assert!(last.ends_with('-'));
    }

    #[test]
    fn comparison_keeps_the_last_row() {
        let table = ComparisonTable {
            metric: CompareMetric::Rt,
            scenarios: vec!["A".to_string(), "B".to_string()],
            rows: (1..=10)
                .map(|day| ComparisonRow {
                    date: d(day),
                    values: vec![Some(1.5), if day > 5 { None } else { Some(2_500.0) }],
                })
                .collect(),
        };
        let text = format_comparison(&table, 7);
        let dates: Vec<&str> = text.lines().skip(3).map(|l| &l[..10]).collect();
        assert_eq!(dates, vec!["2020-04-01", "2020-04-08", "2020-04-10"]);
        assert!(text.contains("2500"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("Lockdown", 14), "Lockdown");
        assert_eq!(truncate("VeryLongScenarioName", 6), "VeryL.");
    }
}
