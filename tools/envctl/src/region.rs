//! `envctl region`

use anyhow::Result;
use colored::*;
use envmon_flags::RegionSet;

pub fn handle_command(expr: &str, values: &[f64]) -> Result<()> {
    let region = RegionSet::parse(expr)?;

    println!("{} {}", "Region:".bold(), region.to_string().cyan());
    for (idx, group) in region.groups().iter().enumerate() {
        let conds: Vec<String> = group.iter().map(ToString::to_string).collect();
        println!("  group {}: {}", idx + 1, conds.join(" AND "));
    }
    if let Ok(hours) = region.invariance_hours() {
        println!("  (valid as an invariance window of {} h)", hours);
    }

    for (value, matched) in evaluate(&region, values) {
        let verdict = if matched {
            "in region".green()
        } else {
            "outside".red()
        };
        println!("  {:>12} {}", value, verdict);
    }
    Ok(())
}

fn evaluate(region: &RegionSet, values: &[f64]) -> Vec<(f64, bool)> {
    values
        .iter()
        .map(|v| (*v, region.is_in_region(*v)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_evaluate() {
        let region = RegionSet::parse(">=10,<=20;=0").unwrap();
        let results = evaluate(&region, &[15.0, 0.0, 25.0, -5.0]);
        assert_eq!(
            results,
            vec![(15.0, true), (0.0, true), (25.0, false), (-5.0, false)]
        );
    }

    #[test]
    fn test_bad_expression_is_reported() {
        assert!(handle_command(">>", &[1.0]).is_err());
    }
}
