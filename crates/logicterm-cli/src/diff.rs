use anyhow::{Context, Result};
use colored::Colorize;
use logicterm_logic::{IsomorphismConfig, IsomorphismResult, LogicalExpression, SolverKind};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub(crate) struct DiffSummary {
    pub solver: &'static str,
    pub score: i32,
    pub equivalent: bool,
    pub additions: Vec<String>,
    pub deletions: Vec<String>,
    pub merged: String,
}

pub(crate) fn load_expression(path: &Path) -> Result<LogicalExpression> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let expression: LogicalExpression = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {} as a logical expression", path.display()))?;
    expression
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(expression)
}

pub(crate) fn summarize(
    reference: &LogicalExpression,
    comparison: &LogicalExpression,
    result: &IsomorphismResult,
) -> Result<DiffSummary> {
    let describe = |expression: &LogicalExpression, index: usize| -> Result<String> {
        Ok(format!("[{index}] {}", expression.node(index)?.kind()))
    };
    Ok(DiffSummary {
        solver: result.solver(),
        score: result.solution().score(),
        equivalent: result.equivalent(),
        additions: result
            .addition_roots()
            .iter()
            .map(|i| describe(reference, *i))
            .collect::<Result<_>>()?,
        deletions: result
            .deletion_roots()
            .iter()
            .map(|i| describe(comparison, *i))
            .collect::<Result<_>>()?,
        merged: result.merged_expression().to_string(),
    })
}

pub(crate) fn cmd_diff(reference: &Path, comparison: &Path, solver: SolverKind, json: bool) -> Result<()> {
    let reference_expression = load_expression(reference)?;
    let comparison_expression = load_expression(comparison)?;
    tracing::debug!(
        reference_nodes = reference_expression.node_count(),
        comparison_nodes = comparison_expression.node_count(),
        ?solver,
        "loaded expressions"
    );
    let result = reference_expression
        .find_isomorphisms(&comparison_expression, &IsomorphismConfig::with_solver(solver))?;
    let summary = summarize(&reference_expression, &comparison_expression, &result)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} {} (score {})", "Solver:".bold(), summary.solver, summary.score);
    if summary.equivalent {
        println!("{}", "Equivalent.".green());
        return Ok(());
    }
    println!("{}", format!("Additions ({})", summary.additions.len()).green().bold());
    for line in &summary.additions {
        println!("  + {line}");
    }
    println!("{}", format!("Deletions ({})", summary.deletions.len()).red().bold());
    for line in &summary.deletions {
        println!("  - {line}");
    }
    println!("{}", "Merged:".bold());
    print!("{}", summary.merged);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logicterm_logic::LogicalExpressionBuilder;

    fn definition(concepts: &[i32]) -> LogicalExpression {
        let mut b = LogicalExpressionBuilder::new(1);
        let children: Vec<_> = concepts.iter().map(|c| b.concept(*c)).collect();
        let and = b.and(&children);
        b.necessary_set(&[and]);
        b.build().unwrap()
    }

    #[test]
    fn summary_lists_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let reference_path = dir.path().join("reference.json");
        let comparison_path = dir.path().join("comparison.json");
        std::fs::write(&reference_path, serde_json::to_string(&definition(&[1, 2])).unwrap()).unwrap();
        std::fs::write(&comparison_path, serde_json::to_string(&definition(&[1, 3])).unwrap()).unwrap();

        let reference = load_expression(&reference_path).unwrap();
        let comparison = load_expression(&comparison_path).unwrap();
        let result = reference
            .find_isomorphisms(&comparison, &IsomorphismConfig::default())
            .unwrap();
        let summary = summarize(&reference, &comparison, &result).unwrap();
        assert!(!summary.equivalent);
        assert_eq!(summary.additions.len(), 1);
        assert_eq!(summary.deletions.len(), 1);
        assert!(summary.additions[0].contains("Concept [2]"));
    }

    #[test]
    fn unreadable_input_names_the_file() {
        let err = load_expression(Path::new("/nonexistent/reference.json")).unwrap_err();
        assert!(format!("{err:#}").contains("reference.json"));
    }
}
