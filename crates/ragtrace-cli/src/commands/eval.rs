use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Table};
use ragtrace_ai::eval::{Dataset, EvalRunner};
use ragtrace_core::{ChatApp, Settings};

use crate::cli::EvalArgs;

pub async fn run(settings: &Settings, args: EvalArgs) -> Result<()> {
    let json = std::fs::read_to_string(&args.dataset)
        .with_context(|| format!("Failed to read dataset {}", args.dataset.display()))?;
    let dataset = Dataset::from_json(&json)?;
    println!(
        "Evaluating {} items from {}",
        dataset.len(),
        args.dataset.display()
    );

    // The chat stack provides the runner with its MCP tools attached.
    let app = ChatApp::build(settings).await?;
    let eval_runner = EvalRunner::with_default_evaluators(app.runner().clone());
    let report = eval_runner.run(&dataset).await?;

    let mut table = Table::new();
    table.set_header(vec!["Evaluator", "Mean score"]);

    let mut means: Vec<_> = report.means.iter().collect();
    means.sort_by(|a, b| a.0.cmp(b.0));
    for (evaluator, mean) in means {
        let rendered = format!("{mean:.3}");
        let cell = if *mean >= 1.0 {
            Cell::new(rendered.green().to_string())
        } else if *mean > 0.0 {
            Cell::new(rendered.yellow().to_string())
        } else {
            Cell::new(rendered.red().to_string())
        };
        table.add_row(vec![Cell::new(evaluator), cell]);
    }

    println!("{table}");
    println!(
        "{} {} items scored at {}",
        "Done:".green(),
        report.items.len(),
        report.generated_at
    );

    Ok(())
}
