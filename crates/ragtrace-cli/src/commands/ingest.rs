use anyhow::Result;
use colored::Colorize;
use ragtrace_core::{IngestOutcome, Settings, ingest_corpus};

use crate::cli::IngestArgs;

pub async fn run(settings: &Settings, args: IngestArgs) -> Result<()> {
    let kb = super::open_knowledge_base(settings)?;

    match ingest_corpus(&kb, &args.corpus).await? {
        IngestOutcome::Skipped => {
            println!(
                "{} knowledge base already holds {} documents",
                "Skipped:".yellow(),
                kb.document_count()
            );
        }
        IngestOutcome::Ingested(count) => {
            println!("{} {} passages ingested", "Done:".green(), count);
        }
    }

    Ok(())
}
