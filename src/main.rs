use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bank_normalizer::{
    check_config, expand_inputs, AlwaysContinue, BatchContext, ConfigSet, ConfirmPolicy,
    ConsolePrompt, FileFingerprint, SaveMode, SheetLocation,
};

#[derive(Parser)]
#[command(name = "bank-normalizer", version, about = "Normalize bank exports into one schema")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify, transform, enrich and store every input file
    Process {
        /// Directory of JSON configuration documents
        #[arg(long)]
        config: PathBuf,

        /// Output root
        #[arg(long)]
        output: PathBuf,

        /// Document reference recorded in the document log
        #[arg(long)]
        doc: Option<String>,

        /// Process files in order without account enrichment
        #[arg(long)]
        one_by_one: bool,

        /// Continue at every checkpoint without asking
        #[arg(long)]
        yes: bool,

        /// Never merge into existing statement files
        #[arg(long)]
        new_files: bool,

        /// Zero-based sheet index
        #[arg(long, default_value_t = 0)]
        sheet: usize,

        /// Header row, counted from the first used row
        #[arg(long, default_value_t = 0)]
        header_row: usize,

        /// Files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print header digests, for registering new formats
    Fingerprint {
        /// Zero-based sheet index
        #[arg(long, default_value_t = 0)]
        sheet: usize,

        /// Header row, counted from the first used row
        #[arg(long, default_value_t = 0)]
        header_row: usize,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Compile every rule set and report configuration errors
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Process {
            config,
            output,
            doc,
            one_by_one,
            yes,
            new_files,
            sheet,
            header_row,
            inputs,
        } => {
            let location = SheetLocation { sheet, header_row };
            run_process(config, output, doc, one_by_one, yes, new_files, location, &inputs)
        }
        Command::Fingerprint {
            sheet,
            header_row,
            files,
        } => run_fingerprint(SheetLocation { sheet, header_row }, &files),
        Command::CheckConfig { config } => run_check_config(config),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_process(
    config_dir: PathBuf,
    output: PathBuf,
    doc: Option<String>,
    one_by_one: bool,
    yes: bool,
    new_files: bool,
    location: SheetLocation,
    inputs: &[PathBuf],
) -> Result<()> {
    let config = ConfigSet::load_dir(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    let files = expand_inputs(inputs)?;
    println!("📂 {} input files", files.len());

    let mode = if new_files { SaveMode::NewFile } else { SaveMode::Merge };
    let mut ctx = BatchContext::new(config, &output)?
        .with_statement_mode(mode)
        .with_location(location);

    let report = if one_by_one {
        ctx.process_one_by_one(&files, doc.as_deref())
    } else {
        let mut policy: Box<dyn ConfirmPolicy> = if yes {
            Box::new(AlwaysContinue)
        } else {
            Box::new(ConsolePrompt)
        };
        ctx.process_accounts_then_statements(&files, doc.as_deref(), policy.as_mut())
    };

    println!("\n{}", report.summary());
    if report.aborted {
        bail!("batch aborted");
    }
    Ok(())
}

fn run_fingerprint(location: SheetLocation, files: &[PathBuf]) -> Result<()> {
    for path in expand_inputs(files)? {
        match FileFingerprint::read(&path, location) {
            Ok(fp) => println!("{}\n  {}\n  {}", path.display(), fp.digest, fp.rendered),
            Err(e) => eprintln!("❌ {}: {}", path.display(), e),
        }
    }
    Ok(())
}

fn run_check_config(config_dir: PathBuf) -> Result<()> {
    let config = ConfigSet::load_dir(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    let problems = check_config(&config);

    if problems.is_empty() {
        println!(
            "✅ {} rule sets, {} registered formats",
            config.rule_set_keys().len(),
            config.header_hash.len()
        );
        return Ok(());
    }
    for (key, message) in &problems {
        println!("❌ {}: {}", key, message);
    }
    bail!("{} configuration problems", problems.len())
}
