#![forbid(unsafe_code)]
//! Command-line front end for the DeltaLedger journal

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use deltaledger::cli::{init_logging, open_engine};
use deltaledger::config::load_config;
use deltaledger::delta::{format_amount, Sign};
use deltaledger::operation::{Router, TxContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sets the base values of two names
    Init {
        name_a: String,
        #[arg(allow_hyphen_values = true)]
        amount_a: String,
        name_b: String,
        #[arg(allow_hyphen_values = true)]
        amount_b: String,
    },
    /// Moves an amount from one name to another
    Transfer {
        from: String,
        to: String,
        /// A negative amount moves value from `to` to `from`
        #[arg(allow_hyphen_values = true)]
        amount: String,
        /// Transaction id to tag the deltas with (generated when omitted)
        #[arg(long)]
        tx_id: Option<String>,
    },
    /// Folds the recorded deltas of a name into its current total
    Query { name: String },
    /// Overwrites an existing base value, bypassing the journal
    Put { name: String, value: String },
    /// Reads a base value
    Get { name: String },
    /// Lists every delta recorded for a name
    History { name: String },
    /// Sends a raw function call through the operation router
    Invoke {
        function: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        #[arg(long)]
        tx_id: Option<String>,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
}

fn tx_context(tx_id: Option<String>) -> TxContext {
    tx_id.map(TxContext::new).unwrap_or_else(TxContext::generate)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config)?;
    let engine = open_engine(&config)?;

    match cli.command {
        Commands::Init {
            name_a,
            amount_a,
            name_b,
            amount_b,
        } => {
            engine.initialize(&name_a, &amount_a, &name_b, &amount_b)?;
            println!(
                "{} {} = {}, {} = {}",
                "✅ Initialized".bright_green().bold(),
                name_a.bright_white(),
                amount_a,
                name_b.bright_white(),
                amount_b
            );
        }
        Commands::Transfer {
            from,
            to,
            amount,
            tx_id,
        } => {
            let ctx = tx_context(tx_id);
            let message = engine.apply_transfer(&from, &to, &amount, ctx.tx_id())?;
            println!("{}", format!("✅ {}", message).bright_green());
            println!("{} {}", "Transaction:".cyan(), ctx.tx_id());
        }
        Commands::Query { name } => {
            let total = engine.compute_total(&name)?;
            println!("{} = {}", name.bright_white(), format_amount(total).bright_yellow().bold());
        }
        Commands::Put { name, value } => {
            engine.raw_put(&name, &value)?;
            println!("{} {}", "✅ Stored".bright_green(), name.bright_white());
        }
        Commands::Get { name } => {
            let value = engine.raw_get(&name)?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::History { name } => {
            let records = engine.history(&name)?;

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("#").add_attribute(Attribute::Bold),
                    Cell::new("Op").add_attribute(Attribute::Bold),
                    Cell::new("Amount").add_attribute(Attribute::Bold),
                    Cell::new("Transaction").add_attribute(Attribute::Bold),
                    Cell::new("Sequence").add_attribute(Attribute::Bold),
                ]);

            for (i, record) in records.iter().enumerate() {
                let color = match record.sign {
                    Sign::Increase => TableColor::Green,
                    Sign::Decrease => TableColor::Red,
                };
                let tx_short = if record.tx_id.chars().count() > 16 {
                    format!("{}...", record.tx_id.chars().take(13).collect::<String>())
                } else {
                    record.tx_id.clone()
                };
                table.add_row(vec![
                    Cell::new(i + 1),
                    Cell::new(record.sign.symbol()).fg(color),
                    Cell::new(record.magnitude.as_str()).fg(color),
                    Cell::new(tx_short),
                    Cell::new(
                        record
                            .sequence
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                ]);
            }

            println!("{}", format!("📜 Deltas for {}", name).bright_cyan().bold());
            println!("{}", table);
            println!("{} {}", "Total deltas:".cyan(), records.len());
        }
        Commands::Invoke {
            function,
            args,
            tx_id,
            json,
        } => {
            let ctx = tx_context(tx_id);
            let router = Router::new(engine);
            let response = router.handle(&function, args.as_slice(), &ctx);

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.is_ok() {
                println!("{}", response.payload_text());
            } else {
                eprintln!("{} {}", "❌".red(), response.message.red());
            }

            if !response.is_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
