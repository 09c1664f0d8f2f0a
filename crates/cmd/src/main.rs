use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::*;
use cmd::common::{CredentialChoice, access_from, open_store};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "sheets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $SHEETSTORE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bearer token for the restricted spreadsheet
    #[arg(long, global = true, env = "SHEETSTORE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Use this credential whatever spreadsheet is targeted
    #[arg(long = "as", global = true, value_enum)]
    credential: Option<CredentialChoice>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the records of a table
    List { alias: String, table: String },
    /// Show one record
    Get {
        alias: String,
        table: String,
        position: usize,
    },
    /// Append a record
    Create {
        alias: String,
        table: String,
        /// Field values as name=value
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// Change fields of a record; others keep their values
    Update {
        alias: String,
        table: String,
        position: usize,
        /// Field values as name=value
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// Delete a record; later records move up
    Delete {
        alias: String,
        table: String,
        position: usize,
    },
    /// Move a record to another position
    Move {
        alias: String,
        table: String,
        from: usize,
        to: usize,
    },
    /// Rewrite the position column of a table
    Renumber { alias: String, table: String },
    /// List the tables of a spreadsheet
    Tables { alias: String },
    /// Create a table with the spreadsheet's header row
    CreateTable { alias: String, name: String },
    /// Create the dated table ("MON YY") for a date and reorder tables
    CreateDated {
        alias: String,
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Rename a table
    RenameTable {
        alias: String,
        table: String,
        new_name: String,
    },
    /// Delete a table and its records
    DeleteTable { alias: String, table: String },
    /// Put the pinned table first and dated tables newest first
    Reorder { alias: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let store = open_store(cli.config)?;
    let access = access_from(cli.token, cli.credential);

    match &cli.command {
        Commands::List { alias, table } => list_command(&store, &access, alias, table).await,
        Commands::Get {
            alias,
            table,
            position,
        } => get_command(&store, &access, alias, table, *position).await,
        Commands::Create {
            alias,
            table,
            fields,
        } => create_command(&store, &access, alias, table, fields).await,
        Commands::Update {
            alias,
            table,
            position,
            fields,
        } => update_command(&store, &access, alias, table, *position, fields).await,
        Commands::Delete {
            alias,
            table,
            position,
        } => delete_command(&store, &access, alias, table, *position).await,
        Commands::Move {
            alias,
            table,
            from,
            to,
        } => move_command(&store, &access, alias, table, *from, *to).await,
        Commands::Renumber { alias, table } => renumber_command(&store, &access, alias, table).await,
        Commands::Tables { alias } => tables_command(&store, &access, alias).await,
        Commands::CreateTable { alias, name } => create_table_command(&store, &access, alias, name).await,
        Commands::CreateDated { alias, date } => {
            create_dated_command(&store, &access, alias, date.as_deref()).await
        }
        Commands::RenameTable {
            alias,
            table,
            new_name,
        } => rename_table_command(&store, &access, alias, table, new_name).await,
        Commands::DeleteTable { alias, table } => delete_table_command(&store, &access, alias, table).await,
        Commands::Reorder { alias } => reorder_command(&store, &access, alias).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "sheets", "--as", "service", "create", "questions", "Questions", "-f", "topic=rust",
            "--field", "answer=yes",
        ])
        .unwrap();
        assert!(matches!(cli.credential, Some(CredentialChoice::Service)));
        match cli.command {
            Commands::Create { alias, table, fields } => {
                assert_eq!(alias, "questions");
                assert_eq!(table, "Questions");
                assert_eq!(fields, vec!["topic=rust", "answer=yes"]);
            }
            _ => panic!("expected create"),
        }
    }
}
