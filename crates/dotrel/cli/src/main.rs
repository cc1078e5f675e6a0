// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! dotrel CLI
//!
//! Compiles a JSON-described query for a tenant schema and prints the
//! generated command text and its bound parameters.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotrel_common::logging::init_tracing;
use dotrel_common::{ParameterMode, StoreConfig};
use dotrel_core::query::{PageRequest, QueryCompiler, QueryExpr, SqlCommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(name = "dotrel")]
#[command(about = "dotrel - object query compiler and document store tooling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a serialized query to command text
    Compile {
        /// JSON file holding the query operator chain, `-` for stdin
        input: PathBuf,
        /// Tenant schema the query runs against
        #[arg(long, short = 's', default_value = "dbo")]
        schema: String,
        /// `bound` or `inline`; defaults to DOTREL_PARAMETER_MODE
        #[arg(long, short = 'm')]
        mode: Option<ParameterMode>,
        /// Page number, starting at 1
        #[arg(long, requires = "size")]
        page: Option<u64>,
        /// Page size
        #[arg(long, requires = "page")]
        size: Option<u64>,
        /// Emit the unpaged count query instead
        #[arg(long, conflicts_with_all = ["page", "size"])]
        count: bool,
        /// Print the command as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            schema,
            mode,
            page,
            size,
            count,
            json,
        } => {
            let mode = mode.unwrap_or(StoreConfig::from_env().parameter_mode);
            let query = read_query(&input)?;
            let compiler = QueryCompiler::new(mode);

            let command = if count {
                compiler.compile_count(&query, &schema)?
            } else {
                let page = match (page, size) {
                    (Some(page), Some(size)) => Some(PageRequest::new(page, size)?),
                    _ => None,
                };
                compiler.compile(&query, &schema, page)?.command
            };
            debug!(schema = %schema, mode = ?mode, "compiled {}", query.operator_name());
            print_command(&command, json)?;
        }
    }
    Ok(())
}

fn read_query(input: &Path) -> Result<QueryExpr> {
    let text = if input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer).context("reading query from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?
    };
    serde_json::from_str(&text).context("parsing query")
}

fn print_command(command: &SqlCommand, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(command)?);
        return Ok(());
    }
    println!("{}", command.text);
    for (i, param) in command.params.iter().enumerate() {
        println!("  @p{i} = {param}");
    }
    Ok(())
}
