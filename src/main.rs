use taxi_sql_agent::config::{self, Settings};
use taxi_sql_agent::db::PostgresClient;
use taxi_sql_agent::sql_guard::{check_readonly_sql, normalize_sql, AllowedTables};
use taxi_sql_agent::SqlAgent;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taxi-sql-agent")]
#[command(about = "Answer taxi analytics questions with guarded, self-repairing SQL")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question
    Ask {
        question: String,

        /// Conversation thread for follow-up questions
        #[arg(long, default_value = "default")]
        thread_id: String,

        /// Print the full result as JSON instead of the answer text
        #[arg(long)]
        json: bool,
    },
    /// Run the read-only guard on a SQL string (no database or LLM access)
    Check {
        sql: String,

        /// Allowed table, bare or schema-qualified; repeatable
        #[arg(long = "allow")]
        allow: Vec<String>,
    },
    /// Interactive session on one thread; `/reset` clears its memory, `exit` quits
    Chat {
        #[arg(long, default_value = "default")]
        thread_id: String,
    },
    /// Check that PostgreSQL is reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let level = config::tracing_level(&std::env::var("LOG_LEVEL").unwrap_or_default());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Ask {
            question,
            thread_id,
            json,
        } => ask(&question, &thread_id, json).await,
        Commands::Check { sql, allow } => check(&sql, allow),
        Commands::Chat { thread_id } => chat(&thread_id).await,
        Commands::Ping => ping().await,
    }
}

fn build_agent() -> Result<SqlAgent> {
    let settings = Settings::from_env()?;
    info!("Loaded settings: {:?}", settings);
    Ok(SqlAgent::from_settings(&settings)?)
}

async fn ask(question: &str, thread_id: &str, json: bool) -> Result<()> {
    let agent = build_agent()?;
    let result = agent.ask(question, thread_id).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.final_answer);
    }
    Ok(())
}

fn check(sql: &str, allow: Vec<String>) -> Result<()> {
    let allowed: AllowedTables = allow.iter().map(|name| name.trim().to_lowercase()).collect();
    let normalized = normalize_sql(sql);
    let allowlist = if allowed.is_empty() { None } else { Some(&allowed) };

    match check_readonly_sql(&normalized, allowlist) {
        Ok(parsed) => {
            println!("OK: {}", normalized);
            let tables = parsed.referenced_tables();
            if !tables.is_empty() {
                println!(
                    "Tables: {}",
                    tables.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
                );
            }
            Ok(())
        }
        Err(rejection) => {
            println!("REJECTED: {}", rejection);
            std::process::exit(1);
        }
    }
}

async fn chat(thread_id: &str) -> Result<()> {
    let agent = build_agent()?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!("Taxi SQL agent. Type a question, `/reset` to forget context, `exit` to quit.");
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                agent.memory().clear(thread_id);
                println!("Conversation context cleared.");
            }
            question => {
                let result = agent.ask(question, thread_id).await;
                println!("{}\n", result.final_answer);
            }
        }
    }
    Ok(())
}

async fn ping() -> Result<()> {
    let settings = Settings::from_env()?;
    let client = PostgresClient::from_settings(&settings)?;
    client.check_connection().await?;
    println!("PostgreSQL is reachable (schema '{}').", client.default_schema());
    Ok(())
}
