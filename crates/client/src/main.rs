//! toologist - command line access to the AI Toologist directory
//!
//! Reads `TOOLOGIST_SUPABASE_URL` and `TOOLOGIST_SUPABASE_ANON_KEY` from the
//! environment. Logging honours `RUST_LOG`.

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use anyhow::Context;
    use clap::{Parser, Subcommand};
    use toologist_client::logging::{self, LogConfig};
    use toologist_client::realtime::{ChangeHandlers, ConnectionState};
    use toologist_client::resource::ApplyOutcome;
    use toologist_client::{ClientConfig, Toologist};
    use toologist_shared::{Review, Tool};
    use uuid::Uuid;

    #[derive(Parser)]
    #[command(name = "toologist")]
    #[command(about = "Browse the AI Toologist directory and follow live changes")]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// List tools, or search them when a query is given
        Tools {
            query: Option<String>,
            /// Only tools in this category (slug)
            #[arg(short, long)]
            category: Option<String>,
            /// Only featured tools
            #[arg(long)]
            featured: bool,
        },
        /// List categories
        Categories,
        /// Print tool changes (and new reviews of one tool) as they happen
        Watch {
            /// Also follow new reviews of this tool
            #[arg(long)]
            tool: Option<Uuid>,
        },
    }

    fn print_tools(tools: &[Tool]) {
        for tool in tools {
            println!(
                "{:<32} {:<16} {:>4.1}  ({} reviews)",
                tool.name,
                tool.category.as_deref().unwrap_or("-"),
                tool.rating,
                tool.review_count
            );
        }
    }

    fn ensure_loaded(outcome: ApplyOutcome, what: &str) -> anyhow::Result<()> {
        match outcome {
            ApplyOutcome::Failed(message) => anyhow::bail!("could not load {what}: {message}"),
            ApplyOutcome::Applied | ApplyOutcome::Stale => Ok(()),
        }
    }

    pub async fn run() -> anyhow::Result<()> {
        logging::init(LogConfig::default());
        let cli = Cli::parse();

        let config = ClientConfig::from_env().context("loading backend configuration")?;
        let app = Toologist::connect(config);

        match cli.command {
            Command::Tools {
                query,
                category,
                featured,
            } => {
                let store = app.tools();
                if let Some(query) = query {
                    ensure_loaded(store.search(&query).await, "search results")?;
                    print_tools(&store.search_results().data());
                } else {
                    let outcome = match (category, featured) {
                        (Some(slug), _) => store.fetch_by_category(&slug).await,
                        (None, true) => store.fetch_featured().await,
                        (None, false) => store.fetch_all().await,
                    };
                    ensure_loaded(outcome, "tools")?;
                    print_tools(&store.tools().data());
                }
            }
            Command::Categories => {
                let store = app.categories();
                ensure_loaded(store.fetch_all().await, "categories")?;
                for category in store.categories().data() {
                    println!("{:<24} {:<24} {}", category.name, category.slug, category.tool_count);
                }
            }
            Command::Watch { tool } => {
                let realtime = app.realtime();
                let _tools = realtime.tools_changes(
                    ChangeHandlers::new()
                        .on_insert(|t: Tool| println!("+ {}", t.name))
                        .on_update(|t: Tool| println!("~ {} ({:.1})", t.name, t.rating))
                        .on_delete(|id| println!("- {id}")),
                )?;
                let _reviews = match tool {
                    Some(tool_id) => Some(realtime.on_new_review(tool_id, |r: Review| {
                        println!("* new {}-star review: {}", r.rating, r.content)
                    })?),
                    None => None,
                };

                let mut state = realtime.connection_changes();
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        changed = state.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let current = state.borrow_and_update().clone();
                            if let ConnectionState::Failed { reason } = current {
                                anyhow::bail!("realtime connection failed: {reason}");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
