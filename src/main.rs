mod automerge;
mod clean;
mod cli;
mod config;
mod error;
mod forge;
mod git;
mod hooks;
mod merge;
mod message;
mod model;
mod named_stack;
mod pr_body;
mod push;
mod refs;
mod stack_name;
mod status;
mod tips;
mod util;

fn main() -> eyre::Result<()> {
    cli::run()
}
