use std::{fs, io::Read, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use nm_hoister::{DebugLevel, HoistOptions, Hoister, InputTree, TreeRenderer, WorkTree, shrink_tree};

/// Hoists a package dependency tree and prints the result.
#[derive(Debug, Parser)]
#[command(name = "nm-hoister", about)]
struct Args {
    /// JSON input tree; read from stdin when omitted.
    input: Option<PathBuf>,

    /// Run the self-check after every hoisting pass.
    #[arg(long)]
    check: bool,

    /// Debug level (-1 to 9); overrides NM_DEBUG_LEVEL.
    #[arg(long)]
    debug_level: Option<i32>,

    /// Print the hoisted tree as JSON instead of rendering it.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let raw = match &args.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    let input: InputTree = serde_json::from_str(&raw).context("failed to parse the input tree")?;
    input.validate()?;

    let options = HoistOptions {
        check: args.check.then_some(true),
        debug_level: args.debug_level.map(DebugLevel::from_number),
        hoisting_limits: None,
    };

    let mut work_tree = WorkTree::from_input_tree(&input);

    let mut hoister = Hoister::new(&mut work_tree);
    hoister.set_options(&options);
    hoister.hoist()?;

    if args.json {
        let hoisted = shrink_tree(&work_tree);
        println!("{}", serde_json::to_string_pretty(&hoisted)?);
    } else {
        print!("{}", TreeRenderer::new(&work_tree).render());
    }

    Ok(())
}
