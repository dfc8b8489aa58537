use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;

use blastlca_rs::assign_lca_from_files;
use blastlca_rs::blast::FilterOptions;
use blastlca_rs::entrez::EntrezClient;

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .expect("Invalid spinner template"),
    );
    bar.set_message(msg.to_string());
    bar
}

fn main() {
    env_logger::init();

    // Usage: blastlca-rs <taxDB> <hits.tsv[.gz]> [more hit files...]
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("usage: blastlca-rs <taxDB> <hits.tsv[.gz]>...");
        process::exit(2);
    }
    let taxdb_path = args[0].clone();
    let hit_files: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();

    let bar = spinner("blue", &format!("Found {} hit file(s).", hit_files.len()));
    bar.finish_with_message(format!("Found {} hit file(s).", hit_files.len()));

    // 1. Spinner while computing the consensus calls
    let bar = spinner("green", "Computing LCA assignments...");

    let mut lookup = EntrezClient::new();
    let results = assign_lca_from_files(
        &taxdb_path,
        hit_files,
        "nt",
        "nucleotide",
        &mut lookup,
        &FilterOptions::default(),
    )
    .unwrap_or_else(|e| {
        bar.finish_with_message("LCA assignment failed.");
        eprintln!("error: {e}");
        process::exit(1);
    });

    bar.finish_with_message(format!(
        "Assigned {} file(s); {} hit(s) dropped as unresolvable.",
        results.assignments.len(),
        results.dropped_unresolved
    ));

    // 2. Spinner while writing the output table
    let bar = spinner("yellow", "Writing lca_table.txt...");

    fs::write("lca_table.txt", results.get_lca_table())
        .expect("Could not write lca_table.txt");

    bar.finish_with_message("Output file created.");
}
