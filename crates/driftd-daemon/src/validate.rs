//! `--validate-config <path>` entry point: parses and pretty-prints the
//! static repo list, exiting non-zero on a config error.

pub fn run(path: &str) {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Cannot read {path}: {e}");
            std::process::exit(1);
        }
    };

    match driftd_config::parse_repo_list(&content) {
        Ok(repos) => {
            println!("Configuration is valid");
            println!("Repos: {}", repos.len());
            for repo in &repos {
                let schedule = if repo.schedule.is_empty() { "none".to_string() } else { repo.schedule.clone() };
                println!("  - {} ({}) schedule={}", repo.name, repo.url, schedule);
            }
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    }
}
