use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML settings document, created with defaults when missing
    #[arg(short, long, env = "SETTINGS_PATH", default_value = "settings.yaml")]
    pub settings: PathBuf,

    /// SQLite database file, overriding `paths.database`
    #[arg(short, long, env)]
    pub database_url: Option<PathBuf>,

    /// Run the startup steps and exit without serving
    #[arg(long)]
    pub pipeline_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "booru-browser",
            "--settings",
            "conf/app.yaml",
            "--database-url",
            "data/booru.db",
            "--pipeline-only",
        ])
        .unwrap();
        assert_eq!(cli.settings, PathBuf::from("conf/app.yaml"));
        assert_eq!(cli.database_url, Some(PathBuf::from("data/booru.db")));
        assert!(cli.pipeline_only);
    }
}
