use clap::Parser;
use clap::error::ErrorKind;
use treeshift::cli::{AppContext, Cli, Commands};
use treeshift::core::error::EXIT_INVALID_CONFIG;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not argument errors.
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_INVALID_CONFIG,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    let result = match cli.command {
        Commands::Init(args) => treeshift::infra::config::init(args, &ctx).map(|()| 0),
        Commands::Reorganize(args) => treeshift::core::pipeline::run(&args, &ctx),
        Commands::Rollback(args) => treeshift::core::rollback::run(&args, &ctx),
        Commands::Validate(args) => treeshift::core::validate::run(&args, &ctx),
        Commands::Report(args) => treeshift::core::report::run(&args, &ctx),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_INVALID_CONFIG);
        }
    }
}
