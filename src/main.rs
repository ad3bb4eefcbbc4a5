use clap::Parser;
use tracing_subscriber::EnvFilter;

use rest_shape::cli::Args;
use rest_shape::commands::Env;
use rest_shape::config::ConfigFile;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ConfigFile::resolve(args.config.as_deref())?;
    let fixture = args.fixture.or(config.fixture).ok_or(
        "No catalog fixture: pass --fixture or set \"fixture\" in .rest_shape.json",
    )?;
    let env = Env::load(&fixture, config.settings)?;
    let output = args.command.run(&env, args.format)?;
    println!("{}", output);
    Ok(())
}
