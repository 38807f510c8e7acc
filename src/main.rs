use std::process::ExitCode;

use clap::Parser;

use tensor_completion::{Cli, Inputs, Settings, exit_status, launch, report};

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::resolve(cli.config()?);
    let inputs = Inputs {
        train: cli.train.clone(),
        validate: cli.validate.clone(),
        test: cli.test.clone(),
        output: cli.output.clone(),
    };

    let summary = launch::run(&inputs, &settings)?;
    println!("{}", report::footer(&summary));
    Ok(())
}
