use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    no_audio: bool,
    add: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    init_logging()?;

    resound::app::run(resound::app::AppOptions {
        force_null_engine: args.no_audio,
        extra_folder: args.add,
    })
}

/// The terminal belongs to the UI, so log output is piped to a file under
/// the config dir instead of stderr. `RUST_LOG` filtering applies as usual.
fn init_logging() -> anyhow::Result<()> {
    resound::config::ensure_config_dir()?;
    let file = std::fs::File::create(resound::config::log_path()?)?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--no-audio" => out.no_audio = true,
            "--add" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--add requires a folder path");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--add cannot be empty");
                }
                out.add = Some(PathBuf::from(value.trim()));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("resound");
    println!("  --no-audio      Run without opening an output device");
    println!("  --add <path>    Add a music folder before starting");
}
