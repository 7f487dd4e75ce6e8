use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use paramgen::{expand, json, ExpandValue, MatchPolicy, ParamGen};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Namelist,
}

/// Reduce a guarded parameter tree to concrete values.
#[derive(Debug, Parser)]
#[command(name = "paramgen", version)]
struct Cli {
    /// JSON parameter tree, or `-` for stdin.
    #[arg(default_value = "-")]
    input: String,

    /// Define a variable as NAME=VALUE. Values are strings.
    #[arg(short = 'D', long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// JSON object of variable values; strings, booleans and numbers keep their type.
    #[arg(long, value_name = "FILE")]
    vars_file: Option<PathBuf>,

    /// Which true guard wins when several match.
    #[arg(long = "match", default_value = "last")]
    match_policy: MatchPolicy,

    /// Output format.
    #[arg(long, value_enum, default_value = "json")]
    format: Format,

    /// Only lint the tree; print problems as JSON and exit non-zero if any.
    #[arg(long)]
    check: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let source = read_input(&cli.input)?;
    let mut params = ParamGen::from_json(&source)
        .with_context(|| format!("failed to load {}", cli.input))?
        .with_match(cli.match_policy);

    if cli.check {
        let errors = params.validate();
        println!("{}", json::validation_errors_to_json(&errors));
        if !errors.is_empty() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let vars = load_vars(&cli)?;
    params.reduce(expand::from_map(&vars)).context("reduction failed")?;

    match cli.format {
        Format::Json => println!("{}", params.data().to_json_pretty()),
        Format::Namelist => print!("{}", params.write_nml()?),
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(input).with_context(|| format!("failed to read {}", input))
    }
}

fn load_vars(cli: &Cli) -> anyhow::Result<HashMap<String, ExpandValue>> {
    let mut vars = HashMap::new();

    if let Some(path) = &cli.vars_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)
            .with_context(|| format!("{} must hold a JSON object", path.display()))?;
        for (name, value) in object {
            let value = match value {
                serde_json::Value::String(s) => ExpandValue::String(s),
                serde_json::Value::Bool(b) => ExpandValue::Boolean(b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => ExpandValue::Integer(i),
                    None => ExpandValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                other => bail!("variable {} has unsupported value {}", name, other),
            };
            vars.insert(name, value);
        }
    }

    for def in &cli.vars {
        let Some((name, value)) = def.split_once('=') else {
            bail!("--var expects NAME=VALUE, got {:?}", def);
        };
        vars.insert(name.trim().to_string(), ExpandValue::from(value));
    }
    Ok(vars)
}
