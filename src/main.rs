use anyhow::{bail, Context as _};
use clap::Parser;
use criteria::{Record, Value};
use slog::{o, Drain};

/// Compile a criteria expression and evaluate it against a JSON record.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// criteria expression, e.g. 'user == "admin" and count > 10'
    #[clap(short, long)]
    expr: String,

    /// JSON object to evaluate against
    #[clap(short, long, default_value = "{}")]
    record: String,

    /// print the parsed expression tree and exit
    #[clap(long)]
    ast: bool,

    /// print the evaluation trace
    #[clap(short, long)]
    trace: bool,
}

fn root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    slog::Logger::root(drain, o!())
}

fn value_from_json(v: &serde_json::Value) -> anyhow::Result<Value> {
    Ok(match v {
        serde_json::Value::Null => Value::Absent,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::int(i),
            None => Value::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::text(s.clone()),
        serde_json::Value::Array(items) => Value::Sequence(
            items
                .iter()
                .map(value_from_json)
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        serde_json::Value::Object(_) => bail!("nested objects are not valid record values"),
    })
}

fn record_from_json(json: &serde_json::Value) -> anyhow::Result<Record> {
    let object = match json {
        serde_json::Value::Object(map) => map,
        _ => bail!("record must be a JSON object"),
    };
    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), value_from_json(v)?)))
        .collect()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = root_logger();

    let expr = match criteria::parse(&args.expr) {
        Ok(expr) => expr,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(1);
        }
    };

    if args.ast {
        println!("{}", expr.ast());
        return Ok(());
    }

    let json: serde_json::Value =
        serde_json::from_str(&args.record).context("record is not valid JSON")?;
    let record = record_from_json(&json)?;

    let (result, trace) = criteria::evaluate(&expr, &record);
    if args.trace {
        for line in &trace {
            println!("{}", line);
        }
    }
    match result {
        Ok(value) => {
            println!("{}", value);
            Ok(())
        }
        Err(err) => {
            slog::error!(log, "criteria evaluation failed"; "error" => %err);
            std::process::exit(1);
        }
    }
}
