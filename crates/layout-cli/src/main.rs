mod presenter;

use clap::{Parser, Subcommand};
use layout_spec::{
    DataSources, EngineConfig, EvalContext, ExprType, FunctionRegistry, InteractionEvent,
    LayoutEngine, LayoutSet, build_render_payload, evaluate_json, validate,
};
use presenter::{OutputFormat, Presenter, Verbosity};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Form layout runtime CLI",
    long_about = "Checks layout files, evaluates expressions and prints generated node trees"
)]
struct Cli {
    /// Engine configuration JSON; defaults apply when omitted.
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Log pass progress and print issue details.
    #[arg(long, short, global = true, alias = "debug")]
    verbose: bool,
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a layout file without running it.
    Check {
        /// Path to the layout JSON.
        #[arg(long, value_name = "LAYOUT")]
        layout: PathBuf,
    },
    /// Evaluate one expression against a data sources file.
    Eval {
        /// Expression in its JSON array form, e.g. '["equals", 1, "1"]'.
        #[arg(long, value_name = "EXPR")]
        expr: String,
        /// Data sources JSON (form data, settings, roles, ...).
        #[arg(long, value_name = "DATA")]
        data: Option<PathBuf>,
        /// Layout to generate first, so `component` lookups work.
        #[arg(long, value_name = "LAYOUT", requires = "node")]
        layout: Option<PathBuf>,
        /// Node whose row scope the expression runs in.
        #[arg(long, value_name = "NODE", requires = "layout")]
        node: Option<String>,
    },
    /// Generate the node tree for a layout and print it.
    Build {
        /// Path to the layout JSON.
        #[arg(long, value_name = "LAYOUT")]
        layout: PathBuf,
        /// Data sources JSON.
        #[arg(long, value_name = "DATA")]
        data: Option<PathBuf>,
        /// JSON array of interaction events applied after generation.
        #[arg(long, value_name = "EVENTS")]
        events: Option<PathBuf>,
    },
    /// Print the JSON Schema of layout files.
    Schema,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            log::debug!("loaded engine config from {}", path.display());
            config
        }
        None => EngineConfig::default(),
    };
    let presenter = Presenter::new(Verbosity::from_verbose(cli.verbose), cli.format);

    match cli.command {
        Command::Check { layout } => run_check(&layout, &presenter),
        Command::Eval {
            expr,
            data,
            layout,
            node,
        } => run_eval(&expr, data.as_deref(), layout.as_deref(), node.as_deref(), config, &presenter),
        Command::Build {
            layout,
            data,
            events,
        } => run_build(&layout, data.as_deref(), events.as_deref(), config, &presenter),
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&LayoutSet::schema())?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn load_layout(path: &Path) -> CliResult<LayoutSet> {
    let raw = fs::read_to_string(path)?;
    Ok(LayoutSet::from_json_str(&raw)?)
}

/// Reads a data sources file. A file holding a single data model needs no
/// `defaultDataType`.
fn load_sources(path: Option<&Path>) -> CliResult<DataSources> {
    let Some(path) = path else {
        return Ok(DataSources::default());
    };
    let raw = fs::read_to_string(path)?;
    let mut sources: DataSources = serde_json::from_str(&raw)?;
    if sources.default_data_type.is_none() && sources.form_data.len() == 1 {
        sources.default_data_type = sources.form_data.keys().next().cloned();
    }
    Ok(sources)
}

fn run_check(layout_path: &Path, presenter: &Presenter) -> CliResult<()> {
    let layout = load_layout(layout_path)?;
    let report = validate(&layout, &FunctionRegistry::with_builtins());
    presenter.show_validation(&layout_path.display().to_string(), &report);
    if report.valid {
        Ok(())
    } else {
        Err(format!("{} issue(s) found", report.issues.len()).into())
    }
}

fn run_eval(
    expr: &str,
    data: Option<&Path>,
    layout: Option<&Path>,
    node: Option<&str>,
    config: EngineConfig,
    presenter: &Presenter,
) -> CliResult<()> {
    let raw: Value = serde_json::from_str(expr)?;
    let sources = load_sources(data)?;

    let value = match layout {
        Some(layout) => {
            let layout = load_layout(layout)?;
            let mut engine = LayoutEngine::new(&layout, config)?;
            engine.generate(&sources, &sources);
            engine.evaluate(&raw, node, &sources)?
        }
        None => {
            let registry = FunctionRegistry::with_builtins();
            let ctx = EvalContext::new(&sources).with_data_type(config.data_type.as_deref());
            evaluate_json(&raw, &registry, &ctx, ExprType::Any)?
        }
    };
    presenter.show_value(&value);
    Ok(())
}

fn run_build(
    layout_path: &Path,
    data: Option<&Path>,
    events: Option<&Path>,
    config: EngineConfig,
    presenter: &Presenter,
) -> CliResult<()> {
    let layout = load_layout(layout_path)?;
    let sources = load_sources(data)?;
    let mut engine = LayoutEngine::new(&layout, config)?;
    let report = engine.generate(&sources, &sources);
    presenter.show_generation(&report);

    if let Some(path) = events {
        let events: Vec<InteractionEvent> = serde_json::from_str(&fs::read_to_string(path)?)?;
        for event in &events {
            engine.handle_event(event)?;
        }
    }

    let payload = build_render_payload(&engine.snapshot(), &engine.visibility(), &sources);
    presenter.show_tree(&payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use assert_fs::prelude::*;
    use serde_json::json;

    const LAYOUT: &str = r#"{
        "dataType": "model",
        "pages": [{
            "id": "page1",
            "components": [
                {
                    "id": "Group",
                    "type": "RepeatingGroup",
                    "repeating": true,
                    "dataModelBindings": { "group": "Group" },
                    "children": ["Name", "Summary"]
                },
                {
                    "id": "Name",
                    "type": "Input",
                    "dataModelBindings": { "simpleBinding": "Group[{0}].Name" }
                },
                {
                    "id": "Summary",
                    "type": "Paragraph",
                    "hidden": ["equals", ["component", "Name"], ""]
                }
            ]
        }]
    }"#;

    const DATA: &str = r#"{
        "formData": { "model": { "Group": [ { "Name": "" }, { "Name": "x" } ] } },
        "roles": ["signer"]
    }"#;

    #[test]
    fn single_model_becomes_the_default() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("data.json");
        fs::write(&path, DATA).expect("write data");
        let sources = load_sources(Some(&path)).expect("load");
        assert_eq!(sources.default_data_type.as_deref(), Some("model"));
        assert_eq!(sources.roles, vec!["signer".to_string()]);
    }

    #[test]
    fn check_reports_invalid_layouts() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = assert_fs::TempDir::new()?;
        let layout = workspace.child("layout.json");
        layout.write_str(
            &json!({
                "pages": [{
                    "id": "page1",
                    "components": [{ "id": "Group", "type": "Group", "children": ["Ghost"] }]
                }]
            })
            .to_string(),
        )?;

        let output = Command::cargo_bin("form-layout")?
            .arg("check")
            .arg("--layout")
            .arg(layout.path())
            .assert()
            .failure()
            .get_output()
            .stdout
            .clone();
        let stdout = String::from_utf8(output)?;
        assert!(stdout.contains("invalid"));
        assert!(stdout.contains("Group - missing_child"));
        Ok(())
    }

    #[test]
    fn check_accepts_valid_layouts() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = assert_fs::TempDir::new()?;
        let layout = workspace.child("layout.json");
        layout.write_str(LAYOUT)?;
        Command::cargo_bin("form-layout")?
            .arg("check")
            .arg("--layout")
            .arg(layout.path())
            .assert()
            .success();
        Ok(())
    }

    #[test]
    fn eval_prints_json_values() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = assert_fs::TempDir::new()?;
        let data = workspace.child("data.json");
        data.write_str(DATA)?;

        let output = Command::cargo_bin("form-layout")?
            .args(["--format", "json", "eval", "--expr", r#"["dataModel", "Group[1].Name"]"#])
            .arg("--data")
            .arg(data.path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        assert_eq!(String::from_utf8(output)?.trim(), "\"x\"");
        Ok(())
    }

    #[test]
    fn eval_in_node_scope_uses_the_tree() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = assert_fs::TempDir::new()?;
        let layout = workspace.child("layout.json");
        layout.write_str(LAYOUT)?;
        let data = workspace.child("data.json");
        data.write_str(DATA)?;

        let output = Command::cargo_bin("form-layout")?
            .args(["eval", "--expr", r#"["concat", "name: ", ["component", "Name"]]"#])
            .arg("--layout")
            .arg(layout.path())
            .arg("--data")
            .arg(data.path())
            .args(["--node", "Summary-1"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        assert_eq!(String::from_utf8(output)?.trim(), "name: x");
        Ok(())
    }

    #[test]
    fn build_prints_visible_nodes() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = assert_fs::TempDir::new()?;
        let layout = workspace.child("layout.json");
        layout.write_str(LAYOUT)?;
        let data = workspace.child("data.json");
        data.write_str(DATA)?;
        let events = workspace.child("events.json");
        events.write_str(r#"[{ "type": "submit" }]"#)?;

        let output = Command::cargo_bin("form-layout")?
            .args(["--format", "json", "build"])
            .arg("--layout")
            .arg(layout.path())
            .arg("--data")
            .arg(data.path())
            .arg("--events")
            .arg(events.path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let tree: Value = serde_json::from_slice(&output)?;
        let nodes = tree["nodes"].as_array().expect("nodes");
        let summary = |id: &str| {
            nodes
                .iter()
                .find(|node| node["id"] == id)
                .cloned()
                .unwrap_or(Value::Null)
        };
        assert_eq!(summary("Summary-0")["hidden"], true);
        assert_eq!(summary("Summary-1")["hidden"], false);
        assert_eq!(
            summary("Name-1")["validations"],
            "Schema|Component|Expression|CustomBackend|Required|Backend"
        );
        assert_eq!(tree["nodes"][0]["rows"].as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[test]
    fn schema_is_printed() -> Result<(), Box<dyn std::error::Error>> {
        let output = Command::cargo_bin("form-layout")?
            .arg("schema")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let schema: Value = serde_json::from_slice(&output)?;
        assert!(schema.to_string().contains("dataModelBindings"));
        Ok(())
    }
}
