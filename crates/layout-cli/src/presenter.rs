use layout_spec::{
    ExprValue, GenerationReport, LayoutIssue, RenderPayload, ValidationReport, render_json,
    render_text,
};

/// Controls which bits of state the CLI prints.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verbosity {
    /// Results only.
    Clean,
    /// Results plus pass statistics and issue details.
    Verbose,
}

impl Verbosity {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Clean
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Prints command results in the selected format.
pub struct Presenter {
    verbosity: Verbosity,
    format: OutputFormat,
}

impl Presenter {
    pub fn new(verbosity: Verbosity, format: OutputFormat) -> Self {
        Self { verbosity, format }
    }

    pub fn show_validation(&self, layout: &str, report: &ValidationReport) {
        if self.format == OutputFormat::Json {
            println!("{}", to_pretty(report));
            return;
        }
        println!(
            "Layout {}: {}",
            layout,
            if report.valid { "valid" } else { "invalid" }
        );
        if !report.issues.is_empty() {
            println!("Issues:");
            for issue in &report.issues {
                println!("  {}", describe_issue(issue, self.verbosity));
            }
        }
    }

    pub fn show_value(&self, value: &ExprValue) {
        match self.format {
            OutputFormat::Json => println!("{}", value.to_json()),
            OutputFormat::Text => println!("{}", value.display_text()),
        }
    }

    pub fn show_generation(&self, report: &GenerationReport) {
        if !self.verbosity.is_verbose() {
            return;
        }
        eprintln!(
            "Generation {}: {} node(s), {} row(s), {} failed evaluation(s)",
            report.generation, report.build.nodes, report.build.rows, report.build.failures
        );
        if let Some(flush) = &report.flush {
            eprintln!(
                "  flush v{}: {} add(s), {} row uuid(s), {} prop(s), {} row extra(s), {} page prop(s)",
                flush.version,
                flush.adds,
                flush.row_uuids,
                flush.node_props,
                flush.row_extras,
                flush.page_props
            );
        }
    }

    pub fn show_tree(&self, payload: &RenderPayload) {
        match self.format {
            OutputFormat::Json => println!("{}", to_pretty(&render_json(payload))),
            OutputFormat::Text => println!("{}", render_text(payload)),
        }
    }
}

fn describe_issue(issue: &LayoutIssue, verbosity: Verbosity) -> String {
    if verbosity.is_verbose() {
        issue.to_string()
    } else {
        let at = issue
            .component
            .as_deref()
            .or(issue.page.as_deref())
            .unwrap_or("<layout>");
        format!("{} - {}", at, issue.code)
    }
}

fn to_pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| format!("<unprintable: {}>", err))
}
