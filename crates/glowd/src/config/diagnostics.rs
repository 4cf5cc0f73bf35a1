use std::io::Write;
use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },
    NoLights,
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// Error type for merge conflicts
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

/// Error type for validation failures
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
            span: None,
            source: None,
        }
    }

    /// Attach the location of the offending value
    pub fn at(mut self, span: Range<usize>, source: Option<&SourceInfo>) -> Self {
        self.span = Some(span);
        self.source = source.cloned();
        self
    }
}

/// Error type for config loading failures (parse errors, IO errors, etc.)
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", path.display(), cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

impl Diagnostic {
    /// Returns true if this diagnostic is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    /// Returns true if this diagnostic is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

/// A collection of diagnostics produced while loading configuration.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_diagnostics(&self.0))
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::EmptyConfig { file_path } => write!(
                f,
                "Warning: Config file '{}' is empty and has no effect",
                file_path.display()
            ),
            Warning::NoLights => f.write_str("Warning: No lights are configured"),
        }
    }
}

type Span = (String, Range<usize>);

fn span(path: &std::path::Path, range: &Range<usize>) -> Span {
    (path.to_string_lossy().into_owned(), range.clone())
}

fn report<'a>(at: Span, message: String) -> ariadne::ReportBuilder<'a, Span> {
    ariadne::Report::build(ariadne::ReportKind::Error, at)
        .with_config(ariadne::Config::default().with_color(false))
        .with_message(message)
}

impl MergeError {
    fn render(&self, out: &mut Vec<u8>) {
        let title = format!("Merge conflict in field '{}'", self.field_path);
        let Some(first) = self.conflicts.first() else {
            let _ = writeln!(out, "{}: {}", title, self.message);
            return;
        };

        let labels = self.conflicts.iter().enumerate().map(|(i, conflict)| {
            let (message, color) = match i {
                0 => ("first definition here", ariadne::Color::Red),
                _ => ("conflicts with this definition", ariadne::Color::Yellow),
            };
            ariadne::Label::new(span(&conflict.file_path, &conflict.span))
                .with_message(message)
                .with_color(color)
        });
        // Conflicting definitions may come from different files
        let sources = ariadne::sources(self.conflicts.iter().map(|c| {
            (c.file_path.to_string_lossy().into_owned(), c.content.clone())
        }));

        let _ = report(span(&first.file_path, &first.span), title)
            .with_note(&self.message)
            .with_labels(labels)
            .finish()
            .write(sources, out);
    }
}

impl ValidationError {
    fn render(&self, out: &mut Vec<u8>) {
        let title = format!("Validation error in '{}'", self.field_path);
        let (Some(range), Some(source)) = (&self.span, &self.source) else {
            let _ = writeln!(out, "{}: {}", title, self.message);
            return;
        };

        let at = span(&source.file_path, range);
        let file = at.0.clone();
        let _ = report(at.clone(), title)
            .with_label(
                ariadne::Label::new(at)
                    .with_message(&self.message)
                    .with_color(ariadne::Color::Red),
            )
            .finish()
            .write((file, ariadne::Source::from(&source.content)), out);
    }
}

/// Render diagnostics compiler-style, with source snippets where a location
/// is known
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut out = Vec::new();
    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(warning) => {
                let _ = writeln!(out, "{}", warning);
            }
            Diagnostic::Error(Error::Merge(e)) => e.render(&mut out),
            Diagnostic::Error(Error::Validation(e)) => e.render(&mut out),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
