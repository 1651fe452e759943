//! Functions a work unit can invoke, how their positional files map onto file
//! roles, and the dispatcher seam the scheduler calls through.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use crate::command::CommandModel;
use crate::config::CommandSpec;
use crate::error::{DispatchError, InvalidUnit};

/// The part a positional file plays for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileRole {
    Input,
    Secondary,
    Output,
    Results,
    ImageFolder,
}

impl FileRole {
    pub const ALL: [FileRole; 5] = [
        FileRole::Input,
        FileRole::Secondary,
        FileRole::Output,
        FileRole::Results,
        FileRole::ImageFolder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileRole::Input => "input",
            FileRole::Secondary => "secondary",
            FileRole::Output => "output",
            FileRole::Results => "results",
            FileRole::ImageFolder => "image_folder",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(FileRole::Input),
            "secondary" => Ok(FileRole::Secondary),
            "output" => Ok(FileRole::Output),
            "results" => Ok(FileRole::Results),
            "image_folder" | "imageFolder" => Ok(FileRole::ImageFolder),
            other => Err(other.to_string()),
        }
    }
}

/// Resolved files of one work unit, by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    pub input: Option<PathBuf>,
    pub secondary: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub results: Option<PathBuf>,
    pub image_folder: Option<PathBuf>,
}

impl FileSet {
    pub fn get(&self, role: FileRole) -> Option<&Path> {
        match role {
            FileRole::Input => self.input.as_deref(),
            FileRole::Secondary => self.secondary.as_deref(),
            FileRole::Output => self.output.as_deref(),
            FileRole::Results => self.results.as_deref(),
            FileRole::ImageFolder => self.image_folder.as_deref(),
        }
    }

    pub fn set(&mut self, role: FileRole, path: PathBuf) {
        let slot = match role {
            FileRole::Input => &mut self.input,
            FileRole::Secondary => &mut self.secondary,
            FileRole::Output => &mut self.output,
            FileRole::Results => &mut self.results,
            FileRole::ImageFolder => &mut self.image_folder,
        };
        *slot = Some(path);
    }
}

/// A function the scheduler may dispatch, with its file layouts and optional
/// external command.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub usage: Option<String>,
    /// Positional file count -> roles in positional order.
    pub layouts: BTreeMap<usize, Vec<FileRole>>,
    /// Roles filled from the input path when the layout leaves them empty.
    pub derive: Vec<(FileRole, String)>,
    pub command: Option<CommandSpec>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub cwd: Option<String>,
    pub collect_results: bool,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: None,
            layouts: BTreeMap::new(),
            derive: Vec::new(),
            command: None,
            env: HashMap::new(),
            timeout: None,
            cwd: None,
            collect_results: false,
        }
    }

    pub fn layout(mut self, roles: impl IntoIterator<Item = FileRole>) -> Self {
        let roles: Vec<FileRole> = roles.into_iter().collect();
        self.layouts.insert(roles.len(), roles);
        self
    }

    pub fn derive(mut self, role: FileRole, template: impl Into<String>) -> Self {
        self.derive.push((role, template.into()));
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    fn assign(&self, files: &[PathBuf]) -> Result<FileSet, InvalidUnit> {
        let Some(roles) = self.layouts.get(&files.len()) else {
            return Err(InvalidUnit::FileCount {
                function: self.name.clone(),
                count: files.len(),
                allowed: self.layouts.keys().copied().collect(),
            });
        };

        let mut set = FileSet::default();
        for (role, path) in roles.iter().zip(files) {
            set.set(*role, path.clone());
        }

        if let Some(input) = set.input.clone() {
            for (role, template) in &self.derive {
                if set.get(*role).is_none() {
                    set.set(*role, derive_path(&input, template));
                }
            }
        }
        Ok(set)
    }
}

/// Expand `{dir}`, `{stem}`, `{ext}`, `{name}` from the input path.
fn derive_path(input: &Path, template: &str) -> PathBuf {
    let dir = input
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let template = if dir.is_empty() {
        template.replace("{dir}/", "").replace("{dir}", "")
    } else {
        template.to_string()
    };

    PathBuf::from(
        template
            .replace("{dir}", &dir)
            .replace("{stem}", &stem)
            .replace("{ext}", &ext)
            .replace("{name}", &name),
    )
}

/// The function chosen for a unit and its resolved files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub function: String,
    pub files: FileSet,
}

/// All functions known to a run.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<FunctionSpec>,
}

impl FunctionRegistry {
    pub fn new(functions: Vec<FunctionSpec>) -> Self {
        Self { functions }
    }

    /// Look up a function by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Find the single function switch on the command line and map its
    /// positional files onto roles.
    pub fn assign(&self, command: &CommandModel) -> Result<Assignment, InvalidUnit> {
        let mut matched: Vec<&FunctionSpec> = command
            .switch_names()
            .filter_map(|name| self.get(name))
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        matched.dedup_by(|a, b| a.name == b.name);

        let spec = match matched.as_slice() {
            [] => return Err(InvalidUnit::NoFunction),
            [spec] => *spec,
            many => {
                return Err(InvalidUnit::MultipleFunctions(
                    many.iter().map(|f| f.name.clone()).collect(),
                ));
            }
        };

        Ok(Assignment {
            function: spec.name.clone(),
            files: spec.assign(command.files())?,
        })
    }
}

/// Opaque error record produced by a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingError {
    pub function: String,
    pub message: String,
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.function, self.message)
    }
}

/// Everything a function receives for one unit.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub index: usize,
    pub function: String,
    pub files: FileSet,
    pub command: CommandModel,
}

/// What a function hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub status: i32,
    pub results: Vec<Vec<String>>,
    pub errors: Vec<ProcessingError>,
}

impl DispatchOutcome {
    #[cfg(test)]
    pub fn with_status(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

pub type DispatchFuture =
    Pin<Box<dyn Future<Output = Result<DispatchOutcome, DispatchError>> + Send + 'static>>;

/// Performs the work of a named function. The scheduler never looks inside.
pub trait FunctionDispatcher: Send + Sync {
    fn dispatch(&self, request: DispatchRequest) -> DispatchFuture;
}

/// In-process functions: a plain closure runs to completion on the worker.
impl<F> FunctionDispatcher for F
where
    F: Fn(DispatchRequest) -> Result<DispatchOutcome, DispatchError> + Send + Sync,
{
    fn dispatch(&self, request: DispatchRequest) -> DispatchFuture {
        let outcome = self(request);
        Box::pin(std::future::ready(outcome))
    }
}
